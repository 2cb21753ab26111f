//! HTTP transport for the bridge
//!
//! `dirbridge serve` → loopback JSON API; notifications are long-polled

use crate::bridge::Bridge;
use crate::config::{Config, ServerConfig};
use crate::protocol::{self, ErrorBody};
use crate::watch::{ChangeNotification, SessionId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{self, Cursor, Read};
use std::net::IpAddr;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::thread;
use std::time::{Duration, Instant};
use tiny_http::{Header, Method, Request, Response, Server};

const DEFAULT_POLL_MS: u64 = 25_000;
const MAX_POLL_MS: u64 = 60_000;

#[derive(Serialize)]
struct ApiResponse<T> {
    ok: bool,
    data: Option<T>,
    error: Option<ErrorBody>,
}

impl<T: Serialize> ApiResponse<T> {
    fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }
}

impl ApiResponse<()> {
    fn failure(error: ErrorBody) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(error),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionCreated {
    session_id: SessionId,
}

#[derive(Serialize)]
struct Health {
    name: &'static str,
    version: &'static str,
    watched: usize,
}

#[derive(Deserialize, Default)]
struct EventsQuery {
    timeout_ms: Option<u64>,
}

/// A session's pending notifications and when it last called in
struct Inbox {
    rx: Mutex<Receiver<ChangeNotification>>,
    last_seen: Mutex<Instant>,
}

impl Inbox {
    fn new(rx: Receiver<ChangeNotification>) -> Self {
        Self {
            rx: Mutex::new(rx),
            last_seen: Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *lock(&self.last_seen) = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        lock(&self.last_seen).elapsed()
    }

    /// A long-poll currently holds the receiver
    fn is_polling(&self) -> bool {
        matches!(self.rx.try_lock(), Err(TryLockError::WouldBlock))
    }
}

/// Sessions attached over HTTP and their pending notifications
struct HttpHost {
    bridge: Arc<Bridge>,
    inboxes: Mutex<HashMap<SessionId, Arc<Inbox>>>,
    /// Accepted `Host` header values; empty accepts any
    allowed_hosts: Vec<String>,
    token: Option<String>,
}

/// Bind to the configured address and serve until the process exits
pub fn start_bridge_server(config: &Config, bridge: Arc<Bridge>) -> io::Result<()> {
    let addr = config.bind_addr();
    let server =
        Server::http(&addr).map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

    eprintln!("\n\x1b[1;32m📂 dirbridge\x1b[0m");
    eprintln!("   Bridge API: http://{}/api", addr);
    if config.server.token.is_some() {
        eprintln!("   Requests must carry the configured bearer token");
    }
    eprintln!("   Press Ctrl+C to stop\n");

    serve(server, bridge, &config.server);
    Ok(())
}

/// Accept requests on `server`, each on its own worker thread
///
/// `config.port` is ignored in favor of the port `server` is bound to.
pub fn serve(server: Server, bridge: Arc<Bridge>, config: &ServerConfig) {
    let port = server
        .server_addr()
        .to_ip()
        .map(|addr| addr.port())
        .unwrap_or(config.port);
    let host = Arc::new(HttpHost::new(bridge, config, port));
    if let Some(idle) = config.session_idle() {
        spawn_reaper(&host, idle);
    }

    for request in server.incoming_requests() {
        let host = Arc::clone(&host);
        let spawned = thread::Builder::new()
            .name("dirbridge-http".to_string())
            .spawn(move || {
                if let Err(e) = host.handle_request(request) {
                    log::error!("failed to answer request: {}", e);
                }
            });
        if let Err(e) = spawned {
            log::error!("could not spawn request worker: {}", e);
        }
    }
}

/// Close sessions whose UI stopped calling in without saying goodbye
fn spawn_reaper(host: &Arc<HttpHost>, idle: Duration) {
    let host = Arc::downgrade(host);
    let tick = (idle / 4).clamp(Duration::from_millis(50), Duration::from_secs(5));
    let spawned = thread::Builder::new()
        .name("dirbridge-reaper".to_string())
        .spawn(move || loop {
            thread::sleep(tick);
            let Some(host) = host.upgrade() else {
                break;
            };
            host.reap_idle(idle);
        });
    if let Err(e) = spawned {
        log::error!("could not spawn session reaper, idle sessions will linger: {}", e);
    }
}

/// Host header values a loopback client may send
fn allowed_hosts(config: &ServerConfig, port: u16) -> Vec<String> {
    let bind: IpAddr = match config.host.parse() {
        Ok(ip) => ip,
        Err(_) => return vec![format!("{}:{}", config.host, port).to_ascii_lowercase()],
    };
    if bind.is_unspecified() {
        log::warn!("bound to {}, Host header is not checked", config.host);
        return Vec::new();
    }
    let mut hosts = vec![
        format!("127.0.0.1:{}", port),
        format!("localhost:{}", port),
        format!("[::1]:{}", port),
    ];
    let configured = match bind {
        IpAddr::V4(ip) => format!("{}:{}", ip, port),
        IpAddr::V6(ip) => format!("[{}]:{}", ip, port),
    };
    if !hosts.contains(&configured) {
        hosts.push(configured);
    }
    hosts
}

impl HttpHost {
    fn new(bridge: Arc<Bridge>, config: &ServerConfig, port: u16) -> Self {
        Self {
            bridge,
            inboxes: Mutex::new(HashMap::new()),
            allowed_hosts: allowed_hosts(config, port),
            token: config.token.clone(),
        }
    }

    fn handle_request(&self, request: Request) -> io::Result<()> {
        if !self.host_allowed(&request) {
            log::warn!("rejected request with foreign Host header");
            let error = ErrorBody::protocol("forbiddenHost", "Host header is not this bridge");
            return respond(request, 403, &ApiResponse::failure(error));
        }
        if !self.authorized(&request) {
            let error = ErrorBody::protocol("unauthorized", "missing or wrong bearer token");
            return respond(request, 401, &ApiResponse::failure(error));
        }

        let url = request.url().to_string();
        let (path, query) = match url.split_once('?') {
            Some((path, query)) => (path, query),
            None => (url.as_str(), ""),
        };
        let method = request.method().clone();
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        log::debug!("{} {}", method, path);

        match (&method, segments.as_slice()) {
            (&Method::Get, ["api", "health"]) => {
                let health = Health {
                    name: env!("CARGO_PKG_NAME"),
                    version: env!("CARGO_PKG_VERSION"),
                    watched: self.bridge.watched_paths().len(),
                };
                respond(request, 200, &ApiResponse::success(health))
            }

            // Attach a UI session
            (&Method::Post, ["api", "sessions"]) => {
                let session_id = self.open_session();
                respond(request, 201, &ApiResponse::success(SessionCreated { session_id }))
            }

            // UI is closing: release its watches
            (&Method::Delete, ["api", "sessions", id]) => match self.find_session(id) {
                Some((session, _)) => {
                    self.close_session(&session);
                    respond(request, 200, &ApiResponse::success(true))
                }
                None => unknown_session(request, id),
            },

            (&Method::Post, ["api", "sessions", id, "invoke"]) => match self.find_session(id) {
                Some((session, _)) => self.handle_invoke(request, &session),
                None => unknown_session(request, id),
            },

            // Long-poll for change notifications
            (&Method::Get, ["api", "sessions", id, "events"]) => match self.find_session(id) {
                Some((_, inbox)) => {
                    let params: EventsQuery = serde_urlencoded::from_str(query).unwrap_or_default();
                    let timeout = params.timeout_ms.unwrap_or(DEFAULT_POLL_MS).min(MAX_POLL_MS);
                    let batch = wait_for_events(&inbox, Duration::from_millis(timeout));
                    inbox.touch();
                    match batch {
                        Some(batch) => respond(request, 200, &ApiResponse::success(batch)),
                        None => unknown_session(request, id),
                    }
                }
                None => unknown_session(request, id),
            },

            _ => respond(
                request,
                404,
                &ApiResponse::failure(ErrorBody::protocol("notFound", "no such route")),
            ),
        }
    }

    fn host_allowed(&self, request: &Request) -> bool {
        if self.allowed_hosts.is_empty() {
            return true;
        }
        header_value(request, "Host")
            .is_some_and(|host| self.allowed_hosts.contains(&host.to_ascii_lowercase()))
    }

    fn authorized(&self, request: &Request) -> bool {
        let Some(ref token) = self.token else {
            return true;
        };
        header_value(request, "Authorization")
            .is_some_and(|value| value.strip_prefix("Bearer ") == Some(token.as_str()))
    }

    fn handle_invoke(&self, mut request: Request, session: &SessionId) -> io::Result<()> {
        let mut body = String::new();
        if let Err(e) = request.as_reader().read_to_string(&mut body) {
            let error = ErrorBody::protocol("badRequest", format!("failed to read body: {}", e));
            return respond(request, 400, &ApiResponse::failure(error));
        }

        match protocol::parse_request(&body) {
            Ok(call) => {
                let response = self.bridge.handle(session, &call);
                let status = if response.ok { 200 } else { 422 };
                respond(request, status, &response)
            }
            Err(response) => respond(request, 400, &response),
        }
    }

    fn open_session(&self) -> SessionId {
        let session = self.bridge.open_session();
        let (tx, rx) = mpsc::channel();
        self.bridge.on_directory_changed(&session, tx);
        self.lock_inboxes()
            .insert(session.clone(), Arc::new(Inbox::new(rx)));
        session
    }

    fn close_session(&self, session: &SessionId) {
        self.lock_inboxes().remove(session);
        self.bridge.close_session(session);
    }

    fn reap_idle(&self, idle: Duration) {
        let expired: Vec<SessionId> = self
            .lock_inboxes()
            .iter()
            .filter(|(_, inbox)| !inbox.is_polling() && inbox.idle_for() >= idle)
            .map(|(session, _)| session.clone())
            .collect();
        for session in expired {
            log::info!("closing idle session {}", session);
            self.close_session(&session);
        }
    }

    /// Look up a live session and mark it as seen
    fn find_session(&self, id: &str) -> Option<(SessionId, Arc<Inbox>)> {
        let session = SessionId::parse(id)?;
        let inbox = self.lock_inboxes().get(&session).cloned()?;
        inbox.touch();
        Some((session, inbox))
    }

    fn lock_inboxes(&self) -> MutexGuard<'_, HashMap<SessionId, Arc<Inbox>>> {
        lock(&self.inboxes)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn header_value(request: &Request, name: &'static str) -> Option<String> {
    request
        .headers()
        .iter()
        .find(|h| h.field.equiv(name))
        .map(|h| h.value.as_str().trim().to_string())
}

/// Block until at least one notification arrives or `timeout` passes
///
/// Returns `None` once the session's sink is gone.
fn wait_for_events(inbox: &Inbox, timeout: Duration) -> Option<Vec<ChangeNotification>> {
    let rx = lock(&inbox.rx);
    let mut batch = Vec::new();
    match rx.recv_timeout(timeout) {
        Ok(first) => batch.push(first),
        Err(RecvTimeoutError::Timeout) => return Some(batch),
        Err(RecvTimeoutError::Disconnected) => return None,
    }
    while let Ok(next) = rx.try_recv() {
        batch.push(next);
    }
    Some(batch)
}

fn unknown_session(request: Request, id: &str) -> io::Result<()> {
    let error = ErrorBody::protocol("unknownSession", format!("no session {}", id));
    respond(request, 404, &ApiResponse::failure(error))
}

fn respond<T: Serialize>(request: Request, status: u16, body: &T) -> io::Result<()> {
    let json = serde_json::to_string(body)?;
    request.respond(json_response(json, status))
}

fn json_response(json: String, status: u16) -> Response<Cursor<Vec<u8>>> {
    let mut response = Response::from_string(json).with_status_code(status);
    if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]) {
        response.add_header(header);
    }
    response
}
