//! Directory watch registry
//!
//! Holds at most one OS-level watch per directory path and routes change
//! events to the sinks of the sessions subscribed to that path.
//!
//! Raw notify callbacks only push a signal into a channel. A single
//! dispatcher thread drains it, optionally coalesces bursts, and looks up
//! subscribers at delivery time, so events for a path that was unwatched
//! in the meantime are dropped.

use crate::config::{WatchBackend, WatchConfig};
use crate::error::WatchError;
use notify::event::{AccessKind, AccessMode};
use notify::{Config, Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// "Re-list this directory"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeNotification {
    pub path: PathBuf,
}

/// Where a session's notifications are sent
pub type NotificationSink = Sender<ChangeNotification>;

/// Identity of one attached UI session
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Accepts only well-formed UUIDs
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(|id| Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

enum Signal {
    Changed(PathBuf),
    Stop,
}

struct Registration {
    handle: Box<dyn Watcher + Send>,
    subscribers: BTreeSet<SessionId>,
}

#[derive(Default)]
struct State {
    watches: HashMap<PathBuf, Registration>,
    open: HashSet<SessionId>,
    sinks: HashMap<SessionId, NotificationSink>,
    shut_down: bool,
}

pub struct WatchRegistry {
    state: Arc<Mutex<State>>,
    signals: Mutex<Sender<Signal>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    backend: WatchBackend,
    poll_interval: Duration,
}

impl WatchRegistry {
    /// Create an empty registry and start its dispatcher thread
    pub fn new(config: &WatchConfig) -> std::io::Result<Self> {
        let state = Arc::new(Mutex::new(State::default()));
        let (tx, rx) = mpsc::channel();

        let dispatcher = {
            let state = Arc::clone(&state);
            let debounce = config.debounce();
            thread::Builder::new()
                .name("dirbridge-watch".to_string())
                .spawn(move || run_dispatcher(state, rx, debounce))?
        };

        Ok(Self {
            state,
            signals: Mutex::new(tx),
            dispatcher: Mutex::new(Some(dispatcher)),
            backend: config.backend,
            poll_interval: config.poll_interval(),
        })
    }

    /// Admit `session`; only open sessions may watch or subscribe
    pub fn open_session(&self, session: &SessionId) {
        let mut state = self.lock_state();
        if !state.shut_down {
            state.open.insert(session.clone());
        }
    }

    /// Register `sink` as the single notification sink of `session`
    ///
    /// Replaces any sink registered earlier for the same session. Ignored
    /// for sessions that are not open.
    pub fn subscribe(&self, session: &SessionId, sink: NotificationSink) {
        let mut state = self.lock_state();
        if !state.open.contains(session) {
            log::debug!("ignored sink for session {} that is not open", session);
            return;
        }
        state.sinks.insert(session.clone(), sink);
    }

    /// Start (or restart) watching `path` on behalf of `session`
    ///
    /// An existing handle for the path is released before the new one is
    /// installed. If installation fails the path is left unwatched.
    pub fn watch(&self, session: &SessionId, path: &Path) -> Result<(), WatchError> {
        if !path.is_dir() {
            return Err(WatchError::NotADirectory(path.to_path_buf()));
        }

        let mut state = self.lock_state();
        if state.shut_down {
            return Err(WatchError::ShutDown);
        }
        if !state.open.contains(session) {
            return Err(WatchError::SessionClosed(session.to_string()));
        }

        let mut subscribers = match state.watches.remove(path) {
            Some(Registration {
                handle,
                subscribers,
            }) => {
                drop(handle);
                log::debug!("released previous watch on {}", path.display());
                subscribers
            }
            None => BTreeSet::new(),
        };

        let handle = self.install(path)?;
        subscribers.insert(session.clone());
        state.watches.insert(
            path.to_path_buf(),
            Registration {
                handle,
                subscribers,
            },
        );
        log::info!("watching {}", path.display());
        Ok(())
    }

    /// Drop `session`'s interest in `path`; the handle goes with the last one
    ///
    /// Unknown paths and sessions are ignored.
    pub fn unwatch(&self, session: &SessionId, path: &Path) {
        let mut state = self.lock_state();
        let now_empty = match state.watches.get_mut(path) {
            Some(reg) => {
                reg.subscribers.remove(session);
                reg.subscribers.is_empty()
            }
            None => return,
        };
        if now_empty {
            state.watches.remove(path);
            log::info!("stopped watching {}", path.display());
        }
    }

    /// Forget a session: its sink and all of its subscriptions
    pub fn close_session(&self, session: &SessionId) {
        let mut state = self.lock_state();
        state.open.remove(session);
        state.sinks.remove(session);
        state.watches.retain(|path, reg| {
            reg.subscribers.remove(session);
            let keep = !reg.subscribers.is_empty();
            if !keep {
                log::debug!("released watch on {} with closing session", path.display());
            }
            keep
        });
    }

    /// Release every handle and stop the dispatcher. Idempotent.
    pub fn shutdown(&self) {
        {
            let mut state = self.lock_state();
            if state.shut_down {
                return;
            }
            state.shut_down = true;
            let released = state.watches.len();
            state.watches.clear();
            state.sinks.clear();
            state.open.clear();
            log::info!("watch registry shut down, released {} watch(es)", released);
        }

        if let Ok(tx) = self.signals.lock() {
            let _ = tx.send(Signal::Stop);
        }
        let handle = match self.dispatcher.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::error!("watch dispatcher thread panicked");
            }
        }
    }

    /// Currently watched directories, sorted
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<_> = self.lock_state().watches.keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn is_watched(&self, path: &Path) -> bool {
        self.lock_state().watches.contains_key(path)
    }

    fn install(&self, path: &Path) -> Result<Box<dyn Watcher + Send>, WatchError> {
        let tx = match self.signals.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        let dir = path.to_path_buf();
        let handler = move |res: notify::Result<Event>| match res {
            Ok(event) if is_change(&event.kind) => {
                let _ = tx.send(Signal::Changed(dir.clone()));
            }
            Ok(_) => {}
            Err(e) => log::warn!("watch error on {}: {}", dir.display(), e),
        };

        let install_err = |source: notify::Error| WatchError::Install {
            path: path.to_path_buf(),
            source,
        };
        let mut watcher: Box<dyn Watcher + Send> = match self.backend {
            WatchBackend::Native => {
                Box::new(RecommendedWatcher::new(handler, Config::default()).map_err(install_err)?)
            }
            WatchBackend::Poll => Box::new(
                PollWatcher::new(
                    handler,
                    Config::default().with_poll_interval(self.poll_interval),
                )
                .map_err(install_err)?,
            ),
        };
        watcher
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(install_err)?;
        Ok(watcher)
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Drop for WatchRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Opening or reading an entry does not change the listing
fn is_change(kind: &EventKind) -> bool {
    match kind {
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => true,
        EventKind::Access(_) => false,
        _ => true,
    }
}

fn run_dispatcher(state: Arc<Mutex<State>>, signals: Receiver<Signal>, debounce: Option<Duration>) {
    let mut pending = Debouncer::new(debounce.unwrap_or_default());

    loop {
        let signal = match pending.next_deadline() {
            None => signals.recv().ok(),
            Some(deadline) => {
                match signals.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
                    Ok(signal) => Some(signal),
                    Err(RecvTimeoutError::Timeout) => {
                        for path in pending.take_due(Instant::now()) {
                            deliver(&state, &path);
                        }
                        continue;
                    }
                    Err(RecvTimeoutError::Disconnected) => None,
                }
            }
        };

        match signal {
            Some(Signal::Changed(path)) if debounce.is_some() => {
                pending.record(path, Instant::now());
            }
            Some(Signal::Changed(path)) => deliver(&state, &path),
            Some(Signal::Stop) | None => break,
        }

        for path in pending.take_due(Instant::now()) {
            deliver(&state, &path);
        }
    }
    log::debug!("watch dispatcher stopped");
}

/// Send one notification for `path` to every subscribed session
fn deliver(state: &Mutex<State>, path: &Path) {
    let mut state = match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    let State { watches, sinks, .. } = &mut *state;

    let Some(reg) = watches.get(path) else {
        return;
    };

    let mut gone = Vec::new();
    for session in &reg.subscribers {
        let Some(sink) = sinks.get(session) else {
            continue;
        };
        let notification = ChangeNotification {
            path: path.to_path_buf(),
        };
        if sink.send(notification).is_err() {
            gone.push(session.clone());
        }
    }
    log::trace!("change in {}", path.display());

    for session in gone {
        log::debug!("dropping disconnected sink for session {}", session);
        sinks.remove(&session);
    }
}

/// Holds paths until they have been quiet for `window`
struct Debouncer {
    window: Duration,
    last_seen: HashMap<PathBuf, Instant>,
}

impl Debouncer {
    fn new(window: Duration) -> Self {
        Self {
            window,
            last_seen: HashMap::new(),
        }
    }

    fn record(&mut self, path: PathBuf, at: Instant) {
        self.last_seen.insert(path, at);
    }

    /// Earliest instant at which some pending path becomes due
    fn next_deadline(&self) -> Option<Instant> {
        let earliest = self.last_seen.values().min()?;
        Some(earliest.checked_add(self.window).unwrap_or(*earliest))
    }

    fn take_due(&mut self, now: Instant) -> Vec<PathBuf> {
        let window = self.window;
        let due: Vec<PathBuf> = self
            .last_seen
            .iter()
            .filter(|(_, seen)| match seen.checked_add(window) {
                Some(due) => due <= now,
                None => true,
            })
            .map(|(path, _)| path.clone())
            .collect();
        for path in &due {
            self.last_seen.remove(path);
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const WAIT: Duration = Duration::from_secs(5);

    fn registry() -> WatchRegistry {
        WatchRegistry::new(&WatchConfig::default()).unwrap()
    }

    fn attach(registry: &WatchRegistry) -> (SessionId, Receiver<ChangeNotification>) {
        let session = SessionId::new();
        registry.open_session(&session);
        let (tx, rx) = mpsc::channel();
        registry.subscribe(&session, tx);
        (session, rx)
    }

    fn drain(rx: &Receiver<ChangeNotification>) {
        while rx.recv_timeout(Duration::from_millis(200)).is_ok() {}
    }

    #[test]
    fn test_session_id_parse() {
        let id = SessionId::new();
        assert_eq!(SessionId::parse(id.as_str()), Some(id));
        assert_eq!(SessionId::parse("not-a-uuid"), None);
    }

    #[test]
    fn test_is_change_ignores_plain_access() {
        assert!(!is_change(&EventKind::Access(AccessKind::Read)));
        assert!(is_change(&EventKind::Access(AccessKind::Close(
            AccessMode::Write
        ))));
        assert!(is_change(&EventKind::Any));
    }

    #[test]
    fn test_debouncer_waits_for_quiet_window() {
        let mut debouncer = Debouncer::new(Duration::from_millis(100));
        let start = Instant::now();
        debouncer.record(PathBuf::from("/a"), start);
        debouncer.record(PathBuf::from("/a"), start + Duration::from_millis(60));

        assert!(debouncer
            .take_due(start + Duration::from_millis(120))
            .is_empty());
        assert_eq!(
            debouncer.next_deadline(),
            Some(start + Duration::from_millis(160))
        );
        assert_eq!(
            debouncer.take_due(start + Duration::from_millis(160)),
            vec![PathBuf::from("/a")]
        );
        assert!(debouncer.next_deadline().is_none());
    }

    #[test]
    fn test_debouncer_survives_huge_window() {
        let mut debouncer = Debouncer::new(Duration::MAX);
        let start = Instant::now();
        debouncer.record(PathBuf::from("/a"), start);

        assert_eq!(debouncer.next_deadline(), Some(start));
        assert_eq!(debouncer.take_due(start), vec![PathBuf::from("/a")]);
    }

    #[test]
    fn test_watch_requires_open_session() {
        let registry = registry();
        let dir = TempDir::new().unwrap();
        let err = registry.watch(&SessionId::new(), dir.path()).unwrap_err();
        assert!(matches!(err, WatchError::SessionClosed(_)));
        assert!(registry.watched_paths().is_empty());
    }

    #[test]
    fn test_closed_session_cannot_watch_again() {
        let registry = registry();
        let dir = TempDir::new().unwrap();
        let (session, _rx) = attach(&registry);
        registry.close_session(&session);

        let err = registry.watch(&session, dir.path()).unwrap_err();
        assert!(matches!(err, WatchError::SessionClosed(_)));
        assert!(!registry.is_watched(dir.path()));

        // A late sink for the closed session is not kept either
        let (tx, rx) = mpsc::channel();
        registry.subscribe(&session, tx);
        assert!(matches!(
            rx.recv_timeout(Duration::from_millis(50)),
            Err(RecvTimeoutError::Disconnected)
        ));
    }

    #[test]
    fn test_watch_rejects_missing_directory() {
        let registry = registry();
        let dir = TempDir::new().unwrap();
        let err = registry
            .watch(&SessionId::new(), &dir.path().join("missing"))
            .unwrap_err();
        assert!(matches!(err, WatchError::NotADirectory(_)));
        assert!(registry.watched_paths().is_empty());
    }

    #[test]
    fn test_notifies_on_new_file() {
        let registry = registry();
        let dir = TempDir::new().unwrap();
        let (session, rx) = attach(&registry);

        registry.watch(&session, dir.path()).unwrap();
        std::fs::write(dir.path().join("new.txt"), "hi").unwrap();

        let n = rx.recv_timeout(WAIT).expect("no change notification");
        assert_eq!(n.path, dir.path());
    }

    #[test]
    fn test_double_watch_keeps_one_registration() {
        let registry = registry();
        let dir = TempDir::new().unwrap();
        let (session, rx) = attach(&registry);

        registry.watch(&session, dir.path()).unwrap();
        registry.watch(&session, dir.path()).unwrap();
        assert_eq!(registry.watched_paths(), vec![dir.path().to_path_buf()]);

        registry.unwatch(&session, dir.path());
        assert!(!registry.is_watched(dir.path()));

        drain(&rx);
        std::fs::write(dir.path().join("after.txt"), "x").unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(500)).is_err());
    }

    #[test]
    fn test_unwatch_unknown_path_is_noop() {
        let registry = registry();
        registry.unwatch(&SessionId::new(), Path::new("/never/watched"));
        assert!(registry.watched_paths().is_empty());
    }

    #[test]
    fn test_fan_out_to_every_subscriber() {
        let registry = registry();
        let dir = TempDir::new().unwrap();
        let (first, rx_first) = attach(&registry);
        let (second, rx_second) = attach(&registry);

        registry.watch(&first, dir.path()).unwrap();
        registry.watch(&second, dir.path()).unwrap();
        std::fs::write(dir.path().join("shared.txt"), "x").unwrap();

        assert!(rx_first.recv_timeout(WAIT).is_ok());
        assert!(rx_second.recv_timeout(WAIT).is_ok());
    }

    #[test]
    fn test_close_session_keeps_other_sessions_watching() {
        let registry = registry();
        let dir_a = TempDir::new().unwrap();
        let dir_b = TempDir::new().unwrap();
        let (leaving, _rx_leaving) = attach(&registry);
        let (staying, rx_staying) = attach(&registry);

        registry.watch(&leaving, dir_a.path()).unwrap();
        registry.watch(&leaving, dir_b.path()).unwrap();
        registry.watch(&staying, dir_b.path()).unwrap();

        registry.close_session(&leaving);
        assert!(!registry.is_watched(dir_a.path()));
        assert!(registry.is_watched(dir_b.path()));

        std::fs::write(dir_b.path().join("still.txt"), "x").unwrap();
        assert!(rx_staying.recv_timeout(WAIT).is_ok());
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let registry = registry();
        let dir = TempDir::new().unwrap();
        let (session, rx) = attach(&registry);
        registry.watch(&session, dir.path()).unwrap();

        registry.shutdown();
        assert!(registry.watched_paths().is_empty());
        // Sink dropped with the registry state
        assert!(matches!(
            rx.recv_timeout(Duration::from_millis(200)),
            Err(RecvTimeoutError::Disconnected)
        ));

        let err = registry.watch(&session, dir.path()).unwrap_err();
        assert!(matches!(err, WatchError::ShutDown));

        // Second shutdown is harmless
        registry.shutdown();
    }

    #[test]
    fn test_debounced_burst_yields_one_notification() {
        let config = WatchConfig {
            debounce_ms: 300,
            ..WatchConfig::default()
        };
        let registry = WatchRegistry::new(&config).unwrap();
        let dir = TempDir::new().unwrap();
        let (session, rx) = attach(&registry);
        registry.watch(&session, dir.path()).unwrap();

        for i in 0..5 {
            std::fs::write(dir.path().join(format!("f{}.txt", i)), "x").unwrap();
        }

        assert!(rx.recv_timeout(WAIT).is_ok());
        assert!(rx.recv_timeout(Duration::from_millis(600)).is_err());
    }

    #[test]
    fn test_poll_backend_notices_changes() {
        let config = WatchConfig {
            backend: WatchBackend::Poll,
            poll_interval_ms: 50,
            ..WatchConfig::default()
        };
        let registry = WatchRegistry::new(&config).unwrap();
        let dir = TempDir::new().unwrap();
        let (session, rx) = attach(&registry);
        registry.watch(&session, dir.path()).unwrap();

        std::fs::write(dir.path().join("polled.txt"), "x").unwrap();
        assert!(rx.recv_timeout(WAIT).is_ok());
    }
}
