//! Newline-delimited JSON transport over stdin/stdout
//!
//! For a UI that spawns the host as a child process. One session per
//! process: requests arrive one per line, responses and change events go
//! out one per line, tagged with `"type"`. End of input means the UI is
//! closing.

use crate::bridge::Bridge;
use crate::protocol::{self, ErrorBody, Outbound, Response};
use crate::watch::SessionId;
use std::io::{self, BufRead, Write};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

type SharedWriter<W> = Arc<Mutex<W>>;

/// Serve one session until `input` hits end of file
///
/// Each request runs on its own thread, so a slow call never holds up the
/// next line. Returns after every in-flight request has been answered and
/// the session's watches have been released.
pub fn run<R, W>(bridge: Arc<Bridge>, input: R, output: W) -> io::Result<()>
where
    R: BufRead,
    W: Write + Send + 'static,
{
    let out: SharedWriter<W> = Arc::new(Mutex::new(output));
    let session = bridge.open_session();

    let (tx, rx) = mpsc::channel();
    bridge.on_directory_changed(&session, tx);
    let forwarder = {
        let out = Arc::clone(&out);
        thread::spawn(move || {
            for notification in rx {
                if let Err(e) = write_line(&out, &Outbound::Event(notification)) {
                    log::warn!("stopped forwarding events: {}", e);
                    break;
                }
            }
        })
    };

    let mut workers: Vec<JoinHandle<()>> = Vec::new();
    let served = serve_lines(&bridge, &session, input, &out, &mut workers);

    for worker in workers {
        if worker.join().is_err() {
            log::error!("request worker panicked");
        }
    }

    // Drops the session's sink, which ends the forwarder
    bridge.close_session(&session);
    if forwarder.join().is_err() {
        log::error!("event forwarder panicked");
    }
    served
}

/// Dispatch every request line until end of input or a read failure
fn serve_lines<R, W>(
    bridge: &Arc<Bridge>,
    session: &SessionId,
    mut input: R,
    out: &SharedWriter<W>,
    workers: &mut Vec<JoinHandle<()>>,
) -> io::Result<()>
where
    R: BufRead,
    W: Write + Send + 'static,
{
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if input.read_until(b'\n', &mut buf)? == 0 {
            return Ok(());
        }

        let line = match std::str::from_utf8(&buf) {
            Ok(line) => line.trim(),
            Err(e) => {
                log::warn!("rejected request line that is not UTF-8");
                let error = ErrorBody::protocol("badRequest", format!("invalid request: {}", e));
                write_line(out, &Outbound::Response(Response::failure(0, error)))?;
                continue;
            }
        };
        if line.is_empty() {
            continue;
        }

        let request = match protocol::parse_request(line) {
            Ok(request) => request,
            Err(response) => {
                log::warn!("rejected malformed request");
                write_line(out, &Outbound::Response(response))?;
                continue;
            }
        };

        let bridge = Arc::clone(bridge);
        let session = session.clone();
        let out = Arc::clone(out);
        workers.retain(|w| !w.is_finished());
        workers.push(thread::spawn(move || {
            let response = bridge.handle(&session, &request);
            if let Err(e) = write_line(&out, &Outbound::Response(response)) {
                log::warn!("failed to write response {}: {}", request.id, e);
            }
        }));
    }
}

fn write_line<W: Write>(out: &SharedWriter<W>, message: &Outbound) -> io::Result<()> {
    let mut out = match out.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    serde_json::to_writer(&mut *out, message)?;
    out.write_all(b"\n")?;
    out.flush()
}
