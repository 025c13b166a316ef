//! HTTP front end: accept loop, one thread per connection, one request per connection.

pub mod form;
pub mod http;
pub mod render;
pub mod router;

pub use form::FormData;
pub use http::{read_http_request, HttpRequest, Method, RequestError, Response, MAX_HEAD, MAX_REQ_BODY};
pub use render::{html_response, render_page, PageView, CSP};
pub use router::{classify_route, App, Route};

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::backend::Transport;
use crate::util::{read_before, Deadline};

const ACCEPT_IDLE: Duration = Duration::from_millis(50);
const LINGER: Duration = Duration::from_millis(200);
const LINGER_BYTES: usize = 256 * 1024;

/// Bind `bind` and serve `app` on a background thread.
///
/// Returns the bound address, a run flag (store `false` to stop accepting) and the
/// accept thread handle. In-flight connections finish on their own threads.
pub fn start_server<T: Transport + 'static>(
    app: Arc<App<T>>,
    bind: &str,
) -> io::Result<(SocketAddr, Arc<AtomicBool>, JoinHandle<()>)> {
    let listener = TcpListener::bind(bind)
        .map_err(|e| io::Error::new(e.kind(), format!("bind {bind} failed: {e}")))?;
    let addr = listener.local_addr()?;
    listener.set_nonblocking(true)?;

    let running = Arc::new(AtomicBool::new(true));
    let running_cl = running.clone();
    let handle = std::thread::spawn(move || {
        tracing::debug!(%addr, "accept loop started");
        while running_cl.load(Ordering::SeqCst) {
            let (stream, peer) = match listener.accept() {
                Ok(pair) => pair,
                Err(e) => {
                    if e.kind() != io::ErrorKind::WouldBlock {
                        tracing::warn!(error = %e, "accept failed");
                    }
                    std::thread::sleep(ACCEPT_IDLE);
                    continue;
                }
            };
            let app = app.clone();
            let spawned = std::thread::Builder::new()
                .name("llmserv-conn".into())
                .spawn(move || serve_connection(&app, stream, peer));
            if let Err(e) = spawned {
                tracing::error!(error = %e, %peer, "could not spawn connection thread");
            }
        }
        tracing::debug!("accept loop stopped");
    });
    Ok((addr, running, handle))
}

fn serve_connection<T: Transport>(app: &App<T>, mut stream: TcpStream, peer: SocketAddr) {
    let started = Instant::now();
    let _ = stream.set_nonblocking(false);
    let timeout = app.config().io_timeout;
    let _ = stream.set_write_timeout(Some(timeout));

    let mut rejected = false;
    let (method, path, resp) = match read_http_request(&mut stream, &Deadline::after(timeout)) {
        Ok(req) => {
            let resp = app.handle(&req);
            (req.method.as_str().to_string(), req.path.clone(), resp)
        }
        Err(e) => match e.response() {
            Some(resp) => {
                tracing::debug!(%peer, error = %e, "rejecting request");
                rejected = true;
                ("-".to_string(), "-".to_string(), resp)
            }
            None => {
                tracing::debug!(%peer, error = %e, "connection dropped");
                return;
            }
        },
    };

    let status = resp.status;
    if let Err(e) = resp.write_to(&mut stream) {
        tracing::debug!(%peer, error = %e, "response write failed");
    }
    let _ = stream.shutdown(std::net::Shutdown::Write);
    if rejected {
        drain_briefly(&mut stream);
    }
    tracing::info!(
        %peer,
        method = %method,
        path = %path,
        status,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request"
    );
}

/// Swallow what the peer is still sending so closing does not reset the connection
/// before it has read our error response. Bounded in both bytes and time.
fn drain_briefly(stream: &mut TcpStream) {
    let linger = Deadline::after(LINGER);
    let mut tmp = [0u8; 8192];
    let mut total = 0usize;
    while total < LINGER_BYTES {
        match read_before(stream, &mut tmp, &linger) {
            Ok(0) | Err(_) => break,
            Ok(n) => total += n,
        }
    }
}
