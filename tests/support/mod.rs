/*!
Test support helpers shared across integration tests.

- TestServer: a live llmserv instance on an ephemeral port; stopped on drop
- roundtrip/get/post_form: raw HTTP/1.1 over std TcpStream
- Canned: a Transport returning a fixed result and recording what it was sent
- MockUpstream: a one-connection-per-reply HTTP server standing in for the remote API,
  optionally sending its reply one byte at a time
- write_script: executable shell script in a temp dir (unix)
*/
#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use llmserv::{
    App, BackendKind, CompletionRequest, CompletionResult, Gateway, NetworkPolicy, ServerConfig,
    Transport,
};

pub struct TestServer {
    pub addr: SocketAddr,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TestServer {
    pub fn start<T: Transport + 'static>(app: App<T>) -> TestServer {
        let (addr, running, handle) =
            llmserv::start_server(Arc::new(app), "127.0.0.1:0").expect("start server");
        TestServer {
            addr,
            running,
            handle: Some(handle),
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

/// Send raw bytes, read until the server closes.
pub fn roundtrip(addr: SocketAddr, raw: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .expect("timeout");
    stream.write_all(raw).expect("write");
    let mut buf = Vec::new();
    let _ = stream.read_to_end(&mut buf);
    String::from_utf8_lossy(&buf).to_string()
}

pub fn get(addr: SocketAddr, path: &str) -> String {
    roundtrip(
        addr,
        format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n").as_bytes(),
    )
}

pub fn post_form(addr: SocketAddr, path: &str, body: &str) -> String {
    roundtrip(
        addr,
        format!(
            "POST {path} HTTP/1.1\r\nHost: localhost\r\n\
             Content-Type: application/x-www-form-urlencoded\r\n\
             Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )
        .as_bytes(),
    )
}

/// Split a response into (status, lowercased head, body).
pub fn split_response(resp: &str) -> (u16, String, String) {
    let (head, body) = resp.split_once("\r\n\r\n").unwrap_or((resp, ""));
    let status = head
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    (status, head.to_ascii_lowercase(), body.to_string())
}

/// Decode the hidden history textarea the way a browser would (one leading newline dropped).
pub fn history_field(page: &str) -> String {
    let start_tag = "<textarea name=history style=\"display:none\">";
    let start = page.find(start_tag).expect("history textarea") + start_tag.len();
    let rest = &page[start..];
    let end = rest.find("</textarea>").expect("textarea end");
    let raw = rest[..end].strip_prefix('\n').unwrap_or(&rest[..end]);
    raw.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

pub type Seen = Arc<Mutex<Vec<CompletionRequest>>>;

pub struct Canned {
    pub reply: CompletionResult,
    pub seen: Seen,
}

impl Canned {
    pub fn new(reply: CompletionResult) -> (Canned, Seen) {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        (
            Canned {
                reply,
                seen: seen.clone(),
            },
            seen,
        )
    }
}

impl Transport for Canned {
    fn name(&self) -> &'static str {
        "canned"
    }
    fn complete(&self, req: &CompletionRequest) -> CompletionResult {
        self.seen.lock().unwrap().push(req.clone());
        self.reply.clone()
    }
}

/// App whose gateway uses `transport` as the local command.
pub fn canned_app(cfg: ServerConfig, reply: CompletionResult) -> (App<Canned>, Seen) {
    let (canned, seen) = Canned::new(reply);
    let app = App::new(
        Arc::new(cfg),
        Gateway::new(BackendKind::OpenAi, NetworkPolicy::Allow, Some(canned), None),
    );
    (app, seen)
}

/// Serves one canned raw reply per accepted connection and hands back each request.
pub struct MockUpstream {
    pub addr: SocketAddr,
    pub requests: mpsc::Receiver<Vec<u8>>,
    handle: Option<JoinHandle<()>>,
}

impl MockUpstream {
    pub fn start(replies: Vec<Vec<u8>>) -> MockUpstream {
        Self::spawn(replies, None)
    }

    /// Like `start`, but each reply goes out one byte per `every`.
    pub fn dripping(reply: Vec<u8>, every: Duration) -> MockUpstream {
        Self::spawn(vec![reply], Some(every))
    }

    fn spawn(replies: Vec<Vec<u8>>, every: Option<Duration>) -> MockUpstream {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock");
        let addr = listener.local_addr().expect("mock addr");
        let (tx, rx) = mpsc::channel();
        let handle = std::thread::spawn(move || {
            for reply in replies {
                let Ok((mut s, _)) = listener.accept() else {
                    return;
                };
                let _ = s.set_read_timeout(Some(Duration::from_secs(10)));
                let req = read_request(&mut s);
                let _ = tx.send(req);
                match every {
                    None => {
                        let _ = s.write_all(&reply);
                        let _ = s.flush();
                    }
                    Some(every) => {
                        for b in &reply {
                            if s.write_all(std::slice::from_ref(b)).is_err() {
                                break;
                            }
                            std::thread::sleep(every);
                        }
                    }
                }
            }
        });
        MockUpstream {
            addr,
            requests: rx,
            handle: Some(handle),
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn next_request(&self) -> String {
        let raw = self
            .requests
            .recv_timeout(Duration::from_secs(10))
            .expect("upstream saw no request");
        String::from_utf8_lossy(&raw).to_string()
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        if let Some(h) = self.handle.take() {
            if h.is_finished() {
                let _ = h.join();
            }
        }
    }
}

fn read_request(s: &mut TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 4096];
    loop {
        if let Some(end) = find(&buf, b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
            let len = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + len {
                return buf;
            }
        }
        match s.read(&mut tmp) {
            Ok(0) | Err(_) => return buf,
            Ok(n) => buf.extend_from_slice(&tmp[..n]),
        }
    }
}

fn find(hay: &[u8], needle: &[u8]) -> Option<usize> {
    hay.windows(needle.len()).position(|w| w == needle)
}

/// Plain HTTP reply with a JSON body.
pub fn json_reply(status: &str, body: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
    .into_bytes()
}

/// Body of a raw HTTP request (after the blank line).
pub fn request_body(raw: &str) -> &str {
    raw.split_once("\r\n\r\n").map(|(_, b)| b).unwrap_or("")
}

/// Write an executable `#!/bin/sh` script.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    let mut perms = std::fs::metadata(&path).expect("stat script").permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).expect("chmod script");
    path
}
