/*!
HTTP/1.1 request parsing and response writing for the served surface.

One request per connection. The head is capped at 64 KiB and may end with CRLFCRLF or
LFLF. The body is read by `Content-Length` only; a declared length over the body cap is
rejected before any of the body is read. Chunked request bodies are refused. The whole
request, head and body, must arrive before one deadline. Paths match case-sensitively.
*/

use std::collections::HashMap;
use std::fmt;
use std::io::{self, Read, Write};
use std::time::Duration;

use crate::errors::{display_for_completion_error, CompletionError};
use crate::util::{find_header_end, read_before, Deadline, SocketTimeouts};

pub const MAX_HEAD: usize = 64 * 1024;
pub const MAX_REQ_BODY: usize = 256 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Other(String),
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Other(s) => s.as_str(),
        }
    }
}

/// Header names lowercased.
pub type HeaderMap = HashMap<String, String>;

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    /// Path without the query string.
    pub path: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

#[derive(Debug)]
pub enum RequestError {
    /// Peer closed before sending anything.
    Empty,
    Malformed(String),
    TooLarge(usize),
    /// The request did not arrive completely before the read deadline.
    TimedOut(Duration),
    Io(io::Error),
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::Empty => write!(f, "connection closed before request"),
            RequestError::Malformed(m) => write!(f, "malformed request: {m}"),
            RequestError::TooLarge(n) => write!(f, "request body of {n} bytes exceeds {MAX_REQ_BODY}"),
            RequestError::TimedOut(d) => write!(
                f,
                "request not received within {}",
                humantime::format_duration(*d)
            ),
            RequestError::Io(e) => write!(f, "read failed: {e}"),
        }
    }
}

impl std::error::Error for RequestError {}

impl From<io::Error> for RequestError {
    fn from(e: io::Error) -> Self {
        RequestError::Io(e)
    }
}

impl RequestError {
    /// The client's fault as a `Protocol` error, or `None` when the peer just went away.
    pub fn to_completion_error(&self) -> Option<CompletionError> {
        match self {
            RequestError::Empty | RequestError::Io(_) => None,
            RequestError::Malformed(m) => Some(CompletionError::protocol(m.clone())),
            RequestError::TooLarge(_) | RequestError::TimedOut(_) => {
                Some(CompletionError::protocol(self.to_string()))
            }
        }
    }

    /// Status to answer with, if the peer is still worth answering.
    pub fn response(&self) -> Option<Response> {
        let err = self.to_completion_error()?;
        let (status, reason) = match self {
            RequestError::TooLarge(_) => (413, "Payload Too Large"),
            RequestError::TimedOut(_) => (408, "Request Timeout"),
            _ => (400, "Bad Request"),
        };
        Some(Response::text(
            status,
            reason,
            format!("{}\n", display_for_completion_error(&err)),
        ))
    }
}

fn read_some<R: Read + SocketTimeouts>(
    reader: &mut R,
    buf: &mut [u8],
    deadline: &Deadline,
) -> Result<usize, RequestError> {
    read_before(reader, buf, deadline).map_err(|e| match e.kind() {
        io::ErrorKind::TimedOut => RequestError::TimedOut(deadline.budget()),
        _ => RequestError::Io(e),
    })
}

/// Read and parse a single request; all of it must arrive before `deadline`.
pub fn read_http_request<R: Read + SocketTimeouts>(
    reader: &mut R,
    deadline: &Deadline,
) -> Result<HttpRequest, RequestError> {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 4096];
    let header_end = loop {
        if let Some(end) = find_header_end(&buf) {
            break end;
        }
        if buf.len() >= MAX_HEAD {
            return Err(RequestError::Malformed("request head too large".into()));
        }
        let n = read_some(reader, &mut tmp, deadline)?;
        if n == 0 {
            if buf.is_empty() {
                return Err(RequestError::Empty);
            }
            return Err(RequestError::Malformed("incomplete request head".into()));
        }
        buf.extend_from_slice(&tmp[..n]);
    };
    if header_end > MAX_HEAD {
        return Err(RequestError::Malformed("request head too large".into()));
    }

    let head = String::from_utf8_lossy(&buf[..header_end]);
    let mut lines = head.lines();
    let request_line = lines.next().unwrap_or_default().trim();
    let (method, path) = parse_request_line(request_line)?;
    let headers = parse_headers(lines);

    if headers
        .get("transfer-encoding")
        .is_some_and(|te| te.to_ascii_lowercase().contains("chunked"))
    {
        return Err(RequestError::Malformed(
            "chunked request bodies are not supported".into(),
        ));
    }

    let content_len = match headers.get("content-length") {
        Some(v) => v
            .trim()
            .parse::<usize>()
            .map_err(|_| RequestError::Malformed("invalid Content-Length".into()))?,
        None => 0,
    };
    if content_len > MAX_REQ_BODY {
        return Err(RequestError::TooLarge(content_len));
    }

    let mut body: Vec<u8> = buf[header_end..].iter().copied().take(content_len).collect();
    while body.len() < content_len {
        let want = (content_len - body.len()).min(tmp.len());
        let n = read_some(reader, &mut tmp[..want], deadline)?;
        if n == 0 {
            return Err(RequestError::Malformed("request body shorter than Content-Length".into()));
        }
        body.extend_from_slice(&tmp[..n]);
    }

    Ok(HttpRequest {
        method,
        path,
        headers,
        body,
    })
}

fn parse_headers<'a, I: Iterator<Item = &'a str>>(lines: I) -> HeaderMap {
    let mut map = HeaderMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            map.insert(k.trim().to_ascii_lowercase(), v.trim().to_string());
        }
    }
    map
}

fn parse_request_line(request_line: &str) -> Result<(Method, String), RequestError> {
    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(RequestError::Malformed("bad request line".into()));
    };
    if !version.starts_with("HTTP/1.") || !target.starts_with('/') {
        return Err(RequestError::Malformed("bad request line".into()));
    }
    let method = match method {
        "GET" => Method::Get,
        "POST" => Method::Post,
        other => Method::Other(other.to_string()),
    };
    let path = target.split_once('?').map_or(target, |(p, _)| p);
    Ok((method, path.to_string()))
}

/// A complete response; `Content-Length` and `Connection: close` are added on write.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub reason: &'static str,
    pub headers: Vec<(&'static str, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16, reason: &'static str) -> Self {
        Self {
            status,
            reason,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn text(status: u16, reason: &'static str, body: String) -> Self {
        Self::new(status, reason)
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(body.into_bytes())
    }

    pub fn not_found() -> Self {
        Self::text(404, "Not Found", "not found\n".to_string())
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let mut head = format!("HTTP/1.1 {} {}\r\n", self.status, self.reason);
        for (k, v) in &self.headers {
            head.push_str(k);
            head.push_str(": ");
            head.push_str(v);
            head.push_str("\r\n");
        }
        head.push_str(&format!(
            "Content-Length: {}\r\nConnection: close\r\n\r\n",
            self.body.len()
        ));
        w.write_all(head.as_bytes())?;
        w.write_all(&self.body)?;
        w.flush()
    }
}
