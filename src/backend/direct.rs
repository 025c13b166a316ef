/*!
Direct socket transport: one HTTP/1.1 POST per completion, over rustls for `https`
bases and plaintext for `http` bases.

The request always carries `Connection: close`, so the reply is read until the peer
closes (or the ceiling is hit, after which the rest is drained and dropped). The
configured timeout is one deadline for the whole exchange: connect, handshake, write and
every read share it. Certificate verification uses the bundled webpki roots unless the
operator opted out.
*/

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{ring, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, ClientConnection, DigitallySignedStruct, RootCertStore, SignatureScheme, StreamOwned};

use super::endpoint::{Endpoint, Scheme};
use super::{CompletionRequest, Transport, MAX_RESP_BODY};
use crate::errors::{CompletionError, CompletionResult};
use crate::json::{encode_request, extract_content};
use crate::util::{
    find_header_end, preview, read_before, write_all_before, Deadline, SocketTimeouts, TextBuf,
};

/// Certificate trust decision for `https` bases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsTrust {
    /// Verify the chain against the bundled webpki roots.
    #[default]
    Verify,
    /// Accept any certificate. Operator opt-in only.
    InsecureSkipVerify,
}

pub struct DirectSocket {
    endpoint: Endpoint,
    api_key: String,
    trust: TlsTrust,
    timeout: Duration,
}

impl fmt::Debug for DirectSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectSocket")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .field("trust", &self.trust)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl DirectSocket {
    pub fn new(endpoint: Endpoint, api_key: String, trust: TlsTrust, timeout: Duration) -> Self {
        Self {
            endpoint,
            api_key,
            trust,
            timeout,
        }
    }

    fn build_request(&self, payload: &str) -> Vec<u8> {
        let mut req = TextBuf::with_capacity(payload.len() + 512);
        req.push_str(&format!(
            "POST {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\
             Content-Type: application/json\r\nAccept: application/json\r\n\
             Accept-Encoding: identity\r\nAuthorization: Bearer {}\r\n\
             Content-Length: {}\r\n\r\n",
            self.endpoint.path,
            self.endpoint.host_header(),
            self.api_key,
            payload.len()
        ));
        req.push_str(payload);
        req.take()
    }

    fn connect(&self, deadline: &Deadline) -> Result<TcpStream, CompletionError> {
        let addrs = (self.endpoint.host.as_str(), self.endpoint.port)
            .to_socket_addrs()
            .map_err(|e| {
                CompletionError::transport(format!(
                    "cannot resolve {}: {e}",
                    self.endpoint.host
                ))
            })?;
        let mut last_err: Option<io::Error> = None;
        for addr in addrs {
            let Some(left) = deadline.remaining() else {
                return Err(CompletionError::transport(deadline.expired_error().to_string()));
            };
            match TcpStream::connect_timeout(&addr, left) {
                Ok(stream) => {
                    let _ = stream.set_nodelay(true);
                    tracing::debug!(peer = %addr, "connected to api base");
                    return Ok(stream);
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(CompletionError::transport(match last_err {
            Some(e) => format!("connect to {}:{} failed: {e}", self.endpoint.host, self.endpoint.port),
            None => format!("no addresses for {}", self.endpoint.host),
        }))
    }

    /// Send the request and collect the raw reply (status line, headers, body).
    fn exchange(&self, request: &[u8], deadline: &Deadline) -> Result<TextBuf, CompletionError> {
        let tcp = self.connect(deadline)?;
        match self.endpoint.scheme {
            Scheme::Http => {
                let mut stream = tcp;
                write_and_read(&mut stream, request, deadline)
            }
            Scheme::Https => {
                let config = tls_config(self.trust)?;
                let server_name = ServerName::try_from(self.endpoint.host.clone()).map_err(|e| {
                    CompletionError::config(format!(
                        "invalid TLS server name '{}': {e}",
                        self.endpoint.host
                    ))
                })?;
                let conn = ClientConnection::new(config, server_name)
                    .map_err(|e| CompletionError::transport(format!("TLS setup failed: {e}")))?;
                let mut stream = StreamOwned::new(conn, tcp);
                write_and_read(&mut stream, request, deadline)
            }
        }
    }
}

impl Transport for DirectSocket {
    fn name(&self) -> &'static str {
        "direct-socket"
    }

    fn complete(&self, req: &CompletionRequest) -> CompletionResult {
        let payload = encode_request(req);
        let request = self.build_request(&payload);
        let deadline = Deadline::after(self.timeout);
        let raw = self.exchange(&request, &deadline)?;
        if raw.truncated() {
            tracing::warn!(limit = MAX_RESP_BODY, "upstream reply exceeded ceiling; excess dropped");
        }
        let reply = parse_response(raw.as_bytes())?;
        let text = String::from_utf8_lossy(&reply.body);
        if !(200..300).contains(&reply.status) {
            return Err(CompletionError::upstream(format!(
                "HTTP {}: {}",
                reply.status,
                preview(text.trim(), 200)
            )));
        }
        extract_content(&text)
            .ok_or_else(|| CompletionError::upstream("bad JSON or missing content"))
    }
}

fn write_and_read<S: Read + Write + SocketTimeouts>(
    stream: &mut S,
    request: &[u8],
    deadline: &Deadline,
) -> Result<TextBuf, CompletionError> {
    write_all_before(stream, request, deadline).map_err(|e| match e.kind() {
        io::ErrorKind::TimedOut => CompletionError::transport(e.to_string()),
        _ => CompletionError::transport(format!("write failed: {e}")),
    })?;

    let mut out = TextBuf::with_limit(MAX_RESP_BODY);
    let mut tmp = [0u8; 8192];
    loop {
        match read_before(stream, &mut tmp, deadline) {
            Ok(0) => break,
            Ok(n) => out.push_bytes(&tmp[..n]),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                tracing::debug!(bytes = out.len(), "upstream reply did not finish in time");
                return Err(CompletionError::transport(e.to_string()));
            }
            // Peers that close without close_notify.
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => {
                if out.is_empty() {
                    return Err(CompletionError::transport(format!("read failed: {e}")));
                }
                tracing::debug!(error = %e, bytes = out.len(), "read ended early; using partial reply");
                break;
            }
        }
    }
    if out.is_empty() {
        return Err(CompletionError::transport("connection closed without a reply"));
    }
    Ok(out)
}

#[derive(Debug)]
pub(crate) struct RawReply {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Split a raw HTTP/1.x reply at the first blank line and de-chunk the body if needed.
pub(crate) fn parse_response(raw: &[u8]) -> Result<RawReply, CompletionError> {
    let end = find_header_end(raw)
        .ok_or_else(|| CompletionError::upstream("malformed HTTP reply (no header terminator)"))?;
    let head = String::from_utf8_lossy(&raw[..end]);
    let mut lines = head.lines();
    let status_line = lines.next().unwrap_or_default();
    let mut parts = status_line.split_whitespace();
    let version = parts.next().unwrap_or_default();
    let status = parts
        .next()
        .and_then(|s| s.parse::<u16>().ok())
        .filter(|_| version.starts_with("HTTP/"))
        .ok_or_else(|| {
            CompletionError::upstream(format!(
                "malformed HTTP status line: {}",
                preview(status_line, 80)
            ))
        })?;

    let chunked = lines.any(|l| {
        l.split_once(':').is_some_and(|(k, v)| {
            k.trim().eq_ignore_ascii_case("transfer-encoding")
                && v.to_ascii_lowercase().contains("chunked")
        })
    });
    let body = if chunked {
        dechunk(&raw[end..])
    } else {
        raw[end..].to_vec()
    };
    Ok(RawReply { status, body })
}

/// Decode a chunked body held fully in memory. Stops at the zero-size chunk or at the
/// first size line that does not parse; a short final chunk keeps what arrived.
pub(crate) fn dechunk(mut rest: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(rest.len());
    loop {
        let Some(nl) = rest.iter().position(|&b| b == b'\n') else {
            break;
        };
        let line = String::from_utf8_lossy(&rest[..nl]);
        let line = line.trim();
        rest = &rest[nl + 1..];
        if line.is_empty() {
            continue;
        }
        let size_hex = line.split(';').next().unwrap_or(line).trim();
        let size = match usize::from_str_radix(size_hex, 16) {
            Ok(v) => v,
            Err(_) => break,
        };
        if size == 0 {
            break;
        }
        let take = size.min(rest.len());
        out.extend_from_slice(&rest[..take]);
        rest = &rest[take..];
        if rest.starts_with(b"\r\n") {
            rest = &rest[2..];
        } else if rest.starts_with(b"\n") {
            rest = &rest[1..];
        }
    }
    out
}

fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(ring::default_provider())
}

static VERIFYING: OnceCell<Arc<ClientConfig>> = OnceCell::new();
static SKIP_VERIFY: OnceCell<Arc<ClientConfig>> = OnceCell::new();

fn tls_config(trust: TlsTrust) -> Result<Arc<ClientConfig>, CompletionError> {
    let cell = match trust {
        TlsTrust::Verify => &VERIFYING,
        TlsTrust::InsecureSkipVerify => &SKIP_VERIFY,
    };
    cell.get_or_try_init(|| build_tls_config(trust)).cloned()
}

fn build_tls_config(trust: TlsTrust) -> Result<Arc<ClientConfig>, CompletionError> {
    let provider = crypto_provider();
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| CompletionError::config(format!("TLS configuration failed: {e}")))?;
    let config = match trust {
        TlsTrust::Verify => {
            let roots = RootCertStore {
                roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
            };
            builder.with_root_certificates(roots).with_no_client_auth()
        }
        TlsTrust::InsecureSkipVerify => builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCert(provider)))
            .with_no_client_auth(),
    };
    Ok(Arc::new(config))
}

/// Skips chain and name checks; handshake signatures are still verified.
#[derive(Debug)]
struct AcceptAnyCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain_reply() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\r\n{\"content\":\"x\"}";
        let r = parse_response(raw).unwrap();
        assert_eq!(r.status, 200);
        assert_eq!(r.body, b"{\"content\":\"x\"}".to_vec());
    }

    #[test]
    fn parse_chunked_reply() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\n{\"con\r\na;ext=1\r\ntent\":\"y\"}\r\n0\r\n\r\n";
        let r = parse_response(raw).unwrap();
        assert_eq!(String::from_utf8(r.body).unwrap(), "{\"content\":\"y\"}");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_response(b"hello").is_err());
        assert!(parse_response(b"SMTP 220\r\n\r\n").is_err());
    }

    #[test]
    fn request_head_shape() {
        let ep = Endpoint::parse("http://127.0.0.1:9/v1").unwrap();
        let t = DirectSocket::new(ep, "sk-test".into(), TlsTrust::Verify, Duration::from_secs(1));
        let req = String::from_utf8(t.build_request("{}")).unwrap();
        assert!(req.starts_with("POST /v1/chat/completions HTTP/1.1\r\nHost: 127.0.0.1:9\r\n"));
        assert!(req.contains("\r\nAuthorization: Bearer sk-test\r\n"));
        assert!(req.contains("\r\nAccept-Encoding: identity\r\n"));
        assert!(req.ends_with("Content-Length: 2\r\n\r\n{}"));
    }

    #[test]
    fn debug_redacts_key() {
        let ep = Endpoint::parse("https://api.openai.com").unwrap();
        let t = DirectSocket::new(ep, "sk-secret".into(), TlsTrust::Verify, Duration::from_secs(1));
        assert!(!format!("{t:?}").contains("sk-secret"));
    }

    #[test]
    fn tls_configs_build() {
        assert!(tls_config(TlsTrust::Verify).is_ok());
        assert!(tls_config(TlsTrust::InsecureSkipVerify).is_ok());
    }
}
