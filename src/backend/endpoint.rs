//! API base URL handling: scheme, authority and the chat-completions path.

use url::{Host, Url};

use crate::errors::CompletionError;

const COMPLETIONS: &str = "/chat/completions";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }
}

/// Where the direct socket transport connects and what it asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub scheme: Scheme,
    /// Host without IPv6 brackets; used for DNS/connect and TLS server name.
    pub host: String,
    pub port: u16,
    /// Request target, e.g. `/v1/chat/completions`.
    pub path: String,
    ipv6: bool,
}

impl Endpoint {
    pub fn parse(api_base: &str) -> Result<Endpoint, CompletionError> {
        let url = Url::parse(api_base.trim())
            .map_err(|e| CompletionError::config(format!("invalid api base '{api_base}': {e}")))?;
        let scheme = match url.scheme() {
            "https" => Scheme::Https,
            "http" => Scheme::Http,
            other => {
                return Err(CompletionError::config(format!(
                    "unsupported api base scheme '{other}' (use http or https)"
                )))
            }
        };
        let (host, ipv6) = match url.host() {
            Some(Host::Domain(d)) => (d.to_string(), false),
            Some(Host::Ipv4(a)) => (a.to_string(), false),
            Some(Host::Ipv6(a)) => (a.to_string(), true),
            None => {
                return Err(CompletionError::config(format!(
                    "api base '{api_base}' has no host"
                )))
            }
        };
        let port = url.port().unwrap_or_else(|| scheme.default_port());
        Ok(Endpoint {
            scheme,
            host,
            port,
            path: completions_path(url.path()),
            ipv6,
        })
    }

    /// Value for the `Host` header; the port is omitted when it is the scheme default.
    pub fn host_header(&self) -> String {
        let host = if self.ipv6 {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        if self.port == self.scheme.default_port() {
            host
        } else {
            format!("{host}:{}", self.port)
        }
    }
}

/// Append the completions route to a base path. A base that already ends in `/v1`
/// only gets `/chat/completions`.
pub fn completions_path(base_path: &str) -> String {
    let trimmed = base_path.trim_end_matches('/');
    if trimmed.ends_with("/v1") {
        format!("{trimmed}{COMPLETIONS}")
    } else {
        format!("{trimmed}/v1{COMPLETIONS}")
    }
}

/// Full completions URL for transports that take a URL (curl).
pub fn completions_url(api_base: &str) -> String {
    completions_path(api_base.trim())
}
