/*!
Backend dispatch: one `Gateway` per process, built from `ServerConfig` at startup.

The gateway owns at most two transports. A local pipe command, when configured, always
wins; otherwise the remote transport is used, subject to the outbound-network policy and
the presence of a base URL and credential. Errors pass through unchanged and nothing is
retried.
*/

pub mod curl;
pub mod direct;
pub mod endpoint;
pub mod pipe;

use std::time::Instant;

use crate::config::{BackendKind, RemoteTransport, ServerConfig};
use crate::conversation::ChatTurn;
use crate::errors::{CompletionError, CompletionResult};

pub use curl::CurlExec;
pub use direct::{DirectSocket, TlsTrust};
pub use endpoint::{Endpoint, Scheme};
pub use pipe::PipeExec;

/// Temperatures outside this range are clamped before they reach a backend.
pub const TEMPERATURE_RANGE: (f64, f64) = (0.0, 2.0);

/// Ceiling for a reply body from any transport; the rest is drained and dropped.
pub const MAX_RESP_BODY: usize = 4 * 1024 * 1024;

pub fn clamp_temperature(t: f64) -> f64 {
    if t.is_nan() {
        return TEMPERATURE_RANGE.0;
    }
    t.clamp(TEMPERATURE_RANGE.0, TEMPERATURE_RANGE.1)
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// Optional system turn, then history, then the current user turn.
    pub messages: Vec<ChatTurn>,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, temperature: f64) -> Self {
        Self {
            messages: Vec::new(),
            model: model.into(),
            temperature: clamp_temperature(temperature),
            max_tokens: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens.filter(|&n| n > 0);
        self
    }

    pub fn push(&mut self, turn: ChatTurn) {
        self.messages.push(turn);
    }
}

/// One way of turning a request into assistant text.
pub trait Transport: Send + Sync {
    /// Short stable name for logs.
    fn name(&self) -> &'static str;
    fn complete(&self, req: &CompletionRequest) -> CompletionResult;
}

/// The concrete transports, chosen once at startup.
#[derive(Debug)]
pub enum Strategy {
    DirectSocket(DirectSocket),
    SubprocessExec(CurlExec),
    SubprocessPipe(PipeExec),
}

impl Transport for Strategy {
    fn name(&self) -> &'static str {
        match self {
            Strategy::DirectSocket(t) => t.name(),
            Strategy::SubprocessExec(t) => t.name(),
            Strategy::SubprocessPipe(t) => t.name(),
        }
    }

    fn complete(&self, req: &CompletionRequest) -> CompletionResult {
        match self {
            Strategy::DirectSocket(t) => t.complete(req),
            Strategy::SubprocessExec(t) => t.complete(req),
            Strategy::SubprocessPipe(t) => t.complete(req),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkPolicy {
    Allow,
    Deny,
}

impl NetworkPolicy {
    pub fn from_no_network(no_network: bool) -> Self {
        if no_network {
            NetworkPolicy::Deny
        } else {
            NetworkPolicy::Allow
        }
    }

    pub fn allows_outbound(&self) -> bool {
        matches!(self, NetworkPolicy::Allow)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkPolicy::Allow => "allow",
            NetworkPolicy::Deny => "deny",
        }
    }
}

#[derive(Debug)]
pub struct Gateway<T: Transport = Strategy> {
    backend: BackendKind,
    network: NetworkPolicy,
    local: Option<T>,
    remote: Option<T>,
}

impl<T: Transport> Gateway<T> {
    /// `remote` is `None` when the base URL or credential is missing.
    pub fn new(
        backend: BackendKind,
        network: NetworkPolicy,
        local: Option<T>,
        remote: Option<T>,
    ) -> Self {
        Self {
            backend,
            network,
            local,
            remote,
        }
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    pub fn network(&self) -> NetworkPolicy {
        self.network
    }

    /// Name of the transport the next call would use, if any.
    pub fn selected_transport(&self) -> Option<&'static str> {
        if self.backend != BackendKind::OpenAi {
            return None;
        }
        if let Some(local) = &self.local {
            return Some(local.name());
        }
        if !self.network.allows_outbound() {
            return None;
        }
        self.remote.as_ref().map(|t| t.name())
    }

    pub fn complete(&self, req: &CompletionRequest) -> CompletionResult {
        let started = Instant::now();
        let (name, result) = self.dispatch(req);
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(text) => tracing::info!(
                transport = name,
                outcome = "ok",
                elapsed_ms,
                reply_bytes = text.len(),
                "completion finished"
            ),
            Err(e) => tracing::warn!(
                transport = name,
                outcome = e.kind.as_str(),
                elapsed_ms,
                error = %e.message,
                "completion failed"
            ),
        }
        result
    }

    fn dispatch(&self, req: &CompletionRequest) -> (&'static str, CompletionResult) {
        if self.backend == BackendKind::TrtLlm {
            return (
                "trtllm",
                Err(CompletionError::config(
                    "TRT-LLM backend not available in this build",
                )),
            );
        }
        if let Some(local) = &self.local {
            return (local.name(), local.complete(req));
        }
        if !self.network.allows_outbound() {
            return ("none", Err(CompletionError::network_disabled()));
        }
        match &self.remote {
            Some(remote) => (remote.name(), remote.complete(req)),
            None => ("none", Err(CompletionError::config("api_base/api_key missing"))),
        }
    }
}

impl Gateway<Strategy> {
    /// Build the transports named by the configuration.
    pub fn from_config(cfg: &ServerConfig) -> Gateway<Strategy> {
        let local = if cfg.pipe_command.is_empty() {
            None
        } else {
            Some(Strategy::SubprocessPipe(PipeExec::new(
                cfg.pipe_command.clone(),
                cfg.io_timeout,
            )))
        };

        let remote = match (cfg.api_base.as_deref(), cfg.api_key.as_deref()) {
            (Some(base), Some(key)) if !base.is_empty() && !key.is_empty() => {
                match cfg.remote_transport {
                    RemoteTransport::Tls => match Endpoint::parse(base) {
                        Ok(ep) => Some(Strategy::DirectSocket(DirectSocket::new(
                            ep,
                            key.to_string(),
                            cfg.tls_trust,
                            cfg.io_timeout,
                        ))),
                        Err(e) => {
                            tracing::warn!(api_base = %base, error = %e, "unusable api base; remote transport disabled");
                            None
                        }
                    },
                    RemoteTransport::Curl => Some(Strategy::SubprocessExec(CurlExec::new(
                        cfg.curl_path.clone(),
                        endpoint::completions_url(base),
                        key.to_string(),
                        cfg.io_timeout,
                    ))),
                }
            }
            _ => None,
        };

        Gateway::new(
            cfg.backend,
            NetworkPolicy::from_no_network(cfg.no_network),
            local,
            remote,
        )
    }
}
