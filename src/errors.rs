//! Error mapping guide:
//! - Every per-request failure is a `CompletionError` with an `ErrorKind`; it is rendered as a
//!   banner in the page and never takes the server down.
//! - Startup failures go through anyhow and map to process exit codes here.
use std::fmt;
use std::io;

/// Exit code for a failed bind/listen at startup.
pub const EXIT_BIND: u8 = 1;
/// Exit code for invalid configuration at startup (same as a usage error).
pub const EXIT_CONFIG: u8 = 2;

/// Map an io::Error to a process exit code:
/// - 127 for NotFound (a configured executable is missing)
/// - 1 for all other errors
pub fn exit_code_for_io_error(e: &io::Error) -> u8 {
    if e.kind() == io::ErrorKind::NotFound {
        127
    } else {
        EXIT_BIND
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing base URL/credential, or a backend that is not built in.
    Config,
    /// Outbound networking disabled and no local executable configured.
    Policy,
    /// Connect/handshake/spawn/write/read failure.
    Transport,
    /// Non-success status or unparsable reply from the backend.
    Upstream,
    /// Malformed or oversized request from the local client.
    Protocol,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Config => "config",
            ErrorKind::Policy => "policy",
            ErrorKind::Transport => "transport",
            ErrorKind::Upstream => "upstream",
            ErrorKind::Protocol => "protocol",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionError {
    pub kind: ErrorKind,
    pub message: String,
}

impl CompletionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    /// The `NetworkDisabled` policy failure.
    pub fn network_disabled() -> Self {
        Self::new(
            ErrorKind::Policy,
            "NetworkDisabled: outbound networking is disabled and no local command is configured",
        )
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Upstream, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Protocol, message)
    }

    pub fn is_network_disabled(&self) -> bool {
        self.kind == ErrorKind::Policy && self.message.starts_with("NetworkDisabled")
    }
}

impl fmt::Display for CompletionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error: {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for CompletionError {}

impl From<crate::util::exec::ExecError> for CompletionError {
    fn from(e: crate::util::exec::ExecError) -> Self {
        CompletionError::transport(e.to_string())
    }
}

/// Render the user-facing banner text for a failed completion (not yet HTML-escaped).
pub fn display_for_completion_error(e: &CompletionError) -> String {
    format!("Error ({}): {}", e.kind.as_str(), e.message)
}

/// Result of one completion attempt: the assistant text or a classified error.
pub type CompletionResult = Result<String, CompletionError>;
