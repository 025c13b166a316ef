/*!
llmserv: a JavaScript-free HTML front end for OpenAI-compatible chat completions.

Architecture
- Binary glue (src/main.rs) parses the CLI, installs logging and the sandbox, builds the
  gateway and runs the accept loop.
- server::*: HTTP/1.1 parsing, routing, form decoding and page rendering.
- backend::*: the completion request model, the gateway policy and the three transports
  (in-process socket with optional TLS, curl subprocess, local pipe command).
- conversation: the history blob carried in the form between requests.
- json: request encoding and the tolerant `content` extractor.
- util::*: bounded text buffer, escaping, subprocess execution with deadlines.

Invariants
- The server keeps no per-user state; the whole conversation rides in the form.
- Every interpolated value in the page is HTML-escaped.
- Request, response and page sizes are bounded.
- With `--no-network` the gateway never opens an outbound connection, and on Linux the
  process cannot either.
*/

pub mod backend;
pub mod config;
pub mod conversation;
pub mod errors;
pub mod json;
pub mod sandbox;
pub mod server;
pub mod telemetry;
pub mod util;

pub use backend::{
    clamp_temperature, CompletionRequest, CurlExec, DirectSocket, Endpoint, Gateway,
    NetworkPolicy, PipeExec, Scheme, Strategy, TlsTrust, Transport, MAX_RESP_BODY,
};
pub use config::{
    BackendKind, CliOverrides, CommandSpec, FileConfig, RemoteTransport, ServerConfig,
};
pub use conversation::{ChatTurn, Conversation, Role, MAX_HISTORY_BYTES, MAX_TURNS};
pub use errors::{
    display_for_completion_error, exit_code_for_io_error, CompletionError, CompletionResult,
    ErrorKind, EXIT_BIND, EXIT_CONFIG,
};
pub use sandbox::{sandbox_init, SandboxStatus};
pub use server::{start_server, App, HttpRequest, Method, Response, Route};
pub use telemetry::{log_build_info, telemetry_init};
pub use util::TextBuf;
