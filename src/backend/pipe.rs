//! Local pipe transport: an operator-chosen executable reads the request JSON on stdin
//! and writes an OpenAI-shaped reply on stdout, then exits.

use std::time::Duration;

use super::{CompletionRequest, Transport, MAX_RESP_BODY};
use crate::errors::{CompletionError, CompletionResult};
use crate::json::{encode_request, extract_content};
use crate::util::exec::{run_piped, ExecRequest};
use crate::util::{preview, shell_join};

#[derive(Debug, Clone)]
pub struct PipeExec {
    argv: Vec<String>,
    timeout: Duration,
}

impl PipeExec {
    pub fn new(argv: Vec<String>, timeout: Duration) -> Self {
        Self { argv, timeout }
    }

    /// Shell-quoted command line, for logs and diagnostics.
    pub fn display(&self) -> String {
        shell_join(&self.argv)
    }
}

impl Transport for PipeExec {
    fn name(&self) -> &'static str {
        "subprocess-pipe"
    }

    fn complete(&self, req: &CompletionRequest) -> CompletionResult {
        let Some((program, args)) = self.argv.split_first() else {
            return Err(CompletionError::config("local command is empty"));
        };
        let payload = encode_request(req);
        tracing::debug!(command = %self.display(), bytes = payload.len(), "invoking local command");
        let out = run_piped(
            ExecRequest::new(program)
                .args(args)
                .stdin(payload)
                .timeout(self.timeout)
                .stdout_limit(MAX_RESP_BODY),
        )?;
        if !out.status.success() {
            let code = out
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            let stderr = out.stderr.trim();
            return Err(CompletionError::transport(if stderr.is_empty() {
                format!("local command exited with status {code}")
            } else {
                format!(
                    "local command exited with status {code}: {}",
                    preview(stderr, 200)
                )
            }));
        }
        let text = String::from_utf8_lossy(&out.stdout);
        extract_content(&text)
            .ok_or_else(|| CompletionError::upstream("local command: bad JSON or missing content"))
    }
}
