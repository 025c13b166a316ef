//! `curl(1)` transport: fixed argv, no shell, request JSON on stdin.
//!
//! curl appends the HTTP status on its own line after the body (`--write-out`), so a
//! non-2xx reply is reported the same way as on the direct socket.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use super::{CompletionRequest, Transport, MAX_RESP_BODY};
use crate::errors::{CompletionError, CompletionResult};
use crate::json::{encode_request, extract_content};
use crate::util::exec::{run_piped, ExecRequest};
use crate::util::preview;

/// Extra wall-clock allowance on top of curl's own `--max-time`.
const DEADLINE_SLACK: Duration = Duration::from_secs(5);

const WRITE_OUT: &str = "\n%{http_code}";

pub struct CurlExec {
    program: PathBuf,
    url: String,
    api_key: String,
    timeout: Duration,
}

impl fmt::Debug for CurlExec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CurlExec")
            .field("program", &self.program)
            .field("url", &self.url)
            .field("api_key", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl CurlExec {
    pub fn new(program: PathBuf, url: String, api_key: String, timeout: Duration) -> Self {
        Self {
            program,
            url,
            api_key,
            timeout,
        }
    }

    /// Arguments after the program name. Contains the credential; never log it.
    pub fn argv(&self) -> Vec<String> {
        let max_time = self.timeout.as_secs().max(1).to_string();
        vec![
            "-sS".to_string(),
            "--http1.1".to_string(),
            "-X".to_string(),
            "POST".to_string(),
            "-H".to_string(),
            "Content-Type: application/json".to_string(),
            "-H".to_string(),
            "Accept: application/json".to_string(),
            "-H".to_string(),
            "Accept-Encoding: identity".to_string(),
            "-H".to_string(),
            format!("Authorization: Bearer {}", self.api_key),
            "--max-time".to_string(),
            max_time,
            "--write-out".to_string(),
            WRITE_OUT.to_string(),
            "--data-binary".to_string(),
            "@-".to_string(),
            "--url".to_string(),
            self.url.clone(),
        ]
    }
}

impl Transport for CurlExec {
    fn name(&self) -> &'static str {
        "subprocess-exec"
    }

    fn complete(&self, req: &CompletionRequest) -> CompletionResult {
        let payload = encode_request(req);
        tracing::debug!(program = %self.program.display(), url = %self.url, "invoking curl");
        let out = run_piped(
            ExecRequest::new(&self.program)
                .args(self.argv())
                .stdin(payload)
                .timeout(self.timeout + DEADLINE_SLACK)
                .stdout_limit(MAX_RESP_BODY),
        )?;
        if !out.status.success() {
            let code = out
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            return Err(CompletionError::transport(format!(
                "curl exited with status {code}: {}",
                preview(out.stderr.trim(), 200)
            )));
        }
        let stdout = String::from_utf8_lossy(&out.stdout);
        let (status, text) = split_status(&stdout);
        if let Some(status) = status.filter(|s| !(200..300).contains(s)) {
            return Err(CompletionError::upstream(format!(
                "HTTP {status}: {}",
                preview(text.trim(), 200)
            )));
        }
        extract_content(text).ok_or_else(|| {
            CompletionError::upstream(format!(
                "bad JSON or missing content: {}",
                preview(text.trim(), 200)
            ))
        })
    }
}

/// Separate the `--write-out` status line from the body. Output without a numeric
/// last line is taken as body only.
fn split_status(stdout: &str) -> (Option<u16>, &str) {
    match stdout.rsplit_once('\n') {
        Some((body, code)) => match code.trim().parse::<u16>() {
            Ok(status) => (Some(status), body),
            Err(_) => (None, stdout),
        },
        None => (None, stdout),
    }
}
