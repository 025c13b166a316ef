use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use llmserv::{BackendKind, CliOverrides, RemoteTransport};

fn parse_timeout(s: &str) -> Result<Duration, String> {
    let d = humantime::parse_duration(s.trim()).map_err(|e| e.to_string())?;
    if d.is_zero() {
        return Err("timeout must be greater than zero".to_string());
    }
    Ok(d)
}

fn parse_temperature(s: &str) -> Result<f64, String> {
    let t: f64 = s.trim().parse().map_err(|_| format!("not a number: {s}"))?;
    if !t.is_finite() {
        return Err("temperature must be finite".to_string());
    }
    Ok(t)
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "llmserv",
    version,
    about = "JavaScript-free HTML front end for OpenAI-compatible chat completions"
)]
pub(crate) struct Cli {
    /// Listen address (host:port)
    #[arg(long)]
    pub(crate) bind: Option<String>,

    /// Completion backend
    #[arg(long, value_enum)]
    pub(crate) backend: Option<BackendKind>,

    /// Remote API base, e.g. https://api.openai.com
    #[arg(long = "api-base")]
    pub(crate) api_base: Option<String>,

    /// Read the API key from this file (whitespace trimmed); otherwise OPENAI_API_KEY
    #[arg(long = "api-key-file")]
    pub(crate) api_key_file: Option<PathBuf>,

    /// Default model shown in the form
    #[arg(long)]
    pub(crate) model: Option<String>,

    /// Default sampling temperature (clamped to 0..2)
    #[arg(long = "temp", value_parser = parse_temperature)]
    pub(crate) temperature: Option<f64>,

    /// max_tokens sent upstream; 0 omits the field
    #[arg(long = "max-tokens")]
    pub(crate) max_tokens: Option<u32>,

    /// System message prepended to every request
    #[arg(long = "system-prompt")]
    pub(crate) system_prompt: Option<String>,

    /// Remote transport: built-in TLS client or an external curl
    #[arg(long, value_enum)]
    pub(crate) transport: Option<RemoteTransport>,

    /// curl binary for --transport curl (resolved on PATH)
    #[arg(long = "curl-path")]
    pub(crate) curl_path: Option<PathBuf>,

    /// Accept any upstream TLS certificate
    #[arg(long = "insecure-skip-verify")]
    pub(crate) insecure_skip_verify: bool,

    /// Upstream and client I/O timeout, e.g. 60s or 2m
    #[arg(long, value_parser = parse_timeout)]
    pub(crate) timeout: Option<Duration>,

    /// Refuse outbound connections; requires --pipe-command for the openai backend
    #[arg(long = "no-network")]
    pub(crate) no_network: bool,

    /// Do not install the connect(2) filter under --no-network
    #[arg(long = "no-sandbox")]
    pub(crate) no_sandbox: bool,

    /// YAML config file (default: $LLMSERV_CONFIG or ~/.llmserv.yml)
    #[arg(long)]
    pub(crate) config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub(crate) verbose: u8,

    /// TensorRT-LLM engine directory
    #[arg(long = "trtllm-engine")]
    pub(crate) trtllm_engine: Option<PathBuf>,

    /// Local command that reads request JSON on stdin and prints response JSON;
    /// everything up to a literal `--` belongs to the command
    #[arg(
        long = "pipe-command",
        visible_alias = "hme-command",
        num_args = 1..,
        allow_hyphen_values = true,
        value_terminator = "--",
        value_name = "CMD"
    )]
    pub(crate) pipe_command: Vec<String>,
}

impl Cli {
    pub(crate) fn into_overrides(self) -> CliOverrides {
        CliOverrides {
            config: self.config,
            bind: self.bind,
            backend: self.backend,
            api_base: self.api_base,
            api_key_file: self.api_key_file,
            model: self.model,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            system_prompt: self.system_prompt,
            transport: self.transport,
            curl_path: self.curl_path,
            insecure_skip_verify: self.insecure_skip_verify,
            timeout: self.timeout,
            no_network: self.no_network,
            no_sandbox: self.no_sandbox,
            pipe_command: self.pipe_command,
            trtllm_engine: self.trtllm_engine,
            verbose: self.verbose,
        }
    }
}
