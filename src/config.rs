/*!
Startup configuration: CLI overrides layered over an optional YAML file, then built-in
defaults. The resolved `ServerConfig` is immutable and shared by `Arc`.

API key precedence: `--api-key-file` > YAML `api_key_file` > `OPENAI_API_KEY`.
The YAML file is `--config`, else `$LLMSERV_CONFIG`, else `~/.llmserv.yml` when it exists.
*/

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use serde::Deserialize;

use crate::backend::{clamp_temperature, Endpoint, TlsTrust};
use crate::util::shell_split;

pub const DEFAULT_BIND: &str = "127.0.0.1:8080";
pub const DEFAULT_API_BASE: &str = "https://api.openai.com";
pub const DEFAULT_MODEL: &str = env!("LLMSERV_BUILD_DEFAULT_MODEL");
pub const APP_TITLE: &str = env!("LLMSERV_BUILD_APP_TITLE");
pub const DEFAULT_TEMPERATURE: f64 = 0.6;
pub const DEFAULT_MAX_TOKENS: u32 = 1024;
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(60);

pub const CONFIG_ENV: &str = "LLMSERV_CONFIG";
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";
const DEFAULT_CONFIG_FILE: &str = ".llmserv.yml";

#[derive(Copy, Clone, PartialEq, Eq, Debug, Default, clap::ValueEnum, Deserialize)]
pub enum BackendKind {
    #[default]
    #[value(name = "openai")]
    #[serde(rename = "openai")]
    OpenAi,
    #[value(name = "trtllm")]
    #[serde(rename = "trtllm")]
    TrtLlm,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::OpenAi => "openai",
            BackendKind::TrtLlm => "trtllm",
        }
    }
}

/// How the remote API is reached when no local command is configured.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default, clap::ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteTransport {
    /// In-process socket client (rustls for https).
    #[default]
    Tls,
    /// Spawn curl(1).
    Curl,
}

impl RemoteTransport {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteTransport::Tls => "tls",
            RemoteTransport::Curl => "curl",
        }
    }
}

/// A command given either as one shell-like line or as an explicit argv list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum CommandSpec {
    Line(String),
    Argv(Vec<String>),
}

impl CommandSpec {
    pub fn into_argv(self) -> Vec<String> {
        match self {
            CommandSpec::Line(s) => shell_split(&s),
            CommandSpec::Argv(v) => v,
        }
    }
}

/// On-disk YAML configuration. Every key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub bind: Option<String>,
    pub backend: Option<BackendKind>,
    pub api_base: Option<String>,
    pub api_key_file: Option<PathBuf>,
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub system_prompt: Option<String>,
    pub transport: Option<RemoteTransport>,
    pub curl_path: Option<PathBuf>,
    pub insecure_skip_verify: Option<bool>,
    /// humantime duration, e.g. `90s` or `2m`.
    pub timeout: Option<String>,
    pub no_network: Option<bool>,
    pub sandbox: Option<bool>,
    pub pipe_command: Option<CommandSpec>,
    pub trtllm_engine: Option<PathBuf>,
}

/// Values taken from the command line; `None`/`false` means "not given".
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config: Option<PathBuf>,
    pub bind: Option<String>,
    pub backend: Option<BackendKind>,
    pub api_base: Option<String>,
    pub api_key_file: Option<PathBuf>,
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub system_prompt: Option<String>,
    pub transport: Option<RemoteTransport>,
    pub curl_path: Option<PathBuf>,
    pub insecure_skip_verify: bool,
    pub timeout: Option<Duration>,
    pub no_network: bool,
    pub no_sandbox: bool,
    pub pipe_command: Vec<String>,
    pub trtllm_engine: Option<PathBuf>,
    pub verbose: u8,
}

#[derive(Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub backend: BackendKind,
    pub api_base: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: Option<u32>,
    pub system_prompt: Option<String>,
    pub no_network: bool,
    pub remote_transport: RemoteTransport,
    pub curl_path: PathBuf,
    pub tls_trust: TlsTrust,
    pub io_timeout: Duration,
    pub pipe_command: Vec<String>,
    pub trtllm_engine: Option<PathBuf>,
    pub sandbox: bool,
    pub verbose: u8,
    pub app_title: String,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind", &self.bind)
            .field("backend", &self.backend)
            .field("api_base", &self.api_base)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("no_network", &self.no_network)
            .field("remote_transport", &self.remote_transport)
            .field("tls_trust", &self.tls_trust)
            .field("io_timeout", &self.io_timeout)
            .field("pipe_command", &self.pipe_command)
            .field("sandbox", &self.sandbox)
            .finish_non_exhaustive()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            backend: BackendKind::OpenAi,
            api_base: Some(DEFAULT_API_BASE.to_string()),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: Some(DEFAULT_MAX_TOKENS),
            system_prompt: None,
            no_network: false,
            remote_transport: RemoteTransport::Tls,
            curl_path: PathBuf::from("curl"),
            tls_trust: TlsTrust::Verify,
            io_timeout: DEFAULT_IO_TIMEOUT,
            pipe_command: Vec::new(),
            trtllm_engine: None,
            sandbox: true,
            verbose: 0,
            app_title: APP_TITLE.to_string(),
        }
    }
}

impl ServerConfig {
    /// Read the YAML file (if any) and the environment, then resolve.
    pub fn load(cli: CliOverrides) -> anyhow::Result<ServerConfig> {
        let file = match config_file_path(cli.config.as_deref()) {
            Some((path, required)) => {
                if path.exists() || required {
                    tracing::debug!(path = %path.display(), "loading config file");
                    load_file(&path)?
                } else {
                    FileConfig::default()
                }
            }
            None => FileConfig::default(),
        };
        let env_key = env::var(API_KEY_ENV).ok();
        ServerConfig::resolve(cli, file, env_key)
    }

    /// Merge CLI, file and environment values without touching the filesystem beyond
    /// key files and the curl lookup.
    pub fn resolve(
        cli: CliOverrides,
        file: FileConfig,
        env_api_key: Option<String>,
    ) -> anyhow::Result<ServerConfig> {
        let defaults = ServerConfig::default();

        let api_key = match cli.api_key_file.as_ref().or(file.api_key_file.as_ref()) {
            Some(path) => Some(read_key_file(path)?),
            None => env_api_key
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty()),
        };

        let io_timeout = match (cli.timeout, file.timeout.as_deref()) {
            (Some(d), _) => d,
            (None, Some(s)) => humantime::parse_duration(s.trim())
                .with_context(|| format!("invalid timeout '{s}' in config file"))?,
            (None, None) => defaults.io_timeout,
        };
        if io_timeout.is_zero() {
            bail!("timeout must be greater than zero");
        }

        let temperature = cli
            .temperature
            .or(file.temperature)
            .unwrap_or(defaults.temperature);
        if !temperature.is_finite() {
            bail!("temperature must be a number");
        }

        let pipe_command = if !cli.pipe_command.is_empty() {
            cli.pipe_command
        } else {
            file.pipe_command.map(CommandSpec::into_argv).unwrap_or_default()
        };

        let insecure = cli.insecure_skip_verify || file.insecure_skip_verify.unwrap_or(false);

        let mut cfg = ServerConfig {
            bind: cli.bind.or(file.bind).unwrap_or(defaults.bind),
            backend: cli.backend.or(file.backend).unwrap_or_default(),
            api_base: cli
                .api_base
                .or(file.api_base)
                .or(defaults.api_base)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            api_key,
            model: cli
                .model
                .or(file.model)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.model),
            temperature: clamp_temperature(temperature),
            max_tokens: cli
                .max_tokens
                .or(file.max_tokens)
                .or(defaults.max_tokens)
                .filter(|&n| n > 0),
            system_prompt: cli
                .system_prompt
                .or(file.system_prompt)
                .filter(|s| !s.trim().is_empty()),
            no_network: cli.no_network || file.no_network.unwrap_or(false),
            remote_transport: cli.transport.or(file.transport).unwrap_or_default(),
            curl_path: cli
                .curl_path
                .or(file.curl_path)
                .unwrap_or(defaults.curl_path),
            tls_trust: if insecure {
                TlsTrust::InsecureSkipVerify
            } else {
                TlsTrust::Verify
            },
            io_timeout,
            pipe_command,
            trtllm_engine: cli.trtllm_engine.or(file.trtllm_engine),
            sandbox: !cli.no_sandbox && file.sandbox.unwrap_or(true),
            verbose: cli.verbose,
            app_title: defaults.app_title,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&mut self) -> anyhow::Result<()> {
        if self.backend == BackendKind::OpenAi && self.no_network && self.pipe_command.is_empty() {
            bail!("openai backend with --no-network requires --pipe-command");
        }
        if self.pipe_command.first().is_some_and(|p| p.is_empty()) {
            bail!("pipe command must start with a program name");
        }
        let remote_in_use = self.backend == BackendKind::OpenAi
            && self.pipe_command.is_empty()
            && !self.no_network;
        if !remote_in_use {
            return Ok(());
        }
        match self.remote_transport {
            RemoteTransport::Tls => {
                if let Some(base) = &self.api_base {
                    Endpoint::parse(base).map_err(|e| anyhow::anyhow!(e.message))?;
                }
            }
            RemoteTransport::Curl => {
                self.curl_path = which::which(&self.curl_path).with_context(|| {
                    format!("curl transport selected but '{}' was not found", self.curl_path.display())
                })?;
            }
        }
        Ok(())
    }

    /// Whether the process is expected to open outbound connections at all.
    pub fn outbound_intended(&self) -> bool {
        !self.no_network
    }
}

/// Which YAML file to read, and whether its absence is an error.
pub fn config_file_path(explicit: Option<&Path>) -> Option<(PathBuf, bool)> {
    if let Some(p) = explicit {
        return Some((p.to_path_buf(), true));
    }
    if let Ok(p) = env::var(CONFIG_ENV) {
        let p = p.trim();
        if !p.is_empty() {
            return Some((PathBuf::from(p), true));
        }
    }
    home::home_dir().map(|h| (h.join(DEFAULT_CONFIG_FILE), false))
}

pub fn load_file(path: &Path) -> anyhow::Result<FileConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("cannot read config file {}", path.display()))?;
    if content.trim().is_empty() {
        return Ok(FileConfig::default());
    }
    serde_yaml::from_str(&content)
        .with_context(|| format!("cannot parse config file {}", path.display()))
}

fn read_key_file(path: &Path) -> anyhow::Result<String> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("cannot read key file {}", path.display()))?;
    let key = raw.trim();
    if key.is_empty() {
        bail!("key file {} is empty", path.display());
    }
    Ok(key.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_when_nothing_given() {
        let cfg = ServerConfig::resolve(CliOverrides::default(), FileConfig::default(), None).unwrap();
        assert_eq!(cfg.bind, DEFAULT_BIND);
        assert_eq!(cfg.backend, BackendKind::OpenAi);
        assert_eq!(cfg.api_base.as_deref(), Some(DEFAULT_API_BASE));
        assert_eq!(cfg.api_key, None);
        assert_eq!(cfg.temperature, DEFAULT_TEMPERATURE);
        assert_eq!(cfg.max_tokens, Some(DEFAULT_MAX_TOKENS));
        assert_eq!(cfg.tls_trust, TlsTrust::Verify);
        assert_eq!(cfg.io_timeout, DEFAULT_IO_TIMEOUT);
        assert!(cfg.sandbox);
    }

    #[test]
    fn key_file_beats_env_and_is_trimmed() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "  sk-from-file  ").unwrap();
        let cli = CliOverrides {
            api_key_file: Some(f.path().to_path_buf()),
            ..Default::default()
        };
        let cfg = ServerConfig::resolve(cli, FileConfig::default(), Some("sk-env".into())).unwrap();
        assert_eq!(cfg.api_key.as_deref(), Some("sk-from-file"));

        let cfg = ServerConfig::resolve(CliOverrides::default(), FileConfig::default(), Some("sk-env".into()))
            .unwrap();
        assert_eq!(cfg.api_key.as_deref(), Some("sk-env"));
    }

    #[test]
    fn missing_key_file_is_error() {
        let cli = CliOverrides {
            api_key_file: Some(PathBuf::from("/no/such/key/file")),
            ..Default::default()
        };
        assert!(ServerConfig::resolve(cli, FileConfig::default(), None).is_err());
    }

    #[test]
    fn no_network_without_pipe_is_rejected() {
        let cli = CliOverrides {
            no_network: true,
            ..Default::default()
        };
        let err = ServerConfig::resolve(cli, FileConfig::default(), None).unwrap_err();
        assert!(err.to_string().contains("--pipe-command"));

        let cli = CliOverrides {
            no_network: true,
            pipe_command: vec!["llama".into()],
            ..Default::default()
        };
        assert!(ServerConfig::resolve(cli, FileConfig::default(), None).is_ok());

        let cli = CliOverrides {
            no_network: true,
            backend: Some(BackendKind::TrtLlm),
            ..Default::default()
        };
        assert!(ServerConfig::resolve(cli, FileConfig::default(), None).is_ok());
    }

    #[test]
    fn cli_overrides_file() {
        let file: FileConfig = serde_yaml::from_str(
            "bind: 0.0.0.0:9000\nmodel: file-model\ntemperature: 1.5\ntimeout: 2m\npipe_command: \"llama-run --json 'a b'\"\n",
        )
        .unwrap();
        let cli = CliOverrides {
            model: Some("cli-model".into()),
            ..Default::default()
        };
        let cfg = ServerConfig::resolve(cli, file, None).unwrap();
        assert_eq!(cfg.bind, "0.0.0.0:9000");
        assert_eq!(cfg.model, "cli-model");
        assert_eq!(cfg.temperature, 1.5);
        assert_eq!(cfg.io_timeout, Duration::from_secs(120));
        assert_eq!(cfg.pipe_command, vec!["llama-run", "--json", "a b"]);
    }

    #[test]
    fn file_accepts_argv_list_and_rejects_unknown_keys() {
        let file: FileConfig =
            serde_yaml::from_str("pipe_command: [\"/usr/bin/llm\", \"--stdio\"]\nbackend: trtllm\n").unwrap();
        assert_eq!(
            file.pipe_command.clone().map(CommandSpec::into_argv),
            Some(vec!["/usr/bin/llm".to_string(), "--stdio".to_string()])
        );
        assert_eq!(file.backend, Some(BackendKind::TrtLlm));
        assert!(serde_yaml::from_str::<FileConfig>("colour: red\n").is_err());
    }

    #[test]
    fn temperature_clamped_and_zero_max_tokens_dropped() {
        let cli = CliOverrides {
            temperature: Some(7.0),
            max_tokens: Some(0),
            ..Default::default()
        };
        let cfg = ServerConfig::resolve(cli, FileConfig::default(), None).unwrap();
        assert_eq!(cfg.temperature, 2.0);
        assert_eq!(cfg.max_tokens, None);
    }

    #[test]
    fn bad_api_base_rejected_for_tls_transport() {
        let cli = CliOverrides {
            api_base: Some("ftp://example".into()),
            ..Default::default()
        };
        assert!(ServerConfig::resolve(cli, FileConfig::default(), None).is_err());
    }

    #[test]
    fn insecure_flag_selects_skip_verify() {
        let cli = CliOverrides {
            insecure_skip_verify: true,
            ..Default::default()
        };
        let cfg = ServerConfig::resolve(cli, FileConfig::default(), None).unwrap();
        assert_eq!(cfg.tls_trust, TlsTrust::InsecureSkipVerify);
    }

    #[test]
    fn debug_redacts_key() {
        let cfg = ServerConfig {
            api_key: Some("sk-secret".into()),
            ..Default::default()
        };
        assert!(!format!("{cfg:?}").contains("sk-secret"));
    }

    #[test]
    fn explicit_config_path_is_required() {
        let (p, required) = config_file_path(Some(Path::new("/etc/llmserv.yml"))).unwrap();
        assert_eq!(p, PathBuf::from("/etc/llmserv.yml"));
        assert!(required);
    }
}
