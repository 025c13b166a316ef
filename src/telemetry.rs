use std::env;

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;

/// Filter directives env var (same syntax as RUST_LOG).
pub const LOG_ENV: &str = "LLMSERV_LOG";

static INIT: OnceCell<()> = OnceCell::new();

fn default_directive(verbose: u8) -> &'static str {
    match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

fn build_filter(verbose: u8) -> EnvFilter {
    match env::var(LOG_ENV) {
        Ok(s) if !s.trim().is_empty() => EnvFilter::try_new(s.trim()).unwrap_or_else(|e| {
            eprintln!("llmserv: ignoring invalid {LOG_ENV}: {e}");
            EnvFilter::new(default_directive(verbose))
        }),
        _ => EnvFilter::new(default_directive(verbose)),
    }
}

/// Install the global fmt subscriber on stderr. Returns false when one was already set.
pub fn telemetry_init(verbose: u8) -> bool {
    if INIT.get().is_some() {
        return false;
    }
    let ansi = atty::is(atty::Stream::Stderr);
    let res = tracing_subscriber::fmt()
        .with_env_filter(build_filter(verbose))
        .with_writer(std::io::stderr)
        .with_ansi(ansi)
        .with_target(verbose > 0)
        .try_init();
    if res.is_err() {
        eprintln!("llmserv: logging init skipped (global subscriber already set)");
        return false;
    }
    let _ = INIT.set(());
    true
}

/// Build metadata baked in by build.rs.
pub fn log_build_info() {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        build_date = env!("LLMSERV_BUILD_DATE"),
        target = env!("LLMSERV_BUILD_TARGET"),
        profile = env!("LLMSERV_BUILD_PROFILE"),
        rustc = env!("LLMSERV_BUILD_RUSTC"),
        "llmserv starting"
    );
}
