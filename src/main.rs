mod cli;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use llmserv::{
    exit_code_for_io_error, log_build_info, sandbox_init, start_server, telemetry_init, App,
    Gateway, ServerConfig, EXIT_CONFIG,
};

use crate::cli::Cli;

fn main() -> ExitCode {
    let cli = Cli::parse();
    telemetry_init(cli.verbose);
    log_build_info();

    let cfg = match ServerConfig::load(cli.into_overrides()) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!("configuration error: {e:#}");
            eprintln!("llmserv: {e:#}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    tracing::debug!(config = ?cfg, "resolved configuration");
    if let Some(engine) = &cfg.trtllm_engine {
        tracing::warn!(engine = %engine.display(), "TRT-LLM engine given but the backend is not built in");
    }

    // Before any thread exists, so every later thread and child inherits the filter.
    let sandbox = match sandbox_init(cfg.outbound_intended(), cfg.sandbox) {
        Ok(status) => status,
        Err(e) => {
            tracing::error!(error = %e, "could not install network sandbox");
            eprintln!("llmserv: sandbox: {e}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let gateway = Gateway::from_config(&cfg);
    let transport = gateway.selected_transport().unwrap_or("none");
    let backend = gateway.backend();
    let network = gateway.network();
    let bind = cfg.bind.clone();
    let app = Arc::new(App::new(Arc::new(cfg), gateway));

    let (addr, _running, handle) = match start_server(app, &bind) {
        Ok(parts) => parts,
        Err(e) => {
            tracing::error!(error = %e, "listen failed");
            eprintln!("llmserv: {e}");
            return ExitCode::from(exit_code_for_io_error(&e));
        }
    };
    tracing::info!(
        %addr,
        backend = backend.as_str(),
        network = network.as_str(),
        transport,
        sandbox = %sandbox,
        "listening"
    );
    eprintln!("llmserv: listening on http://{addr}/");

    if handle.join().is_err() {
        tracing::error!("accept loop panicked");
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}
