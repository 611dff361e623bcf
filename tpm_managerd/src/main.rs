// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025 The tpm_manager Authors
//
// Author: tpm_manager maintainers <tpm-manager-devel@lists.example.org>

mod backend;
mod server;

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::{fs, os::unix::net::UnixListener, thread};
use tpm_manager::local_data::{FileLocalDataStore, DEFAULT_LOCAL_DATA_PATH};
use tpm_manager::metrics::LogMetrics;
use tpm_manager::service::TpmManagerService;
use tpm_manager::ServiceConfig;

const DEFAULT_SOCKET_PATH: &str = "/run/tpm_manager/tpm_managerd.sock";

#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
struct Args {
    /// UNIX domain socket to accept requests on
    #[clap(long, default_value = DEFAULT_SOCKET_PATH)]
    socket: PathBuf,

    /// Force Unix domain socket removal before bind
    #[clap(long, short,
        default_missing_value = "true",
        require_equals = true,
        num_args = 0..=1,
    )]
    force: Option<bool>,

    /// File holding the persisted TPM secrets and NVRAM policies
    #[clap(long, default_value = DEFAULT_LOCAL_DATA_PATH)]
    local_data: PathBuf,

    /// JSON service configuration. Command line flags take precedence.
    #[clap(long)]
    config: Option<PathBuf>,

    /// TPM backend. Supported backends:
    /// simulator-2.0, simulator-1.2 (in-process software TPMs).
    #[clap(long, default_value = "simulator-2.0")]
    backend: backend::Backend,

    /// Wait for an explicit TakeOwnership request instead of taking
    /// ownership at startup
    #[clap(long)]
    wait_for_ownership: Option<bool>,

    /// Prepare an unowned TPM at startup
    #[clap(long)]
    perform_preinit: Option<bool>,

    /// Log filter, e.g. "debug" or "tpm_manager=trace". Overrides RUST_LOG.
    #[clap(long)]
    log_level: Option<String>,
}

fn init_logging(log_level: Option<&str>) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(log_level) = log_level {
        builder.parse_filters(log_level);
    }
    builder.init();
}

fn load_config(args: &Args) -> anyhow::Result<ServiceConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let json = fs::read_to_string(path)
                .with_context(|| format!("unable to read {}", path.display()))?;
            serde_json::from_str(&json)
                .with_context(|| format!("malformed configuration in {}", path.display()))?
        }
        None => ServiceConfig::default(),
    };
    if let Some(wait_for_ownership) = args.wait_for_ownership {
        config.wait_for_ownership = wait_for_ownership;
    }
    if let Some(perform_preinit) = args.perform_preinit {
        config.perform_preinit = perform_preinit;
    }
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.log_level.as_deref());

    let config = load_config(&args)?;
    log::debug!("Configuration: {:?}", config);
    let store = Arc::new(FileLocalDataStore::new(&args.local_data));
    let mut service = TpmManagerService::new(config, store, Arc::new(LogMetrics));
    service
        .initialize_simulated(args.backend.version())
        .context("unable to start the TPM manager service")?;
    let service = Arc::new(service);

    if args.force.unwrap_or(false) {
        if let Err(e) = fs::remove_file(&args.socket) {
            log::debug!("Socket not removed: {}", e);
        }
    }
    let listener = UnixListener::bind(&args.socket).context("unable to bind to UNIX socket")?;
    log::info!("Listening on {}", args.socket.display());

    for stream in listener.incoming() {
        match stream {
            Ok(mut stream) => {
                let service = Arc::clone(&service);
                thread::Builder::new()
                    .name("tpm_managerd_client".to_string())
                    .spawn(move || {
                        if let Err(e) = server::serve(&mut stream, &service) {
                            log::warn!("Client connection failed: {:#}", e);
                        }
                    })
                    .context("unable to spawn a connection thread")?;
            }
            Err(e) => log::warn!("Failed to accept a connection: {}", e),
        }
    }

    Ok(())
}
