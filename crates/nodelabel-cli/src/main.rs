//! `nodelabel-worker` – per-node discovery daemon.
//!
//! 1. Parses the command line and installs logging.
//! 2. Builds the source registry, the config engine and the publisher.
//! 3. Loads the initial configuration; an invalid one ends the process
//!    before any discovery runs.
//! 4. Runs the [`Worker`] on a Tokio runtime until Ctrl-C / SIGTERM, or for
//!    a single pass with `--oneshot`.
//!
//! Exit status is 0 on a clean stop and 1 on any fatal error.

mod args;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use nodelabel_core::ConfigEngine;
use nodelabel_runtime::telemetry::init_tracing;
use nodelabel_runtime::{Worker, WorkerArgs};
use nodelabel_sources::default_registry;
use nodelabel_types::DiscoveryError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use args::Args;

fn main() -> ExitCode {
    let args = Args::parse();
    // before the runtime exists: the OTLP exporter must not need one
    let _telemetry = init_tracing("nodelabel-worker");

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "worker stopped");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), DiscoveryError> {
    info!(version = env!("CARGO_PKG_VERSION"), config = %args.config.display(), "starting nodelabel-worker");

    let registry = Arc::new(default_registry()?);
    let engine = ConfigEngine::new(
        registry,
        Some(args.config.clone()),
        args.options.clone(),
        args.overrides(),
    );

    let settings = args.publisher_settings();
    let publisher = settings.build()?;
    let worker = Worker::new(
        engine,
        publisher,
        WorkerArgs {
            oneshot: args.oneshot,
            credential_paths: settings.credential_paths(),
            node_name: args.node_name()?,
        },
    )?;

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("termination signal received");
        on_signal.cancel();
    }) {
        warn!(error = %e, "failed to install signal handler; stop the worker with SIGKILL");
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| DiscoveryError::Io(format!("failed to start async runtime: {e}")))?;
    runtime.block_on(worker.run(shutdown))
}
