// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! argus daemon (argusd) -- long-running local supervisor for the
//! managed tunnel process. Binds the control TCP port, installs signal
//! handlers, and races the accept loop against shutdown.

use std::sync::Arc;

use argus_core::config::ensure_dir;
use argus_core::{ChildLocator, Config, ConfigDirectory, FixedChildLocator, FsConfigDirectory};
use argus_daemon::{CommandAudit, Dispatcher, TcpServer, TracingAudit};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    let _log_guard = match setup_logging(&config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("failed to set up logging: {e}");
            std::process::exit(1);
        }
    };

    info!(base_dir = %config.base_dir.display(), port = config.port, "starting argusd");

    for dir in [config.configs_dir(), config.logs_dir()] {
        if let Err(e) = ensure_dir(&dir) {
            error!(dir = %dir.display(), error = %e, "failed to create required directory");
            std::process::exit(1);
        }
    }

    let binary_path = config.binary_path();
    if !binary_path.is_file() {
        error!(path = %binary_path.display(), "managed binary not found");
        std::process::exit(1);
    }

    let child_locator: Arc<dyn ChildLocator> =
        Arc::new(FixedChildLocator::new(binary_path, "unknown"));
    let config_dir: Arc<dyn ConfigDirectory> = Arc::new(FsConfigDirectory::new(config.configs_dir()));
    let audit: Arc<dyn CommandAudit> = Arc::new(TracingAudit);

    let dispatcher = Arc::new(Dispatcher::new(config.clone(), child_locator, config_dir, audit));

    let addr = format!("127.0.0.1:{}", config.port);
    let server = match TcpServer::bind(&addr, Arc::clone(&dispatcher)).await {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "failed to bind control port");
            std::process::exit(1);
        }
    };

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to install SIGTERM handler");
            std::process::exit(1);
        }
    };
    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to install SIGINT handler");
            std::process::exit(1);
        }
    };

    info!(%addr, "argusd ready");

    // Broken-pipe on a client write is surfaced as a normal `std::io::Error`
    // by tokio's socket I/O rather than a process-level SIGPIPE: Rust's
    // runtime ignores SIGPIPE before `main` runs, so a peer disconnect
    // never aborts the supervisor (spec §4.6).
    tokio::select! {
        _ = server.serve() => {
            warn!("accept loop ended unexpectedly");
        }
        _ = sigterm.recv() => {
            info!("received SIGTERM, shutting down");
            dispatcher.shutdown().await;
        }
        _ = sigint.recv() => {
            info!("received SIGINT, shutting down");
            dispatcher.shutdown().await;
        }
    }

    info!("argusd stopped");
}

fn setup_logging(config: &Config) -> std::io::Result<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    std::fs::create_dir_all(&config.base_dir)?;
    let file_appender = tracing_appender::rolling::never(&config.base_dir, "argusd.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking))
        .init();

    Ok(guard)
}
