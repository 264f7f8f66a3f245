//! Server entry point: config, logging, transport runtime, and the
//! simulation thread.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use tokio::sync::mpsc;

use strata_net::{NetConfig, NetServer};
use strata_server::{CliArgs, ServerConfig, TickLoop};

/// Capacity of the inbound event queue between transport and simulation.
const EVENT_QUEUE_DEPTH: usize = 1024;

fn main() -> std::process::ExitCode {
    let args = CliArgs::parse();
    let config_dir = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from("."));

    let mut config = match ServerConfig::load_or_create(&config_dir) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return std::process::ExitCode::FAILURE;
        }
    };
    config.apply_cli_overrides(&args);

    strata_log::init_logging(&config.debug.log_level, config.debug.log_dir.as_deref());

    let bind_addr = match config.bind_addr() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!(error = %e, "invalid network configuration");
            return std::process::ExitCode::FAILURE;
        }
    };

    let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
    let stop = Arc::new(AtomicBool::new(false));

    let tick_loop = TickLoop::new(&config, event_rx, Arc::clone(&stop));
    let sim_thread = std::thread::Builder::new()
        .name("simulation".to_string())
        .spawn(move || tick_loop.run());
    let sim_thread = match sim_thread {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!(error = %e, "failed to start simulation thread");
            return std::process::ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(error = %e, "failed to start runtime");
            stop.store(true, Ordering::Relaxed);
            let _ = sim_thread.join();
            return std::process::ExitCode::FAILURE;
        }
    };

    let net_config = NetConfig {
        bind_addr,
        max_connections: config.network.max_connections,
        ..NetConfig::default()
    };
    let server = NetServer::new(net_config, event_tx);

    let result = runtime.block_on(async {
        tokio::select! {
            result = server.run() => result,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received, shutting down");
                server.shutdown();
                Ok(())
            }
        }
    });

    stop.store(true, Ordering::Relaxed);
    if sim_thread.join().is_err() {
        tracing::error!("simulation thread panicked");
        return std::process::ExitCode::FAILURE;
    }

    match result {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "transport failed");
            std::process::ExitCode::FAILURE
        }
    }
}
