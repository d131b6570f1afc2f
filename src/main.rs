//! session-gateway - main entry point

mod args;
mod codec;
mod config;
mod encoder;
mod guacamole;
mod recorder;
mod splice;
mod tls;
mod web;

use args::Args;
use clap::Parser;
use log::{error, info};
use std::sync::Arc;
use web::SharedState;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::new()
        .parse_filters(&format!(
            "session_gateway={},rustls=warn,tokio_rustls=warn,h2=warn",
            log_level
        ))
        .init();

    info!("session-gateway v{} starting", env!("CARGO_PKG_VERSION"));

    let config = match args.load_config() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            error!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "listener: {:?} on {} -> {}",
        config.listener.protocol, config.listener.bind_addr, config.listener.target_addr
    );
    info!("storage: {}", config.listener.storage_dir.display());

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Fatal error: failed to start tokio runtime: {}", e);
            error!("failed to start tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(config)) {
        eprintln!("Fatal error: {}", e);
        error!("Fatal error: {}", e);
        std::process::exit(1);
    }
}

async fn run(config: config::GatewayConfig) -> Result<(), Box<dyn std::error::Error>> {
    let http_port = config.http.port;
    let config = Arc::new(config);
    let shared_state = SharedState::new(config.clone());

    // The HTTP facade is auxiliary tooling; it runs detached and its exit
    // (or panic) must not affect the splice service's lifetime.
    tokio::spawn(web::run(http_port, shared_state));

    let splice_config = config.clone();
    let splice_task = tokio::spawn(async move { splice::run_listener(splice_config).await });

    tokio::select! {
        res = splice_task => {
            res??;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
        }
    }

    Ok(())
}
