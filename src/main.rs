use std::env;
use std::process;

use clap::Parser;
use tokio::signal::unix::SignalKind;

mod cli;
mod coalesce;
mod config;
mod device;
mod ecode;
mod ffb;
mod gear;
mod mapping;
mod pump;
mod scaling;
mod supervisor;
mod virtual_device;

#[tokio::main]
async fn main() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    env::set_var("RUST_LOG", log_level);
    env_logger::init();

    let args = cli::Args::parse();

    if matches!(args.cmd, Some(cli::Commands::ListDevices)) {
        cli::device::list_devices();
        return;
    }

    const VERSION: &str = env!("CARGO_PKG_VERSION");
    log::info!("Starting understeer v{VERSION}");

    let config = match &args.config {
        Some(path) => match config::Config::from_yaml_file(path) {
            Ok(config) => config,
            Err(e) => {
                log::error!("failed to load config {}: {e}", path.display());
                process::exit(1);
            }
        },
        None => config::Config::default(),
    };
    let config = cli::apply_overrides(config, &args);

    let supervisor = match supervisor::start(&config).await {
        Ok(supervisor) => supervisor,
        Err(e) => {
            log::error!("failed to start: {e}");
            process::exit(e.exit_code());
        }
    };

    let mut sig_term = match tokio::signal::unix::signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            log::error!("failed to install SIGTERM handler: {e}");
            supervisor.shutdown();
            process::exit(1);
        }
    };
    let mut sig_int = match tokio::signal::unix::signal(SignalKind::interrupt()) {
        Ok(s) => s,
        Err(e) => {
            log::error!("failed to install SIGINT handler: {e}");
            supervisor.shutdown();
            process::exit(1);
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("received CTRL+C, shutting down");
        }
        _ = sig_int.recv() => {
            log::info!("received SIGINT, shutting down");
        }
        _ = sig_term.recv() => {
            log::info!("received SIGTERM, shutting down");
        }
    }

    supervisor.shutdown();
    log::info!("understeer stopped");
}
