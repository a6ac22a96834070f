//! cot-relay: CoT event relay.
//!
//! Consumes the `cot_controller` fanout exchange on RabbitMQ and re-emits
//! every message to WebSocket subscribers of the `/debugger` room.

mod broker;
mod config;
mod relay;
mod server;
mod transport;

use clap::Parser;
use config::{Overrides, RelayConfig};
use server::RelayServer;
use std::path::PathBuf;
use tracing::{error, info, warn};

/// cot-relay — RabbitMQ to WebSocket CoT relay
#[derive(Parser, Debug)]
#[command(name = "cot-relay", version, about = "Relay CoT events from RabbitMQ to WebSocket subscribers")]
struct Cli {
    /// Config file path
    #[arg(long, default_value = "~/.cot-relay/config.toml")]
    config: String,

    /// WebSocket listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// WebSocket bind address
    #[arg(long)]
    bind: Option<String>,

    /// RabbitMQ host
    #[arg(long)]
    broker_host: Option<String>,

    /// RabbitMQ port
    #[arg(long)]
    broker_port: Option<u16>,

    /// RabbitMQ username
    #[arg(long, env = "COT_RELAY_BROKER_USER")]
    broker_user: Option<String>,

    /// RabbitMQ password
    #[arg(long, env = "COT_RELAY_BROKER_PASSWORD", hide_env_values = true)]
    broker_password: Option<String>,

    /// RabbitMQ virtual host
    #[arg(long)]
    broker_vhost: Option<String>,

    /// Serve subscribers without relaying from the broker
    #[arg(long)]
    disable: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting cot-relay");

    let config_path = PathBuf::from(&cli.config);
    let overrides = Overrides {
        broker_host: cli.broker_host,
        broker_port: cli.broker_port,
        broker_user: cli.broker_user,
        broker_password: cli.broker_password,
        broker_vhost: cli.broker_vhost,
        port: cli.port,
        bind: cli.bind,
        disable: cli.disable,
    };
    let relay_config = match RelayConfig::load(Some(&config_path), overrides) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    info!(
        listen = %relay_config.listen_addr,
        broker = %relay_config.broker.display_addr(),
        enabled = relay_config.enabled,
        "config loaded"
    );

    if let Err(e) = RelayServer::new(relay_config).run(shutdown_signal()).await {
        error!(error = %e, "server error");
        std::process::exit(1);
    }

    info!("cot-relay stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
