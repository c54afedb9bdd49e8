//! lb-proxy: HTTP load balancer.
//!
//! ```text
//!     Client ──▶ http server ──▶ dispatch engine ──▶ selection policy ──▶ backend
//!                                      │                    ▲
//!                                      │ refused            │ healthy subset
//!                                      ▼                    │
//!                                 health prober ──▶ backend registry
//! ```

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;

use lb_proxy::config::loader::load_config;
use lb_proxy::lifecycle::signals::spawn_signal_handler;
use lb_proxy::observability::{logging, metrics};
use lb_proxy::{HttpServer, Shutdown};

#[derive(Debug, Parser)]
#[command(name = "lb-proxy", version, about = "HTTP load balancer")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "lb-proxy.toml")]
    config: PathBuf,

    /// Override the listener port.
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = load_config(&cli.config)?;
    logging::init(&config.observability.log_level);

    if let Some(port) = cli.port {
        let mut addr: SocketAddr = config.listener.bind_address.parse()?;
        addr.set_port(port);
        config.listener.bind_address = addr.to_string();
    }

    tracing::info!(
        config = %cli.config.display(),
        bind_address = %config.listener.bind_address,
        algorithm = ?config.algorithm,
        backends = config.backends.len(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let signals = spawn_signal_handler(shutdown.clone());

    let server = HttpServer::new(config, shutdown.clone())?;
    server.run(listener).await?;

    shutdown.trigger();
    let _ = signals.await;
    tracing::info!("Shutdown complete");
    Ok(())
}
