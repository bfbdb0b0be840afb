//! Hearth server binary.
//!
//! # Usage
//!
//! ```bash
//! # Serve on the default port
//! hearth-server
//!
//! # Custom bind address and a more patient liveness sweep
//! hearth-server --bind 0.0.0.0:9100 --idle-timeout 30
//! ```

use std::time::Duration;

use clap::Parser;
use hearth_server::{HubConfig, Server, ServerRuntimeConfig};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Room-scoped chat hub over TCP
#[derive(Parser, Debug)]
#[command(name = "hearth-server")]
#[command(about = "Readiness-multiplexed chat hub with rooms and liveness eviction")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:9000")]
    bind: String,

    /// Maximum concurrent connections
    #[arg(long, default_value = "1024")]
    max_connections: usize,

    /// Seconds a silent connection may linger before eviction
    #[arg(long, default_value = "5")]
    idle_timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("Hearth server starting");
    tracing::info!("Binding to {}", args.bind);

    let config = ServerRuntimeConfig {
        bind_address: args.bind,
        hub: HubConfig {
            liveness_timeout: Duration::from_secs(args.idle_timeout),
            max_connections: args.max_connections,
        },
        ..ServerRuntimeConfig::default()
    };

    let server = Server::bind(config)?;

    tracing::info!("Server listening on {}", server.local_addr()?);

    server.run()?;

    Ok(())
}
