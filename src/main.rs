use std::net::IpAddr;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use relay10::config::{DEFAULT_PORT, ProxyConfig};
use relay10::server::Server;

/// Caching, host-filtering HTTP/1.0 forward proxy.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Cli {
    /// Address to listen on
    #[arg(short = 'a', long, default_value = "127.0.0.1", value_name = "ADDR")]
    address: IpAddr,
    /// Port to listen on
    #[arg(short = 'p', long, default_value_t = DEFAULT_PORT)]
    port: u16,
    /// Connections served at once
    #[arg(long, default_value_t = 1024)]
    max_connections: usize,
    /// Seconds a client has to send its request head
    #[arg(long, default_value_t = 30, value_name = "SECS")]
    client_timeout: u64,
    /// Seconds to wait for an origin connection
    #[arg(long, default_value_t = 10, value_name = "SECS")]
    connect_timeout: u64,
    /// Seconds to wait on a silent origin
    #[arg(long, default_value_t = 30, value_name = "SECS")]
    upstream_timeout: u64,
    /// Seconds to wait on a peer that stops reading
    #[arg(long, default_value_t = 30, value_name = "SECS")]
    write_timeout: u64,
}

impl From<Cli> for ProxyConfig {
    fn from(cli: Cli) -> Self {
        ProxyConfig::default()
            .address(cli.address)
            .port(cli.port)
            .max_connections(cli.max_connections)
            .client_read_timeout(Duration::from_secs(cli.client_timeout))
            .connect_timeout(Duration::from_secs(cli.connect_timeout))
            .upstream_read_timeout(Duration::from_secs(cli.upstream_timeout))
            .write_timeout(Duration::from_secs(cli.write_timeout))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("relay10=info")),
        )
        .init();

    let config = ProxyConfig::from(Cli::parse());
    let server = Server::bind(config).await?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("interrupt received, shutting down"),
    }

    Ok(())
}
