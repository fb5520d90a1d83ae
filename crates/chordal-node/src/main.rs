use std::time::Duration;

use anyhow::Context;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;

use chordal_core::{id, Config, Node, Peer};
use chordal_proto::v1::client_api_client::ClientApiClient;
use chordal_proto::v1::GetIdRequest;

#[derive(clap::Parser, Debug)]
#[command(name = "chordal-node", about = "Chordal DHT node daemon")]
struct Cli {
    /// Custom ring ID (decimal or 0x-hex) instead of hashing the address.
    #[arg(long)]
    id: Option<String>,
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0:17000")]
    addr: String,
    /// Address of a ring member to join through.
    #[arg(long)]
    parent_addr: Option<String>,
    #[arg(long)]
    config: Option<std::path::PathBuf>,
}

#[derive(Debug, Deserialize)]
struct RingConfig {
    key_size_bits: u32,
    stabilize_interval_ms: u64,
    fix_finger_interval_ms: u64,
    retry_interval_ms: u64,
    connection_timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
struct ObservabilityConfig {
    log_level: String,
    log_format: String,
}

#[derive(Debug, Deserialize)]
struct FileConfig {
    ring: RingConfig,
    observability: ObservabilityConfig,
}

impl RingConfig {
    fn to_node_config(&self) -> Config {
        Config {
            key_size: self.key_size_bits,
            id_length: (self.key_size_bits / 8) as usize,
            stabilize_interval: Duration::from_millis(self.stabilize_interval_ms),
            fix_finger_interval: Duration::from_millis(self.fix_finger_interval_ms),
            retry_interval: Duration::from_millis(self.retry_interval_ms),
            connection_timeout: Duration::from_millis(self.connection_timeout_ms),
        }
    }
}

/// Resolve the parent's ring identity by asking it directly.
async fn fetch_parent(addr: &str, timeout: Duration) -> anyhow::Result<Peer> {
    let endpoint = tonic::transport::Endpoint::from_shared(format!("http://{addr}"))
        .with_context(|| format!("invalid parent address: {addr}"))?
        .connect_timeout(timeout);
    let channel = endpoint
        .connect()
        .await
        .with_context(|| format!("dialing parent {addr} failed"))?;
    let mut client = ClientApiClient::new(channel);
    let reply = client
        .get_id(GetIdRequest {})
        .await
        .context("getting parent ID failed")?;
    Ok(Peer::new(reply.into_inner().id, addr))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use clap::Parser;
    let cli = Cli::parse();

    let mut figment =
        Figment::new().merge(Toml::string(include_str!("../../../config/default.toml")));
    if let Some(ref config_path) = cli.config {
        figment = figment.merge(Toml::file_exact(config_path));
    }
    let config: FileConfig = figment
        .merge(Env::prefixed("CHORDAL_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    match config.observability.log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(&config.observability.log_level)
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .pretty()
                .with_env_filter(&config.observability.log_level)
                .init();
        }
    }

    let node_config = config.ring.to_node_config();
    node_config.validate().context("invalid ring configuration")?;

    tracing::info!(
        addr = %cli.addr,
        parent = cli.parent_addr.as_deref().unwrap_or("-"),
        key_size = node_config.key_size,
        "node starting"
    );

    let mut builder = Node::builder(&cli.addr).config(node_config.clone());
    if let Some(ref raw) = cli.id {
        let id = id::parse_id(raw, node_config.id_length)
            .with_context(|| format!("parsing ID {raw:?} failed"))?;
        builder = builder.id(id);
    }
    if let Some(ref parent_addr) = cli.parent_addr {
        let parent = fetch_parent(parent_addr, node_config.connection_timeout).await?;
        tracing::info!(parent = %parent, "attaching to ring");
        builder = builder.parent(parent);
    }

    let node = builder.start().await.context("failed to start node")?;
    tracing::info!("{}", node.describe().await);

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal failed")?;
    tracing::info!("interrupt received, leaving ring");

    node.shutdown().await;
    tracing::info!("done");
    Ok(())
}
