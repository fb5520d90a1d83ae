use std::io::Write;

use anyhow::Context;
use tokio::io::AsyncReadExt;
use tonic::transport::Channel;

use chordal_proto::v1::client_api_client::ClientApiClient;
use chordal_proto::v1::{GetRequest, PutRequest};

#[derive(clap::Parser, Debug)]
#[command(name = "chordal-cli", about = "Chordal DHT client")]
struct Cli {
    /// Address of the node to contact.
    #[arg(long, env = "CHORDAL_ADDR")]
    addr: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Store a key. Reads the value from stdin when the argument is omitted.
    Put { key: String, value: Option<String> },
    /// Fetch a key and write its value to stdout.
    Get { key: String },
}

async fn connect(addr: &str) -> anyhow::Result<ClientApiClient<Channel>> {
    let channel = tonic::transport::Endpoint::from_shared(format!("http://{addr}"))
        .with_context(|| format!("invalid address: {addr}"))?
        .connect()
        .await
        .with_context(|| format!("dialing {addr} failed"))?;
    Ok(ClientApiClient::new(channel))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use clap::Parser;
    let cli = Cli::parse();
    let mut client = connect(&cli.addr).await?;

    match cli.command {
        Command::Put { key, value } => {
            let value = match value {
                Some(v) => v.into_bytes(),
                None => {
                    let mut buf = Vec::new();
                    tokio::io::stdin()
                        .read_to_end(&mut buf)
                        .await
                        .context("failed to read value from stdin")?;
                    buf
                }
            };
            client
                .put(PutRequest { key: key.clone(), value })
                .await
                .with_context(|| format!("putting key {key:?} failed"))?;
            println!("put succeeded");
        }
        Command::Get { key } => {
            let reply = client
                .get(GetRequest { key: key.clone() })
                .await
                .with_context(|| format!("getting key {key:?} failed"))?;
            std::io::stdout()
                .write_all(&reply.into_inner().value)
                .context("failed to write value")?;
        }
    }

    Ok(())
}
