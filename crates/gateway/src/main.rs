use anyhow::Result;
use beatstore_gateway::{BeatStoreServer, ServerConfig};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file. Environment variables override it.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long)]
    bind_address: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,

    #[arg(long)]
    database_url: Option<String>,

    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = ServerConfig::load(args.config.as_deref())?;
    if let Some(bind_address) = args.bind_address {
        config.bind_address = bind_address;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(database_url) = args.database_url {
        config.database_url = database_url;
    }
    if let Some(log_level) = args.log_level {
        config.log_level = log_level;
    }

    let server = BeatStoreServer::new(config);
    server.run().await
}
