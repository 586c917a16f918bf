use clap::{Parser, Subcommand};
use ravelin::ClientConfig;
use ravelin_replication::{
    OperationCredentials, OperationMetadata, ReplicationDestination, ReplicationInformer,
    ReqwestTransport,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "ravelin", about = "Inspect replication topology known to a ravelin client")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory holding cached replication topology files
    #[arg(long, env = "RAVELIN_CACHE_DIR", global = true)]
    cache_dir: Option<PathBuf>,

    /// JSON client config; environment settings are used when absent
    #[arg(long, env = "RAVELIN_CONFIG", global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Print the hash that names a server's cache file
    Hash {
        #[arg(long)]
        url: String,
    },
    /// Print destinations from the local cache without contacting the server
    Cached {
        #[arg(long)]
        url: String,
    },
    /// Fetch destinations from the server, cache them and print them
    Destinations {
        #[arg(long)]
        url: String,
        #[arg(long, env = "RAVELIN_API_KEY")]
        api_key: Option<String>,
    },
}

fn load_config(cli: &Cli) -> Result<ClientConfig, Box<dyn std::error::Error>> {
    let mut config = match cli.config.as_deref() {
        Some(path) => ClientConfig::load_or_default(path),
        None => ClientConfig::from_env()?,
    };
    if let Some(dir) = cli.cache_dir.as_ref() {
        config.local_cache_dir = dir.clone();
    }
    Ok(config)
}

fn print_destinations(
    destinations: &[ReplicationDestination],
) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(destinations)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // stdout carries command output, logs go to stderr
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "ravelin=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = Arc::new(load_config(&cli)?);

    match &cli.command {
        Command::Hash { url } => {
            println!("{}", ravelin::server_hash(url));
        }
        Command::Cached { url } => {
            let informer = ReplicationInformer::new(
                OperationMetadata::new(url.as_str()),
                Arc::clone(&config),
                Arc::new(ReqwestTransport::from_config(&config)),
            );
            let destinations = informer.get_or_load_cached_destinations(informer.server_hash());
            print_destinations(&destinations)?;
        }
        Command::Destinations { url, api_key } => {
            let credentials = OperationCredentials {
                api_key: api_key.clone(),
            };
            let informer = ReplicationInformer::new(
                OperationMetadata::with_credentials(url.as_str(), credentials),
                Arc::clone(&config),
                Arc::new(ReqwestTransport::from_config(&config)),
            );
            let refreshed = informer.refresh_replication_information().await;
            print_destinations(&informer.destinations())?;
            if let Err(e) = refreshed {
                eprintln!("Could not refresh from {}: {}", url, e);
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
