//! rudis server entry point.

use clap::Parser;
use engine::config::ServerConfig;
use rudis::node::Node;
use rudis::server::Server;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "rudis")]
#[command(about = "rudis - an in-memory RESP key/value store")]
struct Args {
    /// Configuration file path (YAML)
    #[arg(short = 'f', long = "config")]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = match &args.config {
        Some(path) => {
            info!(?path, "loading configuration");
            ServerConfig::from_file(path)?
        }
        None => ServerConfig::default(),
    };

    let addr = config.listen_addr();
    let node = Node::new(config).await?;
    let listener = TcpListener::bind(&addr).await?;
    let server = Server::new(node);

    server
        .serve(listener, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;

    Ok(())
}
