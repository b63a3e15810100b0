//! pinwatch daemon
//!
//! ## Usage
//!
//! ```bash
//! # Watch ./.local/ipfs/content and serve blocks on the default ports
//! pinwatch serve ipfs
//!
//! # Custom ports
//! pinwatch serve ipfs --gateway-port 9080 --swarm-port 4002 --api-port 5002
//!
//! # Serve ./.local/http as static files
//! pinwatch serve http --port 8000
//!
//! # Different project root / config file
//! pinwatch --root /data/project --config /etc/pinwatch.toml serve ipfs
//! ```
//!
//! Failures are logged; the process still exits with status 0.

use anyhow::Context;
use clap::{Parser, Subcommand};
use pinwatch::config::{default_config_path, parse_port};
use pinwatch::{Config, EventBus, IpfsSession, KeypressShutdown, StaticFileServer};
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pinwatch")]
#[command(about = "Mirror a directory into a local content-addressed store")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "PINWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Project root holding the .local directory
    #[arg(long, env = "PINWATCH_ROOT")]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a server
    Serve {
        #[command(subcommand)]
        target: ServeTarget,
    },
}

#[derive(Subcommand, Debug)]
enum ServeTarget {
    /// Content store with gateway, control API and directory sync
    Ipfs {
        /// HTTP gateway port
        #[arg(long, alias = "gatewayPort")]
        gateway_port: Option<String>,

        /// Block exchange port
        #[arg(long, alias = "swarmPort")]
        swarm_port: Option<String>,

        /// Control API port
        #[arg(long, alias = "apiPort")]
        api_port: Option<String>,
    },
    /// Static files from <root>/.local/http
    Http {
        /// Listen port
        #[arg(long)]
        port: Option<String>,
    },
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => {
            let path = default_config_path();
            if path.exists() {
                Config::load(&path)
                    .with_context(|| format!("Failed to load config {}", path.display()))?
            } else {
                Config::default()
            }
        }
    };

    if let Some(root) = &args.root {
        config.root = root.clone();
    }
    Ok(config)
}

async fn serve_ipfs(
    mut config: Config,
    gateway_port: Option<String>,
    swarm_port: Option<String>,
    api_port: Option<String>,
) -> anyhow::Result<()> {
    if let Some(port) = gateway_port {
        config.ipfs.gateway_port = parse_port(&port, config.ipfs.gateway_port);
    }
    if let Some(port) = swarm_port {
        config.ipfs.swarm_port = parse_port(&port, config.ipfs.swarm_port);
    }
    if let Some(port) = api_port {
        config.ipfs.api_port = parse_port(&port, config.ipfs.api_port);
    }

    info!(
        root = %config.root.display(),
        gateway_port = config.ipfs.gateway_port,
        swarm_port = config.ipfs.swarm_port,
        api_port = config.ipfs.api_port,
        "Starting IPFS session"
    );

    let mut session = IpfsSession::new(config, EventBus::new());
    session.run(&KeypressShutdown).await?;
    Ok(())
}

async fn serve_http(config: Config, port: Option<String>) -> anyhow::Result<()> {
    let port = match port {
        None => config.http.port,
        Some(raw) => {
            let fallback = config.http.fallback_port;
            let port = parse_port(&raw, fallback);
            if port == fallback && raw.trim() != fallback.to_string() {
                warn!(given = %raw, port, "Invalid port, falling back");
            }
            port
        }
    };

    let root = config.http_dir();
    info!(root = %root.display(), port, "Starting static file server");
    let mut server = StaticFileServer::start(&root, port, EventBus::new())
        .await
        .with_context(|| format!("Failed to serve {}", root.display()))?;

    server
        .run_until(config.http.settle_delay(), &KeypressShutdown)
        .await?;
    Ok(())
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    let filter = match "pinwatch=info".parse::<Directive>() {
        Ok(directive) => EnvFilter::from_default_env().add_directive(directive),
        Err(_) => EnvFilter::from_default_env(),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();

    let result = match load_config(&args) {
        Ok(config) => match args.command {
            Command::Serve { target } => match target {
                ServeTarget::Ipfs {
                    gateway_port,
                    swarm_port,
                    api_port,
                } => serve_ipfs(config, gateway_port, swarm_port, api_port).await,
                ServeTarget::Http { port } => serve_http(config, port).await,
            },
        },
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        let message = format!("{:#}", e);
        error!(error = %message, "pinwatch failed");
    }
}
