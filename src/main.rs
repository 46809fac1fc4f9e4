//! Node Warmer CLI
//!
//! Run as the first thing on a newly added application node: flushes caches
//! when new code is detected and warms the storefront when new static content
//! is deployed.
//!
//! # Usage
//! ```bash
//! node-warmer --config /etc/node_warmer.yaml
//! node-warmer --root /var/www/shop --local-url http://127.0.0.1:8080 --force
//! ```

use anyhow::Context;
use clap::Parser;
use node_warmer::{NodeWarmer, WarmerConfig};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser)]
#[command(
    name = "node-warmer",
    about = "Warms node caches and flushes them if new code is detected",
    version
)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Application root directory (overrides the config file)
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// URL of the local app instance (overrides the config file)
    #[arg(short = 'u', long)]
    local_url: Option<String>,

    /// Run even if the node is already warm
    #[arg(short, long)]
    force: bool,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .with_target(false)
        .with_line_number(true)
        .init();

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        eprintln!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = match &cli.config {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            WarmerConfig::from_file(path)
                .with_context(|| format!("Failed to load {}", path.display()))?
        }
        None => WarmerConfig::default(),
    };

    if let Some(root) = cli.root {
        config.root_dir = root;
    }
    if let Some(local_url) = cli.local_url {
        config.local_url = local_url;
    }

    let local_url = config.local_url.clone();
    let warmer = NodeWarmer::from_config(config).context("Invalid warmer configuration")?;
    let sentinel = warmer.sentinel_path();

    match warmer.warm_node(&local_url, cli.force).await {
        Ok(summary) if summary.skipped() => {
            println!("Node already warm, remove \"{}\" or use --force", sentinel.display());
            Ok(())
        }
        Ok(_) => {
            println!("Done, output saved to \"{}\"", sentinel.display());
            Ok(())
        }
        Err(e) => Err(anyhow::Error::new(e).context(format!(
            "Warmup did not complete, generated \"{}\" anyway",
            sentinel.display()
        ))),
    }
}
