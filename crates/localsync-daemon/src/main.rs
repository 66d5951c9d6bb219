//! localsync-daemon: keeps an in-memory mirror of local folders and reports
//! what changed in them.
//!
//! Each configured root gets its own sync. The watcher feeds changed paths
//! into the sync's queue and the driver reconciles them against the tree.

use anyhow::{Result, bail};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use localsync_daemon::{DaemonConfig, Driver, FileWatcher, RootConfig};

#[derive(Parser, Debug)]
#[command(name = "localsync-daemon")]
#[command(about = "Local folder change detection daemon")]
struct Args {
    /// Configuration directory holding config.json
    #[arg(short, long, env = "LOCALSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Folder to sync, in addition to the configured roots (repeatable)
    #[arg(short, long)]
    root: Vec<PathBuf>,

    /// Scan every root once, print a JSON summary and exit
    #[arg(long)]
    once: bool,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,localsync_daemon=debug,localsync_core=debug"
    } else {
        "info,localsync_daemon=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    // Logs go to stderr so the --once summary stays parseable
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("Starting localsync-daemon");

    let config_dir = args.config.unwrap_or_else(DaemonConfig::default_dir);
    let mut config = DaemonConfig::load(&config_dir)?;
    for path in args.root {
        if !config.roots.iter().any(|root| root.path == path) {
            config.roots.push(RootConfig { path, tag: 0 });
        }
    }
    if config.roots.is_empty() {
        bail!(
            "No sync roots configured; pass --root or edit {:?}",
            config_dir.join("config.json")
        );
    }

    let mut driver = Driver::new(&config)?;

    if args.once {
        driver.start().await?;
        driver.settle().await;
        println!("{}", serde_json::to_string_pretty(&driver.summary())?);
        driver.shutdown();
        return Ok(());
    }

    // Watch before scanning so nothing changed mid-scan is missed
    let mut watcher = FileWatcher::new(&driver.roots(), config.debounce())?;
    info!("File watcher started");

    driver.start().await?;

    info!("Daemon running. Press Ctrl+C to stop.");
    driver
        .run(&mut watcher, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;

    info!("Shutting down");
    driver.shutdown();
    Ok(())
}
