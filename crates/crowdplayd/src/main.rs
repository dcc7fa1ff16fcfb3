//! crowdplayd - crowd-controlled game input daemon
//!
//! Reads chat lines on stdin, runs weighted vote windows, and writes each
//! winning command as a JSON line on stdout for the emulator bridge.
//! Logs go to stderr.

use anyhow::{Context, Result};
use clap::Parser;
use crowdplay_common::config::CONFIG_PATH;
use crowdplay_common::{Config, VERSION};
use crowdplayd::{run_intake, Host};
use std::path::{Path, PathBuf};
use tokio::io::BufReader;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "crowdplayd")]
#[command(about = "Crowdplay - chat votes in, one game command per window out", long_about = None)]
#[command(version = VERSION)]
struct Args {
    /// Config file (default: /etc/crowdplay/config.toml if present)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Log filter when RUST_LOG is unset (e.g. "info", "crowdplayd=debug")
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Write the default config to the config path and exit
    #[arg(long)]
    init: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging; stdout belongs to the command sink
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .context("invalid log filter")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if args.init {
        let path = args.config.unwrap_or_else(|| PathBuf::from(CONFIG_PATH));
        Config::save_default(&path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        return Ok(());
    }

    info!("Crowdplay Daemon v{} starting", VERSION);

    let config_path = args.config.or_else(|| {
        let default = Path::new(CONFIG_PATH);
        default.exists().then(|| default.to_path_buf())
    });
    let config = Config::load_or_default(config_path.as_deref())?;

    let host = Host::new(&config, std::io::stdout(), None);
    host.engine().start().await;
    info!("Crowdplay Daemon ready, reading chat from stdin");

    // End of input dispatches the window in flight; ctrl-c discards it
    let stdin = BufReader::new(tokio::io::stdin());
    let drain = tokio::select! {
        res = run_intake(&host, stdin) => {
            res?;
            true
        }
        res = tokio::signal::ctrl_c() => {
            res?;
            info!("Shutting down gracefully");
            false
        }
    };

    host.shutdown(drain).await;
    Ok(())
}
