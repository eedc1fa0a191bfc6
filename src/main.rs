//! Entry point: parse arguments, validate configuration, initialize
//! logging, and run the accept loop until a shutdown signal arrives.

mod cipher;
mod config;
mod conn;
mod error;
mod hostlist;
mod inspector;
mod listener;
mod pool;
mod session;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use clap::Parser;
use log::warn;

use config::{CliArgs, TunnelConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    let cfg = TunnelConfig::from_args(args)?;

    init_logging(&cfg);

    let shutdown = Arc::new(AtomicBool::new(false));
    listener::install_signal_handler(shutdown.clone());

    listener::run(Arc::new(cfg), shutdown).await?;
    Ok(())
}

/// `--logto stdout` is the default and only sink actually wired up.
/// `--logto syslog` is accepted at the configuration layer (so scripts that
/// pass it don't hit a hard startup error) but there is no vendored syslog
/// backend in this build, so it falls back to stdout with a one-time
/// warning.
fn init_logging(cfg: &TunnelConfig) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if cfg.log_to_syslog_requested {
        warn!("--logto syslog requested but no syslog backend is built in; logging to stdout instead");
    }
}
