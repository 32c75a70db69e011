use clap::Parser;
use eyre::{Result, WrapErr};
use std::path::PathBuf;
use tracing::{debug, info};

use crypto_monitor::config::Config;
use crypto_monitor::logging::{self, LogFile};
use crypto_monitor::monitor::Monitor;
use crypto_monitor::plugins::Registries;

#[derive(Debug, Parser)]
#[command(name = "monitor", about = "Watches exchange price windows and pushes swing alerts")]
struct Args {
    /// Monitor config JSON file
    #[arg(long, default_value = "./config.json")]
    config: PathBuf,

    /// Log at debug level to stderr only
    #[arg(long)]
    debug: bool,

    /// Log file used outside debug mode; SIGHUP rotates it
    #[arg(long, default_value = "monitor.log")]
    log_file: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();
    let args = Args::parse();

    if args.debug {
        logging::init(true, None);
        debug!("debug mode enabled");
    } else {
        let log_file = LogFile::open(&args.log_file)?;
        logging::init(false, Some(&log_file));
        #[cfg(unix)]
        logging::rotate_on_hangup(log_file)?;
    }

    info!("starting the monitor...");
    info!("loading config file: {} ...", args.config.display());
    let config = Config::load(&args.config)?;

    let registries = Registries::builtin();
    let mut monitor = Monitor::from_config(&config, &registries).wrap_err("failed to wire monitor")?;
    monitor.start().await;

    shutdown_signal().await?;
    monitor.stop().await;

    info!("monitor exited");
    Ok(())
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate()).wrap_err("failed to install SIGTERM handler")?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.wrap_err("failed to listen for ctrl-c")?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await.wrap_err("failed to listen for ctrl-c")?;

    info!("Shutdown signal received");
    Ok(())
}
