use std::net::IpAddr;
use std::path::PathBuf;
use clap::Parser;
use anyhow::{Context, Result};
use adam_serviced::config::Config;
use adam_serviced::instrument::{DetachedInstrument, InstrumentSupervisor};
use adam_serviced::service;

#[derive(Parser, Debug)]
#[command(name = "adam-serviced", about = "ADAM Audio production service")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Name of this service instance
    #[arg(long)]
    service_name: Option<String>,

    /// TCP command port
    #[arg(long)]
    service_port: Option<u16>,

    /// Address to bind the command port to
    #[arg(long)]
    host: Option<IpAddr>,

    /// UDP port announcements are broadcast to
    #[arg(long)]
    discovery_port: Option<u16>,

    /// Do not broadcast announcements
    #[arg(long)]
    no_discovery: bool,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long)]
    debug: bool,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(name) = &self.service_name {
            config.service.service_name = name.clone();
        }
        if let Some(port) = self.service_port {
            config.service.port = port;
        }
        if let Some(host) = self.host {
            config.service.host = host;
        }
        if let Some(port) = self.discovery_port {
            config.discovery.port = port;
        }
        if self.no_discovery {
            config.discovery.enabled = false;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.debug { "adam_serviced=debug" } else { "adam_serviced=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    tracing::info!("Starting adam-serviced");

    let mut config = Config::load_or_default(args.config.as_deref())?;
    args.apply(&mut config);
    if let Some(path) = &args.config {
        tracing::info!("Loaded config from {}", path.display());
    }

    let handle = service::start(config, InstrumentSupervisor::new(DetachedInstrument)).await?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");
    handle.shutdown().await;

    tracing::info!("Shutdown complete");
    Ok(())
}
