//! livecapd - live caption service
//!
//! This daemon:
//! 1. Loads configuration (file named by LIVECAP_CONFIG, then env overrides)
//! 2. Loads the caption and detector models
//! 3. Starts the capture loop and the HTTP API
//! 4. Runs until Ctrl-C

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc;

use livecap::{
    api::{ApiConfig, ApiServer},
    AppContext, LivecapConfig, StreamAssembler,
};

#[derive(Parser, Debug)]
#[command(name = "livecapd", version, about = "Live webcam captioning service")]
struct Args {
    /// Configuration file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "LIVECAP_CONFIG")]
    config: Option<PathBuf>,

    /// HTTP listen address; overrides the configuration.
    #[arg(long)]
    addr: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = LivecapConfig::load_from(args.config.as_deref())?;
    if let Some(addr) = args.addr {
        config.api.addr = addr;
    }
    log::info!(
        "livecapd {} starting (caption={:?}, security={})",
        env!("CARGO_PKG_VERSION"),
        config.caption.backend,
        config.security.enabled
    );

    let api_config = ApiConfig::from(&config.api);
    let context = AppContext::open(config)?;
    let assembler = StreamAssembler::spawn(context.clone())?;
    let api_handle = ApiServer::new(api_config, context.clone()).spawn()?;
    log::info!("open http://{} in a browser", api_handle.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    log::info!("livecapd waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping...");

    // Closing the context ends open video streams so the API can stop.
    context.close();
    api_handle.stop()?;
    assembler.stop()?;
    Ok(())
}
