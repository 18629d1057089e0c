//! livecap_check - wait for a running livecapd to come up
//!
//! Polls `/` until the page loads, then `/stats` until a caption is reported.
//! Exits non-zero when the service does not answer in time.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "livecap_check", version, about = "Health check for livecapd")]
struct Args {
    /// Base URL of the service.
    #[arg(long, env = "LIVECAP_URL", default_value = "http://127.0.0.1:8000")]
    url: String,

    /// Attempts per endpoint.
    #[arg(long, default_value_t = 20)]
    retries: u32,

    /// Seconds between attempts.
    #[arg(long, default_value_t = 2)]
    interval_secs: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let agent = ureq::AgentBuilder::new()
        .timeout(Duration::from_secs(5))
        .build();
    let base = args.url.trim_end_matches('/');
    let interval = Duration::from_secs(args.interval_secs);

    poll(args.retries, interval, || {
        let response = agent.get(&format!("{}/", base)).call()?;
        log::info!("index page reachable (status {})", response.status());
        Ok(())
    })
    .context("index page never became reachable")?;

    poll(args.retries, interval, || {
        let stats: serde_json::Value = agent
            .get(&format!("{}/stats", base))
            .call()?
            .into_json()
            .context("stats response was not JSON")?;
        let caption = stats
            .get("caption")
            .and_then(|c| c.as_str())
            .ok_or_else(|| anyhow!("stats response has no caption"))?;
        log::info!("caption: {}", caption);
        Ok(())
    })
    .context("stats endpoint never answered")?;

    log::info!("livecapd is up");
    Ok(())
}

fn poll<F: FnMut() -> Result<()>>(retries: u32, interval: Duration, mut attempt: F) -> Result<()> {
    let mut last_err = anyhow!("no attempts made");
    for n in 1..=retries.max(1) {
        match attempt() {
            Ok(()) => return Ok(()),
            Err(err) => {
                log::info!("attempt {}/{} failed: {:#}", n, retries, err);
                last_err = err;
            }
        }
        if n < retries {
            std::thread::sleep(interval);
        }
    }
    Err(last_err)
}
