use anyhow::{Context, Result};
use dotenv::dotenv;
use reddit::{
    SyncConfig,
    credentials::{CredentialProvider, provider_from_config},
    sync,
};
use tokio::time::{Duration, MissedTickBehavior, interval};
use tracing::{info, warn};
use utils::tracing::run_with_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    run_with_tracing(run).await
}

async fn run() -> Result<()> {
    info!("Reddit sync starting up");

    let config = SyncConfig::load();
    let provider = provider_from_config(&config.credentials)
        .context("Failed to set up credential provider")?;

    info!(
        subreddit = %config.feed.subreddit,
        policy = ?config.eviction.policy,
        floor = config.eviction.floor,
        capacity = config.eviction.capacity,
        "Eviction configured"
    );

    let Some(secs) = config.schedule.interval_secs else {
        let stats = sync(provider.as_ref(), &config)
            .await
            .with_context(|| format!("Sync of r/{} failed", config.feed.subreddit))?;
        info!(
            inserted = stats.inserted,
            updated = stats.updated,
            evicted = stats.evicted,
            "Reddit sync finished"
        );
        return Ok(());
    };

    // credentials must resolve before the first tick
    provider
        .credentials()
        .await
        .context("Failed to load credentials")?;

    info!(interval_secs = secs, "Running on an interval");
    let mut ticker = interval(Duration::from_secs(secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // outcome is already logged with its phase
                match sync(provider.as_ref(), &config).await {
                    Ok(_) => {}
                    Err(e) if e.is_fatal() => {
                        return Err(e).context("Sync configuration is unusable, stopping");
                    }
                    Err(e) => warn!(error = %e, "Sync run failed, waiting for next tick"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                return Ok(());
            }
        }
    }
}
