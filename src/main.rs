//! ringcam binary: load a config file and record until interrupted.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ringcam::{Recorder, RecorderConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ringcam=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting ringcam v{}", env!("CARGO_PKG_VERSION"));

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ringcam.toml".to_string());
    let config = RecorderConfig::load(Path::new(&config_path))
        .with_context(|| format!("failed to load {}", config_path))?;

    let recorder = Recorder::start(config).context("failed to start recorder")?;

    let mut stats_interval = tokio::time::interval(Duration::from_secs(60));
    // The first tick completes immediately; skip it.
    stats_interval.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received, shutting down");
                break;
            }
            _ = stats_interval.tick() => {
                let stats = recorder.stats();
                tracing::info!(
                    "connected={} retained={} recorded={} pending_frames={}",
                    stats.connected,
                    stats.retained_segments,
                    stats.segments_recorded,
                    stats.pending_frames
                );
            }
        }
    }

    recorder.stop();
    Ok(())
}
