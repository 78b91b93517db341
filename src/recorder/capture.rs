//! Capture loop
//!
//! One OS thread that pulls frames from the source, paces them to the
//! configured rate, rotates segments on schedule, and reconnects after
//! repeated read misses.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use crate::stream::StreamSource;

use super::engine::RecorderShared;

pub(crate) fn run(shared: Arc<RecorderShared>, mut source: Box<dyn StreamSource>) {
    let config = &shared.config;
    tracing::info!("capture loop started");

    match source.open() {
        Ok(()) => {
            shared.connected.store(true, Ordering::SeqCst);
            tracing::info!("connected to {}", config.source_url);
        }
        Err(e) => tracing::warn!("initial connect to {} failed: {}", config.source_url, e),
    }

    let mut misses = MissTracker::new(config.reconnect_threshold);

    while shared.is_running() {
        // A segment must be open before frames can land anywhere.
        if shared.slot.lock().is_none() {
            shared.rotate();
            if shared.slot.lock().is_none() {
                std::thread::sleep(config.segment_retry_delay());
                continue;
            }
        }

        let rotation_due = shared
            .slot
            .lock()
            .as_ref()
            .map(|writer| writer.age() >= config.segment_duration())
            .unwrap_or(false);
        if rotation_due {
            shared.rotate();
        }

        if !source.is_healthy() {
            shared.connected.store(false, Ordering::SeqCst);
            match source.open() {
                Ok(()) => {
                    misses.reset();
                    shared.read_misses.store(0, Ordering::SeqCst);
                    tracing::info!("reconnected to {}", config.source_url);
                }
                Err(e) => {
                    tracing::warn!("reconnect to {} failed: {}", config.source_url, e);
                    std::thread::sleep(config.reopen_delay());
                    continue;
                }
            }
        }

        let read_started = Instant::now();
        match source.read_frame() {
            Some(frame) => {
                misses.reset();
                shared.read_misses.store(0, Ordering::SeqCst);
                shared.connected.store(true, Ordering::SeqCst);

                if let Some(writer) = shared.slot.lock().as_mut() {
                    if let Err(e) = writer.write_frame(&frame) {
                        tracing::warn!("dropping frame: {}", e);
                    }
                }

                // A slow read eats into its own pacing slot.
                if let Some(remaining) =
                    config.frame_interval().checked_sub(read_started.elapsed())
                {
                    std::thread::sleep(remaining);
                }
            }
            None => {
                shared.connected.store(false, Ordering::SeqCst);
                let threshold_reached = misses.record();
                shared.read_misses.store(misses.count(), Ordering::SeqCst);

                if threshold_reached {
                    tracing::warn!(
                        "{} consecutive read misses, reconnecting to {}",
                        config.reconnect_threshold,
                        config.source_url
                    );
                    source.close();
                    match source.open() {
                        Ok(()) => tracing::info!("reconnected to {}", config.source_url),
                        Err(e) => {
                            // The health check above retries with the reopen delay.
                            tracing::warn!("reconnect to {} failed: {}", config.source_url, e);
                        }
                    }
                } else {
                    tracing::debug!(
                        "read miss {}/{}",
                        misses.count(),
                        config.reconnect_threshold
                    );
                    std::thread::sleep(config.read_backoff());
                }
            }
        }
    }

    shared.finalize_pending();
    source.close();
    shared.connected.store(false, Ordering::SeqCst);
    tracing::info!("capture loop stopped");
}

/// Counts consecutive read misses against the reconnect threshold.
struct MissTracker {
    count: u32,
    threshold: u32,
}

impl MissTracker {
    fn new(threshold: u32) -> Self {
        Self {
            count: 0,
            threshold,
        }
    }

    /// Record one miss. Returns true when the streak reaches the threshold;
    /// the count restarts so the next streak is measured from zero.
    fn record(&mut self) -> bool {
        self.count += 1;
        if self.count >= self.threshold {
            self.count = 0;
            return true;
        }
        false
    }

    fn reset(&mut self) {
        self.count = 0;
    }

    fn count(&self) -> u32 {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_miss_tracker_triggers_at_threshold() {
        let mut misses = MissTracker::new(10);
        for i in 1..10 {
            assert!(!misses.record(), "miss {} should stay below threshold", i);
            assert_eq!(misses.count(), i);
        }
        assert!(misses.record());
        assert_eq!(misses.count(), 0);
    }

    #[test]
    fn test_miss_tracker_reset_restarts_streak() {
        let mut misses = MissTracker::new(3);
        misses.record();
        misses.record();
        misses.reset();
        assert_eq!(misses.count(), 0);

        assert!(!misses.record());
        assert!(!misses.record());
        assert!(misses.record());
    }
}
