//! Reconciliation sweep
//!
//! Eviction and empty-segment cleanup delete files inline; the sweep is the
//! safety net that removes whatever those paths failed to delete, plus any
//! leftovers from crashed runs that bootstrap did not claim.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::segment::is_segment_file;

use super::engine::RecorderShared;

pub(crate) fn run(shared: Arc<RecorderShared>) {
    tracing::debug!("sweep loop started");
    while wait_interval(&shared) {
        match sweep_once(&shared) {
            Ok(0) => {}
            Ok(removed) => tracing::info!("sweep removed {} orphaned segments", removed),
            Err(e) => tracing::warn!("sweep failed: {}", e),
        }
    }
    tracing::debug!("sweep loop stopped");
}

/// Sleep one sweep interval in short ticks so stop stays prompt. Returns
/// false once the recorder is no longer running.
fn wait_interval(shared: &RecorderShared) -> bool {
    let deadline = Instant::now() + shared.config.sweep_interval();
    loop {
        if !shared.is_running() {
            return false;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return true;
        }
        std::thread::sleep(remaining.min(Duration::from_millis(250)));
    }
}

/// One reconciliation pass.
///
/// The directory is listed before the (pending, retained) snapshot is taken,
/// so a segment created after the snapshot cannot appear in the listing and
/// can never be classified as an orphan.
pub(crate) fn sweep_once(shared: &RecorderShared) -> std::io::Result<usize> {
    let listing = list_segment_files(&shared.config.output_dir)?;
    let (pending, retained) = shared.sweep_snapshot();
    let orphans = collect_orphans(&listing, &retained, pending.as_deref());

    let mut removed = 0;
    for path in orphans {
        match std::fs::remove_file(path) {
            Ok(()) => {
                tracing::warn!("removed orphaned segment {}", path.display());
                removed += 1;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("failed to remove orphan {}: {}", path.display(), e),
        }
    }
    Ok(removed)
}

fn list_segment_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        if is_segment_file(name) {
            files.push(entry.path());
        }
    }
    Ok(files)
}

/// Paths in `listing` that are neither retained nor pending.
fn collect_orphans<'a>(
    listing: &'a [PathBuf],
    retained: &HashSet<PathBuf>,
    pending: Option<&Path>,
) -> Vec<&'a PathBuf> {
    listing
        .iter()
        .filter(|path| Some(path.as_path()) != pending && !retained.contains(*path))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecorderConfig;
    use crate::retention::Segment;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"data").unwrap();
        path
    }

    #[test]
    fn test_collect_orphans_spares_pending_and_retained() {
        let listing = vec![
            PathBuf::from("videos/segment_20240101_000000_000.mp4"),
            PathBuf::from("videos/segment_20240101_000001_000.mp4"),
            PathBuf::from("videos/segment_20240101_000002_000.mp4"),
            PathBuf::from("videos/segment_20240101_000003_000.mp4"),
        ];
        let retained: HashSet<PathBuf> = [listing[1].clone()].into_iter().collect();
        let pending = listing[2].clone();

        let orphans = collect_orphans(&listing, &retained, Some(&pending));
        assert_eq!(orphans, vec![&listing[0], &listing[3]]);
    }

    #[test]
    fn test_sweep_once_removes_only_unreferenced_segments() {
        let dir = tempfile::tempdir().unwrap();
        let retained = touch(dir.path(), "segment_20240101_000000_000.mp4");
        let stray_a = touch(dir.path(), "segment_20240101_000001_000.mp4");
        let stray_b = touch(dir.path(), "segment_20240101_000002_000.mp4");
        let foreign = touch(dir.path(), "notes.txt");

        let config = RecorderConfig {
            source_url: "rtsp://cam.local/stream".to_string(),
            output_dir: dir.path().to_path_buf(),
            ..RecorderConfig::default()
        };
        let shared = RecorderShared::new(config);
        shared.queue.admit(Segment {
            path: retained.clone(),
            created: chrono::Local::now(),
            frames: 10,
            bytes: 4,
        });

        let removed = sweep_once(&shared).unwrap();

        assert_eq!(removed, 2);
        assert!(retained.exists());
        assert!(foreign.exists());
        assert!(!stray_a.exists());
        assert!(!stray_b.exists());
    }
}
