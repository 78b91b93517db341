//! Bounded retention of finished segments
//!
//! The queue is the authority on which segment files exist: admitting a new
//! segment at capacity evicts the oldest entry and deletes its backing file,
//! keeping disk usage inside the configured window.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Local};
use parking_lot::RwLock;
use serde::Serialize;

use crate::error::RecorderResult;
use crate::segment::is_segment_file;

/// One finished, on-disk video segment.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    /// Absolute or storage-relative path of the backing file.
    pub path: PathBuf,
    /// Local time the segment was started.
    pub created: DateTime<Local>,
    /// Frames written while recording. Zero for segments recovered at
    /// startup, where the count is unknown.
    pub frames: u64,
    /// File size on disk when the segment was finished.
    pub bytes: u64,
}

/// FIFO of retained segments with a fixed capacity.
pub struct RetentionQueue {
    capacity: usize,
    segments: RwLock<VecDeque<Segment>>,
}

impl RetentionQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            segments: RwLock::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Admit a finished segment, evicting and deleting the oldest entries
    /// until the new one fits.
    ///
    /// A failed delete is logged and does not abort admission; the
    /// reconciliation sweep retries it later.
    pub fn admit(&self, segment: Segment) {
        let mut segments = self.segments.write();
        while segments.len() >= self.capacity {
            let Some(evicted) = segments.pop_front() else {
                break;
            };
            match std::fs::remove_file(&evicted.path) {
                Ok(()) => tracing::info!("evicted segment {}", evicted.path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::debug!("evicted segment {} was already gone", evicted.path.display());
                }
                Err(e) => tracing::warn!(
                    "failed to delete evicted segment {}: {}",
                    evicted.path.display(),
                    e
                ),
            }
        }
        tracing::info!(
            "retained segment {} ({} of {})",
            segment.path.display(),
            segments.len() + 1,
            self.capacity
        );
        segments.push_back(segment);
    }

    /// Most recently finished segment, if any.
    pub fn latest(&self) -> Option<Segment> {
        self.segments.read().back().cloned()
    }

    /// All retained segments, oldest first.
    pub fn all(&self) -> Vec<Segment> {
        self.segments.read().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.segments.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Paths of every retained segment, for the reconciliation sweep.
    pub(crate) fn snapshot_paths(&self) -> HashSet<PathBuf> {
        self.segments.read().iter().map(|s| s.path.clone()).collect()
    }

    /// Recover segments left behind by a previous run.
    ///
    /// Scans `dir` for files matching the segment naming scheme, deletes
    /// zero-byte leftovers, keeps the newest `capacity` files (creation time
    /// ascending, file name as tiebreaker) and deletes the rest, then admits
    /// the survivors oldest first. Returns how many were admitted.
    pub fn bootstrap(&self, dir: &Path) -> RecorderResult<usize> {
        let mut found: Vec<(SystemTime, String, PathBuf, u64)> = Vec::new();

        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if !is_segment_file(name) {
                continue;
            }
            let meta = match entry.metadata() {
                Ok(meta) => meta,
                Err(e) => {
                    tracing::warn!("failed to stat {}: {}", entry.path().display(), e);
                    continue;
                }
            };
            if !meta.is_file() {
                continue;
            }
            if meta.len() == 0 {
                let path = entry.path();
                tracing::info!("removing empty segment {}", path.display());
                if let Err(e) = std::fs::remove_file(&path) {
                    tracing::warn!("failed to remove {}: {}", path.display(), e);
                }
                continue;
            }
            found.push((
                created_at(&meta),
                name.to_string(),
                entry.path(),
                meta.len(),
            ));
        }

        found.sort();

        // Keep the newest `capacity` files, mirroring steady-state eviction.
        let excess = found.len().saturating_sub(self.capacity);
        for (_, _, path, _) in found.drain(..excess) {
            match std::fs::remove_file(&path) {
                Ok(()) => tracing::info!("pruned excess segment {}", path.display()),
                Err(e) => tracing::warn!("failed to prune {}: {}", path.display(), e),
            }
        }

        let admitted = found.len();
        let mut segments = self.segments.write();
        for (created, _, path, bytes) in found {
            segments.push_back(Segment {
                path,
                created: DateTime::<Local>::from(created),
                frames: 0,
                bytes,
            });
        }
        Ok(admitted)
    }
}

fn created_at(meta: &std::fs::Metadata) -> SystemTime {
    meta.created()
        .or_else(|_| meta.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(path: &Path) -> Segment {
        Segment {
            path: path.to_path_buf(),
            created: Local::now(),
            frames: 10,
            bytes: 1024,
        }
    }

    fn touch(dir: &Path, name: &str, len: usize) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, vec![0u8; len]).unwrap();
        path
    }

    #[test]
    fn test_admit_within_capacity() {
        let queue = RetentionQueue::new(3);
        queue.admit(seg(Path::new("/tmp/a.mp4")));
        queue.admit(seg(Path::new("/tmp/b.mp4")));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.latest().unwrap().path, Path::new("/tmp/b.mp4"));
        let paths: Vec<_> = queue.all().into_iter().map(|s| s.path).collect();
        assert_eq!(paths, vec![Path::new("/tmp/a.mp4"), Path::new("/tmp/b.mp4")]);
    }

    #[test]
    fn test_admit_at_capacity_evicts_oldest_file() {
        let dir = tempfile::tempdir().unwrap();
        let a = touch(dir.path(), "segment_20240101_000000_000.mp4", 64);
        let b = touch(dir.path(), "segment_20240101_000001_000.mp4", 64);
        let c = touch(dir.path(), "segment_20240101_000002_000.mp4", 64);

        let queue = RetentionQueue::new(2);
        queue.admit(seg(&a));
        queue.admit(seg(&b));
        queue.admit(seg(&c));

        assert_eq!(queue.len(), 2);
        assert!(!a.exists());
        assert!(b.exists());
        assert!(c.exists());

        let snapshot = queue.snapshot_paths();
        assert!(!snapshot.contains(&a));
        assert!(snapshot.contains(&b));
        assert!(snapshot.contains(&c));
    }

    #[test]
    fn test_eviction_survives_missing_file() {
        let queue = RetentionQueue::new(1);
        queue.admit(seg(Path::new("/nonexistent/one.mp4")));
        queue.admit(seg(Path::new("/nonexistent/two.mp4")));

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.latest().unwrap().path, Path::new("/nonexistent/two.mp4"));
    }

    #[test]
    fn test_bootstrap_recovers_newest_up_to_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let mut names = Vec::new();
        for i in 0..8 {
            let name = format!("segment_20240101_00000{}_000.mp4", i);
            touch(dir.path(), &name, 64);
            names.push(name);
        }

        let queue = RetentionQueue::new(5);
        let admitted = queue.bootstrap(dir.path()).unwrap();

        assert_eq!(admitted, 5);
        assert_eq!(queue.len(), 5);

        // The three oldest are gone from disk, the rest retained in order.
        for name in &names[..3] {
            assert!(!dir.path().join(name).exists());
        }
        let recovered: Vec<_> = queue
            .all()
            .into_iter()
            .map(|s| s.path.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(recovered, names[3..].to_vec());
        assert_eq!(queue.latest().unwrap().frames, 0);
    }

    #[test]
    fn test_bootstrap_removes_empty_and_ignores_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let empty = touch(dir.path(), "segment_20240101_000000_000.mp4", 0);
        let valid = touch(dir.path(), "segment_20240101_000001_000.mp4", 64);
        let foreign = touch(dir.path(), "notes.txt", 64);
        let wrong_name = touch(dir.path(), "clip_20240101_000002_000.mp4", 64);

        let queue = RetentionQueue::new(5);
        let admitted = queue.bootstrap(dir.path()).unwrap();

        assert_eq!(admitted, 1);
        assert!(!empty.exists());
        assert!(valid.exists());
        assert!(foreign.exists());
        assert!(wrong_name.exists());
        assert_eq!(queue.latest().unwrap().path, valid);
    }
}
