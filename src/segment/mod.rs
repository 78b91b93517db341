//! Segment naming and encoding
//!
//! A segment is one time-bounded video file. This module owns the on-disk
//! naming scheme and the FFmpeg-backed writer that produces segment files.

pub mod writer;

pub use writer::SegmentWriter;

use chrono::{DateTime, Local};

/// Prefix shared by every segment file
pub const SEGMENT_PREFIX: &str = "segment_";

/// Container extension for segment files
pub const SEGMENT_EXT: &str = "mp4";

/// Build a segment file name for the given creation time.
///
/// Names embed a millisecond-precision local timestamp so they sort
/// lexicographically in creation order and stay distinct for cuts requested
/// in rapid succession.
pub fn segment_file_name(at: DateTime<Local>) -> String {
    format!(
        "{}{}.{}",
        SEGMENT_PREFIX,
        at.format("%Y%m%d_%H%M%S_%3f"),
        SEGMENT_EXT
    )
}

/// Check whether a file name matches the segment naming scheme.
///
/// Bootstrap and the reconciliation sweep only ever touch files that match;
/// anything else in the storage directory is left alone.
pub fn is_segment_file(name: &str) -> bool {
    let Some(rest) = name.strip_prefix(SEGMENT_PREFIX) else {
        return false;
    };
    let Some(rest) = rest.strip_suffix(SEGMENT_EXT) else {
        return false;
    };
    let Some(stamp) = rest.strip_suffix('.') else {
        return false;
    };
    !stamp.is_empty() && stamp.chars().all(|c| c.is_ascii_digit() || c == '_')
}
