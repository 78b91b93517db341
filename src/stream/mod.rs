//! Frame sources
//!
//! The capture loop pulls raw frames through the `StreamSource` trait so the
//! recorder can be driven by the real network decoder or by a test double.

pub mod ffmpeg;

pub use ffmpeg::FfmpegSource;

use crate::error::RecorderResult;

/// A live source of raw BGR24 video frames.
pub trait StreamSource: Send {
    /// Establish (or re-establish) the connection. Any previous connection
    /// is torn down first.
    fn open(&mut self) -> RecorderResult<()>;

    /// Whether the source currently holds a connection worth reading from.
    fn is_healthy(&self) -> bool;

    /// Block until one full frame arrives. `None` reports a read miss; the
    /// source stays open, and the caller decides when repeated misses
    /// warrant a `close` and `open` cycle.
    fn read_frame(&mut self) -> Option<Vec<u8>>;

    /// Tear down the connection. Safe to call when already closed.
    fn close(&mut self);
}
