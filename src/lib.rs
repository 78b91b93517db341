//! ringcam - rolling recorder for network video streams.
//!
//! Continuously captures a camera stream into fixed-duration segment files
//! and retains only the newest few, so disk usage stays bounded no matter
//! how long the recorder runs.

pub mod config;
pub mod convert;
pub mod error;
pub mod recorder;
pub mod retention;
pub mod segment;
pub mod stream;

pub use config::RecorderConfig;
pub use convert::{ConversionPipeline, ConvertSettings};
pub use error::{RecorderError, RecorderResult};
pub use recorder::{Recorder, RecorderStats};
pub use retention::{RetentionQueue, Segment};
pub use segment::SegmentWriter;
pub use stream::{FfmpegSource, StreamSource};
