//! Recorder orchestration
//!
//! Wires the capture loop, the retention queue, and the reconciliation
//! sweep together behind the `Recorder` handle.

mod capture;
mod engine;
mod sweep;

pub use engine::{Recorder, RecorderStats};
