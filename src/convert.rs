//! On-demand conversion pipeline
//!
//! Re-encodes raw capture files into delivery MP4s, deleting the raw input
//! on success. Retained segments belong to the retention queue and must not
//! be fed through here. Jobs run strictly one at a time in submission order,
//! each ffmpeg invocation on the blocking pool, so conversion never competes
//! with capture for more than one core.

use std::path::{Path, PathBuf};
use std::process::Command;

use tokio::sync::{mpsc, oneshot};

use crate::error::{RecorderError, RecorderResult};

/// Encoder settings for delivery files.
#[derive(Debug, Clone)]
pub struct ConvertSettings {
    pub video_codec: String,
    pub preset: String,
    pub crf: u32,
}

impl Default for ConvertSettings {
    fn default() -> Self {
        Self {
            video_codec: "libx264".to_string(),
            preset: "fast".to_string(),
            crf: 23,
        }
    }
}

struct ConvertJob {
    input: PathBuf,
    reply: oneshot::Sender<RecorderResult<PathBuf>>,
}

/// Serialized re-encoding of raw capture files.
pub struct ConversionPipeline {
    tx: mpsc::UnboundedSender<ConvertJob>,
    worker: tokio::task::JoinHandle<()>,
}

impl ConversionPipeline {
    /// Spawn the worker task. Must be called from within a tokio runtime.
    pub fn start(settings: ConvertSettings) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<ConvertJob>();
        let worker = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let settings = settings.clone();
                let input = job.input.clone();
                let result = tokio::task::spawn_blocking(move || convert_file(&input, &settings))
                    .await
                    .unwrap_or_else(|e| {
                        Err(RecorderError::Conversion(format!(
                            "conversion task failed: {}",
                            e
                        )))
                    });
                if let Err(e) = &result {
                    tracing::error!("conversion of {} failed: {}", job.input.display(), e);
                }
                // The caller may have given up waiting; that is fine.
                let _ = job.reply.send(result);
            }
            tracing::info!("conversion worker stopped");
        });
        Self { tx, worker }
    }

    /// Queue a raw capture file for conversion and wait for its delivery
    /// path. The input is deleted once the delivery file is written.
    pub async fn convert(&self, input: impl Into<PathBuf>) -> RecorderResult<PathBuf> {
        let (reply, rx) = oneshot::channel();
        let job = ConvertJob {
            input: input.into(),
            reply,
        };
        self.tx
            .send(job)
            .map_err(|_| RecorderError::Conversion("pipeline is shut down".to_string()))?;
        rx.await
            .map_err(|_| RecorderError::Conversion("worker dropped the job".to_string()))?
    }

    /// Close the queue and wait for already-submitted jobs to drain.
    pub async fn shutdown(self) {
        drop(self.tx);
        if self.worker.await.is_err() {
            tracing::error!("conversion worker panicked");
        }
    }
}

fn convert_file(input: &Path, settings: &ConvertSettings) -> RecorderResult<PathBuf> {
    let output = delivery_path(input);
    let args = build_convert_args(input, &output, settings);

    tracing::info!("converting {} to {}", input.display(), output.display());
    let result = Command::new("ffmpeg")
        .args(&args)
        .output()
        .map_err(|e| RecorderError::Conversion(format!("failed to run ffmpeg: {}", e)))?;

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        if let Err(e) = std::fs::remove_file(&output) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(
                    "failed to remove partial output {}: {}",
                    output.display(),
                    e
                );
            }
        }
        return Err(RecorderError::Conversion(format!(
            "ffmpeg exited with status {}: {}",
            result.status,
            stderr.trim()
        )));
    }

    if let Err(e) = std::fs::remove_file(input) {
        tracing::warn!("failed to remove raw input {}: {}", input.display(), e);
    }
    Ok(output)
}

/// Output path for a converted file, never colliding with the input.
fn delivery_path(input: &Path) -> PathBuf {
    let output = input.with_extension("mp4");
    if output == input {
        input.with_extension("enc.mp4")
    } else {
        output
    }
}

fn build_convert_args(input: &Path, output: &Path, settings: &ConvertSettings) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-i".to_string(),
        input.to_string_lossy().to_string(),
        "-c:v".to_string(),
        settings.video_codec.clone(),
        "-preset".to_string(),
        settings.preset.clone(),
        "-crf".to_string(),
        settings.crf.to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        output.to_string_lossy().to_string(),
    ]
}
