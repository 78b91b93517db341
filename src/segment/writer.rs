//! FFmpeg-backed segment writer
//!
//! Spawns an ffmpeg child that encodes raw BGR24 frames from stdin into one
//! segment file. The writer lives exactly as long as its segment: `begin`
//! spawns the child, `finalize` consumes the writer and settles the file.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};

use crate::error::{RecorderError, RecorderResult};
use crate::retention::Segment;

use super::segment_file_name;

/// Active encoder for the segment currently being recorded.
pub struct SegmentWriter {
    process: Child,
    stdin: ChildStdin,
    path: PathBuf,
    created: DateTime<Local>,
    started: Instant,
    frame_size: usize,
    frames: u64,
    write_failures: u64,
}

impl SegmentWriter {
    /// Start a new segment in `dir`, trying the primary codec first and the
    /// fallback once if the primary is unavailable or fails to spawn.
    pub fn begin(
        dir: &Path,
        width: u32,
        height: u32,
        fps: u32,
        primary_codec: &str,
        fallback_codec: &str,
    ) -> RecorderResult<Self> {
        let created = Local::now();
        let path = dir.join(segment_file_name(created));
        let frame_size = width as usize * height as usize * 3;

        let mut candidates = vec![primary_codec];
        if fallback_codec != primary_codec {
            candidates.push(fallback_codec);
        }

        for codec in candidates {
            if !encoder_available(codec) {
                tracing::warn!("encoder {} not available, skipping", codec);
                continue;
            }
            match spawn_encoder(&path, width, height, fps, codec) {
                Ok((process, stdin)) => {
                    tracing::info!("started segment {} ({})", path.display(), codec);
                    return Ok(Self {
                        process,
                        stdin,
                        path,
                        created,
                        started: Instant::now(),
                        frame_size,
                        frames: 0,
                        write_failures: 0,
                    });
                }
                Err(e) => {
                    tracing::warn!("encoder {} failed to start: {}", codec, e);
                }
            }
        }

        Err(RecorderError::Encoder(format!(
            "no usable encoder (tried {}, {})",
            primary_codec, fallback_codec
        )))
    }

    /// Append one raw frame. Errors are reported but leave the writer usable;
    /// the caller decides whether to keep feeding it.
    pub fn write_frame(&mut self, data: &[u8]) -> RecorderResult<()> {
        if data.len() != self.frame_size {
            self.write_failures += 1;
            return Err(RecorderError::Encoder(format!(
                "frame size mismatch: expected {} bytes, got {}",
                self.frame_size,
                data.len()
            )));
        }
        if let Err(e) = self.stdin.write_all(data) {
            self.write_failures += 1;
            return Err(RecorderError::Encoder(format!(
                "failed to write frame: {}",
                e
            )));
        }
        self.frames += 1;
        Ok(())
    }

    /// Close the encoder and settle the file.
    ///
    /// Returns `Ok(None)` when the segment turned out empty (no frames
    /// written, or the encoder produced nothing); the file is deleted rather
    /// than handed to retention.
    pub fn finalize(self) -> RecorderResult<Option<Segment>> {
        let SegmentWriter {
            process,
            stdin,
            path,
            created,
            started,
            frames,
            write_failures,
            ..
        } = self;

        // Closing stdin tells ffmpeg the input stream is done.
        drop(stdin);
        let output = process.wait_with_output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::warn!(
                "segment encoder exited with status {}: {}",
                output.status,
                stderr.trim()
            );
        }

        let bytes = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        if segment_is_empty(frames, bytes) {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("failed to remove empty segment {}: {}", path.display(), e);
                }
            }
            tracing::info!("discarding empty segment {}", path.display());
            return Ok(None);
        }

        if write_failures > 0 {
            tracing::warn!(
                "segment {} dropped {} frame writes",
                path.display(),
                write_failures
            );
        }
        tracing::info!(
            "finalized segment {} ({} frames, {} bytes, {:.1}s)",
            path.display(),
            frames,
            bytes,
            started.elapsed().as_secs_f64()
        );

        Ok(Some(Segment {
            path,
            created,
            frames,
            bytes,
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Time elapsed since the encoder was started.
    pub fn age(&self) -> Duration {
        self.started.elapsed()
    }
}

/// A segment with no frames fed in, or no bytes on disk, carries nothing
/// worth retaining; `finalize` deletes it instead of producing a `Segment`.
fn segment_is_empty(frames: u64, bytes: u64) -> bool {
    frames == 0 || bytes == 0
}

fn spawn_encoder(
    path: &Path,
    width: u32,
    height: u32,
    fps: u32,
    codec: &str,
) -> RecorderResult<(Child, ChildStdin)> {
    let args = build_encoder_args(path, width, height, fps, codec);

    let mut process = Command::new("ffmpeg")
        .args(&args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| RecorderError::Encoder(format!("failed to spawn ffmpeg: {}", e)))?;

    let stdin = process
        .stdin
        .take()
        .ok_or_else(|| RecorderError::Encoder("failed to open encoder stdin".to_string()))?;

    Ok((process, stdin))
}

/// Check `ffmpeg -encoders` for the codec. A missing or broken ffmpeg binary
/// reads as "not available"; `begin` surfaces that through its final error.
fn encoder_available(codec: &str) -> bool {
    let output = Command::new("ffmpeg")
        .args(["-hide_banner", "-encoders"])
        .output();
    match output {
        Ok(out) if out.status.success() => {
            encoder_listed(&String::from_utf8_lossy(&out.stdout), codec)
        }
        Ok(out) => {
            tracing::warn!("ffmpeg encoder check exited with status {}", out.status);
            false
        }
        Err(e) => {
            tracing::warn!("ffmpeg encoder check failed: {}", e);
            false
        }
    }
}

/// Parse `ffmpeg -encoders` output. Each encoder line is
/// `<flags> <name> <description>`, so the name is the second column.
fn encoder_listed(output: &str, codec: &str) -> bool {
    output
        .lines()
        .any(|line| line.split_whitespace().nth(1) == Some(codec))
}

fn build_encoder_args(
    path: &Path,
    width: u32,
    height: u32,
    fps: u32,
    codec: &str,
) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-y".to_string(),
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pix_fmt".to_string(),
        "bgr24".to_string(),
        "-s".to_string(),
        format!("{}x{}", width, height),
        "-r".to_string(),
        fps.to_string(),
        "-i".to_string(),
        "-".to_string(),
        "-c:v".to_string(),
        codec.to_string(),
    ];

    // -preset is an x264 option; other codecs reject it.
    if codec == "libx264" {
        args.push("-preset".to_string());
        args.push("veryfast".to_string());
    }

    args.push("-pix_fmt".to_string());
    args.push("yuv420p".to_string());
    args.push("-movflags".to_string());
    args.push("+faststart".to_string());
    args.push(path.to_string_lossy().to_string());

    args
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arg_pair(args: &[String], flag: &str) -> Option<String> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .cloned()
    }

    #[test]
    fn test_encoder_args_libx264() {
        let args = build_encoder_args(Path::new("/tmp/out.mp4"), 720, 480, 15, "libx264");

        assert_eq!(args[0], "-y");
        assert_eq!(arg_pair(&args, "-f").as_deref(), Some("rawvideo"));
        assert_eq!(arg_pair(&args, "-s").as_deref(), Some("720x480"));
        assert_eq!(arg_pair(&args, "-r").as_deref(), Some("15"));
        assert_eq!(arg_pair(&args, "-c:v").as_deref(), Some("libx264"));
        assert_eq!(arg_pair(&args, "-preset").as_deref(), Some("veryfast"));
        assert_eq!(arg_pair(&args, "-movflags").as_deref(), Some("+faststart"));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/out.mp4"));

        // Input pix_fmt precedes -i, output pix_fmt follows the codec.
        let input_end = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[..input_end].iter().filter(|a| *a == "-pix_fmt").count(), 1);
        assert_eq!(args[input_end..].iter().filter(|a| *a == "-pix_fmt").count(), 1);
    }

    #[test]
    fn test_encoder_args_fallback_has_no_preset() {
        let args = build_encoder_args(Path::new("/tmp/out.mp4"), 720, 480, 15, "mpeg4");
        assert_eq!(arg_pair(&args, "-c:v").as_deref(), Some("mpeg4"));
        assert!(!args.iter().any(|a| a == "-preset"));
    }

    #[test]
    fn test_discards_segment_on_zero_frames_or_zero_bytes() {
        assert!(segment_is_empty(0, 4096));
        assert!(segment_is_empty(150, 0));
        assert!(segment_is_empty(0, 0));
        assert!(!segment_is_empty(150, 4096));
    }

    #[test]
    fn test_encoder_listed() {
        let output = "Encoders:\n\
                      V..... = Video\n\
                      A..... = Audio\n\
                      ------\n\
                      V....D libx264              libx264 H.264 / AVC / MPEG-4 AVC\n\
                      V....D mpeg4                MPEG-4 part 2\n\
                      A....D aac                  AAC (Advanced Audio Coding)\n";

        assert!(encoder_listed(output, "libx264"));
        assert!(encoder_listed(output, "mpeg4"));
        assert!(!encoder_listed(output, "libx265"));
        // Descriptions must not match, only the name column.
        assert!(!encoder_listed(output, "Video"));
        assert!(!encoder_listed(output, "H.264"));
    }
}
