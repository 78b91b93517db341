//! FFmpeg-backed network stream decoder
//!
//! Spawns an ffmpeg child that connects to the camera URL and writes raw
//! BGR24 frames to stdout, one fixed-size frame after another.

use std::io::{BufReader, Read};
use std::process::{Child, ChildStdout, Command, Stdio};

use crate::config::RecorderConfig;
use crate::error::{RecorderError, RecorderResult};

use super::StreamSource;

/// Give up on a stalled network read after this long so a dead camera
/// surfaces as read misses instead of a hung pipe.
const READ_TIMEOUT_US: u64 = 5_000_000;

/// Network video source decoded by an ffmpeg child process.
pub struct FfmpegSource {
    url: String,
    width: u32,
    height: u32,
    fps: u32,
    frame_size: usize,
    process: Option<Child>,
    stdout: Option<BufReader<ChildStdout>>,
}

impl FfmpegSource {
    pub fn new(config: &RecorderConfig) -> Self {
        Self {
            url: config.source_url.clone(),
            width: config.frame_width,
            height: config.frame_height,
            fps: config.frame_rate,
            frame_size: config.frame_width as usize * config.frame_height as usize * 3,
            process: None,
            stdout: None,
        }
    }
}

impl StreamSource for FfmpegSource {
    fn open(&mut self) -> RecorderResult<()> {
        self.close();

        let args = build_decoder_args(&self.url, self.width, self.height, self.fps);
        let mut process = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| RecorderError::Stream(format!("failed to spawn ffmpeg: {}", e)))?;

        let stdout = process
            .stdout
            .take()
            .ok_or_else(|| RecorderError::Stream("failed to open decoder stdout".to_string()))?;

        self.stdout = Some(BufReader::with_capacity(self.frame_size * 2, stdout));
        self.process = Some(process);
        tracing::debug!("decoder connected to {}", self.url);
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.process.is_some()
    }

    fn read_frame(&mut self) -> Option<Vec<u8>> {
        let stdout = self.stdout.as_mut()?;
        let mut frame = vec![0u8; self.frame_size];
        match stdout.read_exact(&mut frame) {
            Ok(()) => Some(frame),
            Err(e) => {
                tracing::debug!("decoder read failed: {}", e);
                None
            }
        }
    }

    fn close(&mut self) {
        self.stdout = None;
        if let Some(mut process) = self.process.take() {
            let _ = process.kill();
            let _ = process.wait();
        }
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        self.close();
    }
}

fn build_decoder_args(url: &str, width: u32, height: u32, fps: u32) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
    ];

    if url.starts_with("rtsp://") {
        args.push("-rtsp_transport".to_string());
        args.push("tcp".to_string());
    }

    args.push("-rw_timeout".to_string());
    args.push(READ_TIMEOUT_US.to_string());
    args.push("-i".to_string());
    args.push(url.to_string());

    args.push("-f".to_string());
    args.push("rawvideo".to_string());
    args.push("-pix_fmt".to_string());
    args.push("bgr24".to_string());
    args.push("-vf".to_string());
    args.push(format!("scale={}:{}", width, height));
    args.push("-r".to_string());
    args.push(fps.to_string());
    args.push("-".to_string());

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
    fn test_decoder_args_rtsp() {
        let args = build_decoder_args("rtsp://cam.local/stream", 720, 480, 15);

        assert_eq!(arg_pair(&args, "-rtsp_transport").as_deref(), Some("tcp"));
        assert_eq!(
            arg_pair(&args, "-i").as_deref(),
            Some("rtsp://cam.local/stream")
        );
        assert_eq!(arg_pair(&args, "-rw_timeout").as_deref(), Some("5000000"));
        assert_eq!(arg_pair(&args, "-vf").as_deref(), Some("scale=720:480"));
        assert_eq!(arg_pair(&args, "-r").as_deref(), Some("15"));
        assert_eq!(arg_pair(&args, "-pix_fmt").as_deref(), Some("bgr24"));
        assert_eq!(args.last().map(String::as_str), Some("-"));

        // Transport must be set before the input it applies to.
        let transport = args.iter().position(|a| a == "-rtsp_transport").unwrap();
        let input = args.iter().position(|a| a == "-i").unwrap();
        assert!(transport < input);
    }

    #[test]
    fn test_decoder_args_non_rtsp() {
        let args = build_decoder_args("http://cam.local/mjpeg", 640, 360, 10);
        assert!(!args.iter().any(|a| a == "-rtsp_transport"));
        assert_eq!(arg_pair(&args, "-vf").as_deref(), Some("scale=640:360"));
    }
}
