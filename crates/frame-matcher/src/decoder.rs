//! Decode backends.
//!
//! A [`Decoder`] probes a video and streams complete image records for a
//! [`DecodePlan`] into a bounded channel. The channel capacity is the
//! backpressure: a decoder that gets ahead of its consumer waits on `send`.

use crate::error::{MatchError, Result};
use crate::probe::parse_probe_json;
use crate::splitter::{ImageFormat, RecordSplitter};
use crate::types::VideoMetadata;
use shared::config::DecoderConfig;
use std::future::Future;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Read size for the decoder's stdout
const READ_CHUNK: usize = 64 * 1024;

/// Bytes of stderr kept for error messages
const STDERR_TAIL: usize = 600;

/// What a single decode invocation produces
#[derive(Debug, Clone, PartialEq)]
pub enum DecodePlan {
    /// Seek to `timestamp` and decode exactly one frame
    Seek { timestamp: f64 },
    /// Decode exactly the listed frame numbers, in ascending order
    Select { frames: Vec<u64> },
    /// Decode every `every`-th frame from the start
    Every { every: u64 },
    /// Decode only frames that need no predecessor
    Keyframes,
    /// Decode every frame in `[start, start + duration)`
    Window { start: f64, duration: f64 },
}

/// Source of decoded image records
pub trait Decoder: Send + Sync {
    /// Derive stream metadata for `url`
    fn probe(&self, url: &str) -> impl Future<Output = Result<VideoMetadata>> + Send;

    /// Run `plan` against `url`, sending each complete record to `sink`.
    ///
    /// Returns once the decode has exited; an unsuccessful exit is an
    /// [`MatchError::Extraction`].
    fn decode(
        &self,
        url: &str,
        plan: &DecodePlan,
        sink: mpsc::Sender<Vec<u8>>,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// ffmpeg/ffprobe subprocess decoder
#[derive(Debug, Clone)]
pub struct FfmpegDecoder {
    ffmpeg_path: String,
    ffprobe_path: String,
    format: ImageFormat,
}

impl FfmpegDecoder {
    pub fn new(config: &DecoderConfig) -> Self {
        Self {
            ffmpeg_path: config.ffmpeg_path.clone(),
            ffprobe_path: config.ffprobe_path.clone(),
            format: ImageFormat::Jpeg,
        }
    }

    /// Emit PNG instead of JPEG records
    pub fn with_format(mut self, format: ImageFormat) -> Self {
        self.format = format;
        self
    }

    /// ffmpeg arguments for one plan
    pub fn decode_args(&self, url: &str, plan: &DecodePlan) -> Vec<String> {
        let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error", "-nostdin"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        match plan {
            DecodePlan::Seek { timestamp } => {
                args.extend(["-ss".to_string(), format!("{:.6}", timestamp)]);
                args.extend(["-i".to_string(), url.to_string()]);
                args.extend(["-frames:v".to_string(), "1".to_string()]);
            }
            DecodePlan::Select { frames } => {
                let terms: Vec<String> = frames.iter().map(|n| format!("eq(n\\,{})", n)).collect();
                args.extend(["-i".to_string(), url.to_string()]);
                args.extend(["-vf".to_string(), format!("select='{}'", terms.join("+"))]);
                args.extend(["-vsync".to_string(), "0".to_string()]);
            }
            DecodePlan::Every { every } => {
                args.extend(["-i".to_string(), url.to_string()]);
                if *every > 1 {
                    args.extend([
                        "-vf".to_string(),
                        format!("select='not(mod(n\\,{}))'", every),
                    ]);
                }
                args.extend(["-vsync".to_string(), "0".to_string()]);
            }
            DecodePlan::Keyframes => {
                args.extend(["-skip_frame".to_string(), "nokey".to_string()]);
                args.extend(["-i".to_string(), url.to_string()]);
                args.extend(["-vsync".to_string(), "0".to_string()]);
            }
            DecodePlan::Window { start, duration } => {
                args.extend(["-ss".to_string(), format!("{:.6}", start)]);
                args.extend(["-t".to_string(), format!("{:.6}", duration)]);
                args.extend(["-i".to_string(), url.to_string()]);
                args.extend(["-vsync".to_string(), "0".to_string()]);
            }
        }

        args.extend(["-an".to_string(), "-f".to_string(), "image2pipe".to_string()]);
        args.extend(["-c:v".to_string(), self.format.codec().to_string()]);
        if self.format == ImageFormat::Jpeg {
            args.extend(["-q:v".to_string(), "2".to_string()]);
        }
        args.push("-".to_string());

        args
    }
}

impl Decoder for FfmpegDecoder {
    async fn probe(&self, url: &str) -> Result<VideoMetadata> {
        let output = Command::new(&self.ffprobe_path)
            .args(["-v", "error", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(url)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                MatchError::Metadata(format!("failed to run {}: {}", self.ffprobe_path, e))
            })?;

        if !output.status.success() {
            return Err(MatchError::Metadata(format!(
                "ffprobe exited with {}: {}",
                output.status,
                tail(&output.stderr)
            )));
        }

        let metadata = parse_probe_json(&output.stdout)?;
        debug!(
            fps = metadata.fps,
            frames = metadata.frame_count,
            duration = metadata.duration_seconds,
            "Probed video"
        );
        Ok(metadata)
    }

    async fn decode(
        &self,
        url: &str,
        plan: &DecodePlan,
        sink: mpsc::Sender<Vec<u8>>,
    ) -> Result<()> {
        let args = self.decode_args(url, plan);
        debug!(plan = ?plan, "Spawning ffmpeg");

        let mut child = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                MatchError::Extraction(format!("failed to spawn {}: {}", self.ffmpeg_path, e))
            })?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| MatchError::Extraction("ffmpeg stdout not captured".to_string()))?;

        // Drained concurrently so a chatty decoder never blocks on a full pipe
        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = stderr.read_to_end(&mut buf).await;
                buf
            })
        });

        let mut splitter = RecordSplitter::new(self.format);
        let mut chunk = vec![0u8; READ_CHUNK];
        let mut records = 0usize;

        loop {
            let n = stdout
                .read(&mut chunk)
                .await
                .map_err(|e| MatchError::Extraction(format!("reading ffmpeg output: {}", e)))?;
            if n == 0 {
                break;
            }

            for record in splitter.push(&chunk[..n]) {
                records += 1;
                if sink.send(record).await.is_err() {
                    // Consumer gave up; dropping the child kills it
                    return Err(MatchError::Extraction(
                        "frame consumer stopped before decode finished".to_string(),
                    ));
                }
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| MatchError::Extraction(format!("waiting for ffmpeg: {}", e)))?;

        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => Vec::new(),
        };

        if !status.success() {
            return Err(MatchError::Extraction(format!(
                "ffmpeg exited with {}: {}",
                status,
                tail(&stderr)
            )));
        }

        if splitter.pending() > 0 {
            warn!(bytes = splitter.pending(), "Discarding truncated trailing record");
        }

        debug!(records, "ffmpeg finished");
        Ok(())
    }
}

fn tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    let start = text
        .char_indices()
        .rev()
        .nth(STDERR_TAIL.saturating_sub(1))
        .map(|(i, _)| i)
        .unwrap_or(0);
    text[start..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder() -> FfmpegDecoder {
        FfmpegDecoder::new(&DecoderConfig {
            ffmpeg_path: "/usr/bin/ffmpeg".to_string(),
            ffprobe_path: "/usr/bin/ffprobe".to_string(),
        })
    }

    fn joined(args: Vec<String>) -> String {
        args.join(" ")
    }

    #[test]
    fn test_seek_args_decode_one_frame() {
        let args = joined(decoder().decode_args("in.mp4", &DecodePlan::Seek { timestamp: 4.25 }));
        assert!(args.contains("-ss 4.250000 -i in.mp4 -frames:v 1"));
        assert!(args.ends_with("-f image2pipe -c:v mjpeg -q:v 2 -"));
    }

    #[test]
    fn test_select_args_escape_commas() {
        let plan = DecodePlan::Select {
            frames: vec![3, 10],
        };
        let args = decoder().decode_args("in.mp4", &plan);
        assert!(args.contains(&"select='eq(n\\,3)+eq(n\\,10)'".to_string()));
    }

    #[test]
    fn test_every_args() {
        let args = decoder().decode_args("in.mp4", &DecodePlan::Every { every: 5 });
        assert!(args.contains(&"select='not(mod(n\\,5))'".to_string()));

        // Every frame needs no select filter
        let args = decoder().decode_args("in.mp4", &DecodePlan::Every { every: 1 });
        assert!(!args.iter().any(|a| a.starts_with("select")));
    }

    #[test]
    fn test_keyframe_args_skip_before_input() {
        let args = joined(decoder().decode_args("in.mp4", &DecodePlan::Keyframes));
        assert!(args.contains("-skip_frame nokey -i in.mp4"));
    }

    #[test]
    fn test_png_output() {
        let args = decoder()
            .with_format(ImageFormat::Png)
            .decode_args("in.mp4", &DecodePlan::Window { start: 1.0, duration: 2.0 });
        let args = joined(args);
        assert!(args.contains("-ss 1.000000 -t 2.000000 -i in.mp4"));
        assert!(args.ends_with("-c:v png -"));
    }

    #[test]
    fn test_stderr_tail_is_bounded() {
        let long = format!("{}{}", "a".repeat(5000), "x".repeat(STDERR_TAIL));
        assert_eq!(tail(long.as_bytes()), "x".repeat(STDERR_TAIL));
        let exact = "y".repeat(STDERR_TAIL);
        assert_eq!(tail(exact.as_bytes()), exact);
        // Counted in characters, not bytes
        let wide = "é".repeat(STDERR_TAIL * 2);
        assert_eq!(tail(wide.as_bytes()).chars().count(), STDERR_TAIL);
        assert_eq!(tail(b"  short  "), "short");
    }

    #[tokio::test]
    async fn test_missing_binary_is_extraction_error() {
        let decoder = FfmpegDecoder::new(&DecoderConfig {
            ffmpeg_path: "/nonexistent/ffmpeg".to_string(),
            ffprobe_path: "/nonexistent/ffprobe".to_string(),
        });
        let (tx, _rx) = mpsc::channel(1);
        let err = decoder
            .decode("in.mp4", &DecodePlan::Keyframes, tx)
            .await
            .unwrap_err();
        assert!(matches!(err, MatchError::Extraction(_)));

        let err = decoder.probe("in.mp4").await.unwrap_err();
        assert!(matches!(err, MatchError::Metadata(_)));
    }
}
