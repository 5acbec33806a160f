//! Scripted in-memory decoder.
//!
//! Each registered video is a frame count, a frame rate and a function
//! from frame number to a codeword index. Codeword `n` renders as a 9x8
//! grayscale PNG whose dHash is exactly [`codeword`]`(n)`, so distances
//! between rendered frames are known up front: distinct indices below 64
//! are 32 bits apart, and `n + 64` is the bitwise complement of `n`.

use crate::decoder::{DecodePlan, Decoder};
use crate::error::{MatchError, Result};
use crate::hash::DHash;
use crate::types::VideoMetadata;
use image::{DynamicImage, GrayImage, ImageOutputFormat, Luma};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// A video the scripted decoder can serve
#[derive(Debug, Clone, Copy)]
pub struct ScriptedVideo {
    pub fps: f64,
    pub frame_count: u64,
    pub content: fn(u64) -> u64,
    pub keyframe_interval: u64,
}

impl ScriptedVideo {
    pub fn new(fps: f64, frame_count: u64, content: fn(u64) -> u64) -> Self {
        Self {
            fps,
            frame_count,
            content,
            keyframe_interval: 12,
        }
    }

    fn frames_for(&self, plan: &DecodePlan) -> Vec<u64> {
        let count = self.frame_count;
        match plan {
            DecodePlan::Seek { timestamp } => {
                let frame = (timestamp.max(0.0) * self.fps).round() as u64;
                (frame < count).then_some(frame).into_iter().collect()
            }
            DecodePlan::Select { frames } => frames.iter().copied().filter(|&f| f < count).collect(),
            DecodePlan::Every { every } => (0..count).step_by((*every).max(1) as usize).collect(),
            DecodePlan::Keyframes => (0..count)
                .step_by(self.keyframe_interval.max(1) as usize)
                .collect(),
            DecodePlan::Window { start, duration } => {
                let first = (start.max(0.0) * self.fps).round() as u64;
                let end = start + duration;
                (first..count)
                    .take_while(|&f| (f as f64 / self.fps) < end - 1e-9)
                    .collect()
            }
        }
    }
}

/// In-memory [`Decoder`] serving [`ScriptedVideo`]s by URL
#[derive(Debug, Default)]
pub struct ScriptedDecoder {
    videos: HashMap<String, ScriptedVideo>,
    plans: Mutex<Vec<(String, DecodePlan)>>,
}

impl ScriptedDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_video(mut self, url: &str, video: ScriptedVideo) -> Self {
        self.videos.insert(url.to_string(), video);
        self
    }

    /// Every plan decoded so far, in call order
    pub fn plans(&self) -> Vec<(String, DecodePlan)> {
        self.plans.lock().map(|p| p.clone()).unwrap_or_default()
    }

    fn video(&self, url: &str) -> Option<&ScriptedVideo> {
        self.videos.get(url)
    }
}

impl Decoder for ScriptedDecoder {
    async fn probe(&self, url: &str) -> Result<VideoMetadata> {
        let video = self
            .video(url)
            .ok_or_else(|| MatchError::Metadata(format!("no video stream at {}", url)))?;
        Ok(VideoMetadata {
            fps: video.fps,
            duration_seconds: video.frame_count as f64 / video.fps,
            frame_count: video.frame_count,
            width: 9,
            height: 8,
        })
    }

    async fn decode(
        &self,
        url: &str,
        plan: &DecodePlan,
        sink: mpsc::Sender<Vec<u8>>,
    ) -> Result<()> {
        if let Ok(mut plans) = self.plans.lock() {
            plans.push((url.to_string(), plan.clone()));
        }

        let video = *self
            .video(url)
            .ok_or_else(|| MatchError::Extraction(format!("cannot open {}", url)))?;

        for frame in video.frames_for(plan) {
            let record = render_png(codeword((video.content)(frame)))?;
            sink.send(record).await.map_err(|_| {
                MatchError::Extraction("frame consumer stopped before decode finished".to_string())
            })?;
        }
        Ok(())
    }
}

/// The 64-bit Hadamard codeword for index `n`; `n + 64` is its complement
pub fn codeword(n: u64) -> DHash {
    let n = n % 128;
    if n >= 64 {
        return DHash(!codeword(n - 64).0);
    }

    let mut bits = 0u64;
    for j in 0..64u64 {
        bits <<= 1;
        if (n & j).count_ones() % 2 == 1 {
            bits |= 1;
        }
    }
    DHash(bits)
}

/// Render a 9x8 grayscale PNG whose dHash is `hash`
pub fn render_png(hash: DHash) -> Result<Vec<u8>> {
    let mut image = GrayImage::new(9, 8);
    for y in 0..8u32 {
        let mut value: i32 = 128;
        image.put_pixel(0, y, Luma([value as u8]));
        for x in 0..8u32 {
            let bit = (hash.0 >> (63 - (y * 8 + x))) & 1;
            value += if bit == 1 { -10 } else { 10 };
            image.put_pixel(x + 1, y, Luma([value as u8]));
        }
    }

    let mut buf = Vec::new();
    DynamicImage::ImageLuma8(image)
        .write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)
        .map_err(|e| MatchError::Hash(format!("cannot encode test frame: {}", e)))?;
    Ok(buf)
}
