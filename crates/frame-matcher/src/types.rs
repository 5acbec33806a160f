//! Video and frame types passed between the extraction and matching stages.

use serde::{Deserialize, Serialize};

/// Stream facts derived once per asset
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub fps: f64,
    pub duration_seconds: f64,
    pub frame_count: u64,
    pub width: u32,
    pub height: u32,
}

impl VideoMetadata {
    /// Frame number shown at `timestamp`
    pub fn frame_at(&self, timestamp: f64) -> u64 {
        (timestamp.max(0.0) * self.fps).round() as u64
    }

    /// Presentation time of `frame_number`
    pub fn time_of(&self, frame_number: u64) -> f64 {
        frame_number as f64 / self.fps
    }

    /// Last valid frame number
    pub fn last_frame(&self) -> u64 {
        self.frame_count.saturating_sub(1)
    }
}

/// A decodable video and what the probe learned about it
#[derive(Debug, Clone)]
pub struct VideoSource {
    pub url: String,
    pub metadata: VideoMetadata,
}

impl VideoSource {
    pub fn new(url: impl Into<String>, metadata: VideoMetadata) -> Self {
        Self {
            url: url.into(),
            metadata,
        }
    }
}

/// Where a decoded frame sits in its video.
///
/// Each extraction mode knows exactly one of the two; the other is derived
/// through the stream's frame rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FramePosition {
    Frame(u64),
    Time(f64),
}

impl FramePosition {
    pub fn frame_number(&self, fps: f64) -> u64 {
        match *self {
            FramePosition::Frame(n) => n,
            FramePosition::Time(t) => (t.max(0.0) * fps).round() as u64,
        }
    }

    pub fn timestamp(&self, fps: f64) -> f64 {
        match *self {
            FramePosition::Frame(n) => n as f64 / fps,
            FramePosition::Time(t) => t,
        }
    }
}

/// One decoded image record.
///
/// Consumed by the hash engine; the image buffer is never kept after hashing.
#[derive(Debug, Clone)]
pub struct ExtractedFrame {
    pub position: FramePosition,
    pub image: Vec<u8>,
}

impl ExtractedFrame {
    pub fn at_frame(frame_number: u64, image: Vec<u8>) -> Self {
        Self {
            position: FramePosition::Frame(frame_number),
            image,
        }
    }

    pub fn at_time(timestamp: f64, image: Vec<u8>) -> Self {
        Self {
            position: FramePosition::Time(timestamp),
            image,
        }
    }
}
