//! Frame extraction strategies.
//!
//! All strategies drive a [`Decoder`]; they differ in what they ask it to
//! decode and which position (frame number or timestamp) they can vouch for.

use crate::decoder::{DecodePlan, Decoder};
use crate::error::{MatchError, Result};
use crate::hash::{hash_batch, FrameHash};
use crate::types::{ExtractedFrame, VideoMetadata, VideoSource};
use futures::stream::{self, StreamExt, TryStreamExt};
use shared::config::ExtractionConfig;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// A time range to decode, in seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeWindow {
    pub start: f64,
    pub end: f64,
}

/// Extracts frames through a decoder under a fixed configuration
pub struct FrameExtractor<D> {
    decoder: D,
    config: ExtractionConfig,
}

impl<D: Decoder> FrameExtractor<D> {
    pub fn new(decoder: D, config: ExtractionConfig) -> Self {
        Self { decoder, config }
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Fingerprint extracted frames under the configured hashing cap
    pub async fn hash_frames(&self, frames: Vec<ExtractedFrame>) -> Result<Vec<FrameHash>> {
        hash_batch(frames, self.config.hash_concurrency).await
    }

    /// Probe `url` and pair it with its metadata
    pub async fn open(&self, url: &str) -> Result<VideoSource> {
        let metadata = self.decoder.probe(url).await?;
        if metadata.frame_count == 0 {
            return Err(MatchError::Metadata(format!("{} has no frames", url)));
        }
        Ok(VideoSource::new(url, metadata))
    }

    /// Extract the requested frames with whichever strategy suits the count.
    ///
    /// Short lists use parallel seeks; long lists use chunked select decodes.
    pub async fn extract_source_frames(
        &self,
        url: &str,
        frame_numbers: &[u64],
        fps: f64,
    ) -> Result<Vec<ExtractedFrame>> {
        if frame_numbers.len() > self.config.chunk_threshold {
            self.extract_chunked(url, frame_numbers).await
        } else {
            self.extract_at_frames(url, frame_numbers, fps, self.config.concurrency)
                .await
        }
    }

    /// Sparse seek extraction.
    ///
    /// One decode per requested frame, at most `concurrency` at a time.
    /// Results arrive in completion order, each tagged with its frame number.
    pub async fn extract_at_frames(
        &self,
        url: &str,
        frame_numbers: &[u64],
        fps: f64,
        concurrency: usize,
    ) -> Result<Vec<ExtractedFrame>> {
        debug!(frames = frame_numbers.len(), concurrency, "Sparse seek extraction");

        stream::iter(frame_numbers.iter().copied())
            .map(|frame_number| async move {
                let plan = DecodePlan::Seek {
                    timestamp: frame_number as f64 / fps,
                };
                let image = self
                    .collect(url, &plan)
                    .await?
                    .into_iter()
                    .next()
                    .ok_or_else(|| {
                        MatchError::Extraction(format!("no frame decoded at frame {}", frame_number))
                    })?;
                Ok::<_, MatchError>(ExtractedFrame::at_frame(frame_number, image))
            })
            .buffer_unordered(concurrency.max(1))
            .try_collect()
            .await
    }

    /// Chunked batch extraction.
    ///
    /// Requests above the chunk threshold are split into ordered chunks that
    /// are decoded one after another with a select filter.
    pub async fn extract_chunked(
        &self,
        url: &str,
        frame_numbers: &[u64],
    ) -> Result<Vec<ExtractedFrame>> {
        let mut frames = Vec::with_capacity(frame_numbers.len());
        let chunks = chunk_requests(frame_numbers, self.config.chunk_threshold);
        let total = chunks.len();

        for (index, chunk) in chunks.into_iter().enumerate() {
            debug!(chunk = index + 1, total, frames = chunk.len(), "Decoding frame chunk");
            frames.extend(self.extract_selected(url, chunk).await?);
        }

        Ok(frames)
    }

    /// One select-filter decode of an already sorted, deduplicated list
    async fn extract_selected(&self, url: &str, frame_numbers: Vec<u64>) -> Result<Vec<ExtractedFrame>> {
        let plan = DecodePlan::Select {
            frames: frame_numbers.clone(),
        };
        let records = self.collect(url, &plan).await?;

        if records.len() != frame_numbers.len() {
            warn!(
                requested = frame_numbers.len(),
                decoded = records.len(),
                "Select decode returned a different number of frames"
            );
        }

        Ok(frame_numbers
            .into_iter()
            .zip(records)
            .map(|(n, image)| ExtractedFrame::at_frame(n, image))
            .collect())
    }

    /// Interval extraction: every `interval_frames`-th frame in one pass.
    pub async fn extract_every(&self, url: &str, interval_frames: u64) -> Result<Vec<ExtractedFrame>> {
        let interval = interval_frames.max(1);
        let records = self.collect(url, &DecodePlan::Every { every: interval }).await?;

        Ok(records
            .into_iter()
            .enumerate()
            .map(|(index, image)| ExtractedFrame::at_frame(index as u64 * interval, image))
            .collect())
    }

    /// Natural-keyframe extraction.
    ///
    /// Decode order alone does not reveal where keyframes sit, so timestamps
    /// are spread uniformly over the duration. This is an approximation and
    /// not frame-exact.
    pub async fn extract_keyframes(&self, source: &VideoSource) -> Result<Vec<ExtractedFrame>> {
        let records = self.collect(&source.url, &DecodePlan::Keyframes).await?;
        let count = records.len();
        let duration = source.metadata.duration_seconds;

        Ok(records
            .into_iter()
            .enumerate()
            .map(|(index, image)| {
                ExtractedFrame::at_time(index as f64 * duration / count as f64, image)
            })
            .collect())
    }

    /// Full decimated extraction with inline hashing.
    ///
    /// One long-running decode samples every `decimation_factor`-th frame into
    /// a bounded queue; the drain side hashes small batches as they arrive, so
    /// only fingerprints accumulate. Hashes come out in decode order.
    pub async fn extract_hashed(
        &self,
        source: &VideoSource,
        decimation_factor: u64,
    ) -> Result<Vec<FrameHash>> {
        let factor = decimation_factor.max(1);
        let batch_size = self.config.hash_batch_size.max(1);
        let hash_concurrency = self.config.hash_concurrency;
        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(self.config.queue_capacity.max(1));

        info!(
            url = %source.url,
            factor,
            expected = expected_samples(&source.metadata, factor),
            "Hashing decimated frame pool"
        );

        let plan = DecodePlan::Every { every: factor };
        let decode = self.decoder.decode(&source.url, &plan, tx);

        let drain = async move {
            let mut hashes = Vec::new();
            let mut index = 0u64;
            let mut batch = Vec::with_capacity(batch_size);

            while let Some(first) = rx.recv().await {
                batch.push(first);
                while batch.len() < batch_size {
                    match rx.try_recv() {
                        Ok(record) => batch.push(record),
                        Err(_) => break,
                    }
                }

                let frames: Vec<ExtractedFrame> = batch
                    .drain(..)
                    .map(|image| {
                        let frame = ExtractedFrame::at_frame(index * factor, image);
                        index += 1;
                        frame
                    })
                    .collect();
                hashes.extend(hash_batch(frames, hash_concurrency).await?);
            }

            Ok::<_, MatchError>(hashes)
        };

        // Drain completes after the decoder exits and drops its sender
        let (decoded, hashed) = tokio::join!(decode, drain);
        let hashes = hashed?;
        decoded?;

        info!(url = %source.url, hashes = hashes.len(), "Frame pool hashed");
        Ok(hashes)
    }

    /// Time-window refinement extraction.
    ///
    /// Builds a window of `±window_seconds` around each timestamp, merges
    /// windows closer than the configured gap, then decodes each merged
    /// window with bounded parallelism.
    pub async fn extract_windows(
        &self,
        source: &VideoSource,
        timestamps: &[f64],
        window_seconds: f64,
        concurrency: usize,
    ) -> Result<Vec<ExtractedFrame>> {
        let windows = merge_windows(timestamps, window_seconds, self.config.merge_gap_seconds);
        let fps = source.metadata.fps;
        debug!(
            requested = timestamps.len(),
            windows = windows.len(),
            "Window refinement extraction"
        );

        let per_window: Vec<Vec<ExtractedFrame>> = stream::iter(windows)
            .map(|window| async move {
                // Align to a frame boundary so tags match presentation times
                let first_frame = (window.start * fps).ceil().max(0.0) as u64;
                let start = first_frame as f64 / fps;
                let plan = DecodePlan::Window {
                    start,
                    duration: (window.end - start).max(1.0 / fps),
                };
                let records = self.collect(&source.url, &plan).await?;
                Ok::<_, MatchError>(
                    records
                        .into_iter()
                        .enumerate()
                        .map(|(i, image)| {
                            ExtractedFrame::at_time((first_frame + i as u64) as f64 / fps, image)
                        })
                        .collect(),
                )
            })
            .buffer_unordered(concurrency.max(1))
            .try_collect()
            .await?;

        Ok(per_window.into_iter().flatten().collect())
    }

    /// Run one decode and gather every record it emits
    async fn collect(&self, url: &str, plan: &DecodePlan) -> Result<Vec<Vec<u8>>> {
        let (tx, mut rx) = mpsc::channel(self.config.queue_capacity.max(1));

        let decode = self.decoder.decode(url, plan, tx);
        let gather = async move {
            let mut records = Vec::new();
            while let Some(record) = rx.recv().await {
                records.push(record);
            }
            records
        };

        let (decoded, records) = tokio::join!(decode, gather);
        decoded?;
        Ok(records)
    }
}

/// Sort, deduplicate and split frame requests into chunks of at most `limit`
pub fn chunk_requests(frame_numbers: &[u64], limit: usize) -> Vec<Vec<u64>> {
    let mut sorted = frame_numbers.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    sorted
        .chunks(limit.max(1))
        .map(|chunk| chunk.to_vec())
        .collect()
}

/// Build `±window` intervals and merge those within `gap` of each other
pub fn merge_windows(timestamps: &[f64], window: f64, gap: f64) -> Vec<TimeWindow> {
    let mut windows: Vec<TimeWindow> = timestamps
        .iter()
        .filter(|t| t.is_finite())
        .map(|&t| TimeWindow {
            start: (t - window).max(0.0),
            end: t + window,
        })
        .collect();
    windows.sort_by(|a, b| a.start.total_cmp(&b.start));

    let mut merged: Vec<TimeWindow> = Vec::with_capacity(windows.len());
    for window in windows {
        match merged.last_mut() {
            Some(last) if window.start - last.end <= gap => {
                last.end = last.end.max(window.end);
            }
            _ => merged.push(window),
        }
    }

    merged
}

/// Expected fingerprint count of a decimated pass
pub fn expected_samples(metadata: &VideoMetadata, decimation_factor: u64) -> u64 {
    let factor = decimation_factor.max(1);
    metadata.frame_count.div_ceil(factor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{codeword, ScriptedDecoder, ScriptedVideo};
    use crate::types::FramePosition;
    use std::collections::BTreeMap;

    #[test]
    fn test_chunk_requests_sorts_and_dedups() {
        let chunks = chunk_requests(&[9, 3, 3, 7, 1], 2);
        assert_eq!(chunks, vec![vec![1, 3], vec![7, 9]]);
    }

    #[test]
    fn test_chunk_requests_partitions_250() {
        let requests: Vec<u64> = (0..250).map(|i| i * 4).collect();
        let chunks = chunk_requests(&requests, 100);
        let sizes: Vec<usize> = chunks.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![100, 100, 50]);
        assert_eq!(chunks.concat(), requests);
    }

    #[test]
    fn test_merge_windows_joins_nearby_requests() {
        let windows = merge_windows(&[10.0, 12.5, 30.0, 1.0], 1.0, 3.0);
        assert_eq!(
            windows,
            vec![
                TimeWindow { start: 0.0, end: 2.0 },
                TimeWindow { start: 9.0, end: 13.5 },
                TimeWindow { start: 29.0, end: 31.0 },
            ]
        );
    }

    #[test]
    fn test_merge_windows_without_gap_keeps_separate() {
        let windows = merge_windows(&[5.0, 9.0], 1.0, 0.0);
        assert_eq!(windows.len(), 2);
        assert!(merge_windows(&[], 1.0, 3.0).is_empty());
    }

    #[test]
    fn test_expected_samples() {
        let meta = VideoMetadata {
            fps: 24.0,
            duration_seconds: 10.0,
            frame_count: 241,
            width: 16,
            height: 9,
        };
        assert_eq!(expected_samples(&meta, 1), 241);
        assert_eq!(expected_samples(&meta, 2), 121);
        assert_eq!(expected_samples(&meta, 0), 241);
    }

    fn scripted(url: &str, frame_count: u64) -> FrameExtractor<ScriptedDecoder> {
        let decoder =
            ScriptedDecoder::new().with_video(url, ScriptedVideo::new(24.0, frame_count, |f| f % 128));
        FrameExtractor::new(decoder, ExtractionConfig::default())
    }

    fn by_frame(frames: Vec<ExtractedFrame>) -> BTreeMap<u64, Vec<u8>> {
        frames
            .into_iter()
            .map(|f| (f.position.frame_number(24.0), f.image))
            .collect()
    }

    #[tokio::test]
    async fn test_chunked_matches_unchunked() {
        let extractor = scripted("src.mp4", 1200);
        let requests: Vec<u64> = (0..250).map(|i| i * 4).collect();

        let chunked = extractor.extract_chunked("src.mp4", &requests).await.unwrap();
        let selects: Vec<usize> = extractor
            .decoder
            .plans()
            .into_iter()
            .filter_map(|(_, plan)| match plan {
                DecodePlan::Select { frames } => Some(frames.len()),
                _ => None,
            })
            .collect();
        assert_eq!(selects, vec![100, 100, 50]);

        let mut seeked = Vec::new();
        for chunk in requests.chunks(100) {
            seeked.extend(
                extractor
                    .extract_at_frames("src.mp4", chunk, 24.0, 4)
                    .await
                    .unwrap(),
            );
        }

        assert_eq!(by_frame(chunked), by_frame(seeked));
    }

    #[tokio::test]
    async fn test_source_frames_pick_strategy_by_count() {
        let extractor = scripted("src.mp4", 1200);

        let few: Vec<u64> = (0..20).collect();
        extractor.extract_source_frames("src.mp4", &few, 24.0).await.unwrap();
        assert!(extractor
            .decoder
            .plans()
            .iter()
            .all(|(_, p)| matches!(p, DecodePlan::Seek { .. })));

        let many: Vec<u64> = (0..101).collect();
        let frames = extractor.extract_source_frames("src.mp4", &many, 24.0).await.unwrap();
        assert_eq!(frames.len(), 101);
        assert!(extractor
            .decoder
            .plans()
            .iter()
            .any(|(_, p)| matches!(p, DecodePlan::Select { .. })));
    }

    #[tokio::test]
    async fn test_decimated_pool_count_and_positions() {
        let extractor = scripted("target.mp4", 241);
        let source = extractor.open("target.mp4").await.unwrap();

        let hashes = extractor.extract_hashed(&source, 2).await.unwrap();
        assert_eq!(hashes.len() as u64, expected_samples(&source.metadata, 2));
        for (i, hash) in hashes.iter().enumerate() {
            assert_eq!(hash.position, FramePosition::Frame(i as u64 * 2));
            assert!((hash.position.timestamp(24.0) - (i as f64 * 2.0 / 24.0)).abs() < 1e-9);
            assert_eq!(hash.bits, codeword((i as u64 * 2) % 128));
        }
    }

    #[tokio::test]
    async fn test_undecimated_pool_has_every_frame() {
        let extractor = scripted("target.mp4", 100);
        let source = extractor.open("target.mp4").await.unwrap();

        let hashes = extractor.extract_hashed(&source, 1).await.unwrap();
        assert_eq!(hashes.len(), 100);
        for pair in hashes.windows(2) {
            let step = pair[1].position.timestamp(24.0) - pair[0].position.timestamp(24.0);
            assert!((step - 1.0 / 24.0).abs() < 1e-9);
        }
        assert_eq!(hashes[0].position, FramePosition::Frame(0));
        assert_eq!(hashes[99].position, FramePosition::Frame(99));
        assert_eq!(hashes[99].bits, codeword(99));
    }

    #[tokio::test]
    async fn test_windows_are_tagged_with_presentation_time() {
        let extractor = scripted("target.mp4", 480);
        let source = extractor.open("target.mp4").await.unwrap();

        let frames = extractor
            .extract_windows(&source, &[5.0, 5.5, 15.0], 0.5, 2)
            .await
            .unwrap();
        let hashes = extractor.hash_frames(frames).await.unwrap();

        // Merged into [4.5, 6.0] and [14.5, 15.5]
        assert_eq!(hashes.len(), 36 + 24);
        for hash in hashes {
            let frame = hash.position.frame_number(24.0);
            assert_eq!(hash.bits, codeword(frame % 128));
        }
    }

    #[tokio::test]
    async fn test_keyframes_spread_over_duration() {
        let extractor = scripted("target.mp4", 240);
        let source = extractor.open("target.mp4").await.unwrap();

        let frames = extractor.extract_keyframes(&source).await.unwrap();
        assert_eq!(frames.len(), 20);
        assert_eq!(frames[1].position, FramePosition::Time(0.5));
    }

    #[tokio::test]
    async fn test_unknown_video_fails_to_open() {
        let extractor = scripted("target.mp4", 240);
        let err = extractor.open("missing.mp4").await.unwrap_err();
        assert!(matches!(err, MatchError::Metadata(_)));
    }
}
