//! Frame matching library.
//!
//! Locates where a frame of one cut of a video appears in another cut:
//! - Metadata probing and frame extraction through a [`Decoder`]
//! - dHash perceptual fingerprints
//! - Coarse pool matching with confidence tiers and near-tie refinement

pub mod decoder;
pub mod error;
pub mod extractor;
pub mod hash;
pub mod matcher;
pub mod probe;
pub mod splitter;
pub mod types;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use decoder::{DecodePlan, Decoder, FfmpegDecoder};
pub use error::{MatchError, Result};
pub use extractor::FrameExtractor;
pub use hash::{dhash, hash_batch, similarity, DHash, FrameHash};
pub use matcher::{
    Classification, ConfidenceTier, CoarseMatch, FrameMatcher, MatchOutcome, MatchResult,
};
pub use splitter::ImageFormat;
pub use types::{ExtractedFrame, FramePosition, VideoMetadata, VideoSource};
