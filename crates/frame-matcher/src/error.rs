//! Error taxonomy for probing, extraction and hashing.
//!
//! Every variant is fatal to the job that raised it; nothing here is retried.

/// Failures raised while turning a video into fingerprints
#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    /// The resource has no decodable video stream or an unusable frame rate
    #[error("metadata error: {0}")]
    Metadata(String),

    /// The decode subprocess could not be spawned or exited unsuccessfully
    #[error("extraction error: {0}")]
    Extraction(String),

    /// An image record could not be decoded or resized
    #[error("hash error: {0}")]
    Hash(String),
}

pub type Result<T> = std::result::Result<T, MatchError>;
