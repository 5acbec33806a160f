//! Failures talking to the external asset platform.

/// Errors raised by an [`AssetApi`](crate::api::AssetApi)
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Credentials are missing, invalid or expired; the caller must re-authenticate
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The asset has neither a transcoded nor an original rendition to decode
    #[error("asset {0} has no decodable rendition")]
    NoProxy(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Transport failure (connect, timeout, body read)
    #[error("request error: {0}")]
    Request(String),

    #[error("request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unreadable response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn is_auth(&self) -> bool {
        matches!(self, ApiError::Auth(_))
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;
