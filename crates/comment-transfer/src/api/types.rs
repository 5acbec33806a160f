//! Asset platform wire types.
//!
//! These types represent the JSON bodies exchanged with the asset API.

use serde::{Deserialize, Serialize};
use shared::SourceComment;

/// Page size used when listing comments
pub const COMMENT_PAGE_SIZE: usize = 100;

/// A video asset and its renditions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetResponse {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Uploaded file as-is
    #[serde(default)]
    pub original: Option<String>,
    #[serde(default)]
    pub h264_1080_best: Option<String>,
    #[serde(default)]
    pub h264_720: Option<String>,
    #[serde(default)]
    pub h264_540: Option<String>,
    #[serde(default)]
    pub h264_360: Option<String>,
}

impl AssetResponse {
    /// Best transcoded rendition, else the original upload
    pub fn playable_url(&self) -> Option<&str> {
        [
            &self.h264_1080_best,
            &self.h264_720,
            &self.h264_540,
            &self.h264_360,
            &self.original,
        ]
        .into_iter()
        .flatten()
        .map(String::as_str)
        .find(|url| !url.is_empty())
    }
}

/// A comment as listed on an asset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentResponse {
    pub id: String,
    #[serde(default)]
    pub text: Option<String>,
    /// Frame the comment is pinned to; absent for general comments
    #[serde(default)]
    pub timestamp: Option<u64>,
}

impl CommentResponse {
    /// Frame-pinned comments only
    pub fn into_source_comment(self) -> Option<SourceComment> {
        let frame = self.timestamp?;
        Some(SourceComment {
            id: self.id,
            text: self.text.unwrap_or_default(),
            source_frame_number: frame,
        })
    }
}

/// Body of a create-comment call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCommentRequest {
    pub text: String,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCommentResponse {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshRequest {
    pub grant_type: String,
    pub refresh_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime in seconds
    #[serde(default)]
    pub expires_in: Option<i64>,
}
