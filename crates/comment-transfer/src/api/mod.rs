//! External asset platform access.
//!
//! This module provides the [`AssetApi`] seam, an immutable [`Session`] and a
//! retry-enabled HTTP implementation.

pub mod client;
pub mod session;
pub mod types;

pub use client::HttpAssetClient;
pub use session::Session;
pub use types::*;

use crate::error::Result;
use chrono::Utc;
use shared::SourceComment;
use std::future::Future;

/// A comment to create on the target asset
#[derive(Debug, Clone, PartialEq)]
pub struct NewComment {
    pub text: String,
    pub frame_number: u64,
}

/// Operations the worker needs from the asset platform
pub trait AssetApi: Send + Sync {
    /// Decodable URL for `asset_id`
    fn resolve_video_url(
        &self,
        session: &Session,
        asset_id: &str,
    ) -> impl Future<Output = Result<String>> + Send;

    /// Frame-pinned comments on `asset_id`
    fn list_comments(
        &self,
        session: &Session,
        asset_id: &str,
    ) -> impl Future<Output = Result<Vec<SourceComment>>> + Send;

    /// Create one comment; returns the created comment's id
    fn create_comment(
        &self,
        session: &Session,
        asset_id: &str,
        comment: &NewComment,
    ) -> impl Future<Output = Result<String>> + Send;

    /// Exchange the session's refresh token for a new session
    fn refresh(&self, session: &Session) -> impl Future<Output = Result<Session>> + Send;

    /// Return `session` as is, or a refreshed one when it is about to expire
    fn ensure_fresh(&self, session: Session) -> impl Future<Output = Result<Session>> + Send {
        async move {
            if session.needs_refresh(Utc::now()) {
                self.refresh(&session).await
            } else {
                Ok(session)
            }
        }
    }
}
