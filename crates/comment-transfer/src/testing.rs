//! In-memory asset API that records every write.

use crate::api::{AssetApi, NewComment, Session};
use crate::error::{ApiError, Result};
use chrono::{Duration, Utc};
use shared::SourceComment;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::time::Instant;

/// One recorded create-comment call
#[derive(Debug, Clone)]
pub struct CreatedComment {
    pub asset_id: String,
    pub comment: NewComment,
    /// Access token the call was made with
    pub token: String,
    pub at: Instant,
}

#[derive(Debug, Default)]
pub struct MemoryAssetApi {
    urls: HashMap<String, String>,
    comments: HashMap<String, Vec<SourceComment>>,
    failing_texts: HashSet<String>,
    rejected_tokens: HashSet<String>,
    created: Mutex<Vec<CreatedComment>>,
    refreshes: AtomicUsize,
    token_lifetime: Option<Duration>,
    refresh_limit: Option<usize>,
}

impl MemoryAssetApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `url` as the decodable rendition of `asset_id`
    pub fn with_asset(mut self, asset_id: &str, url: &str) -> Self {
        self.urls.insert(asset_id.to_string(), url.to_string());
        self
    }

    pub fn with_comments(mut self, asset_id: &str, comments: Vec<SourceComment>) -> Self {
        self.comments.insert(asset_id.to_string(), comments);
        self
    }

    /// Reject create-comment calls whose text ends with `text`
    pub fn failing_text(mut self, text: &str) -> Self {
        self.failing_texts.insert(text.to_string());
        self
    }

    /// Treat `token` as revoked
    pub fn rejecting_token(mut self, token: &str) -> Self {
        self.rejected_tokens.insert(token.to_string());
        self
    }

    /// Lifetime of refreshed tokens (default one hour)
    pub fn token_lifetime(mut self, seconds: i64) -> Self {
        self.token_lifetime = Some(Duration::seconds(seconds));
        self
    }

    /// Reject refreshes after the first `limit`
    pub fn refresh_limit(mut self, limit: usize) -> Self {
        self.refresh_limit = Some(limit);
        self
    }

    /// Number of successful session refreshes
    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> Vec<CreatedComment> {
        self.created.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn authorize(&self, session: &Session) -> Result<()> {
        if self.rejected_tokens.contains(&session.access_token) {
            return Err(ApiError::Auth("token revoked".to_string()));
        }
        Ok(())
    }
}

impl AssetApi for MemoryAssetApi {
    async fn resolve_video_url(&self, session: &Session, asset_id: &str) -> Result<String> {
        self.authorize(session)?;
        self.urls
            .get(asset_id)
            .cloned()
            .ok_or_else(|| ApiError::NoProxy(asset_id.to_string()))
    }

    async fn list_comments(&self, session: &Session, asset_id: &str) -> Result<Vec<SourceComment>> {
        self.authorize(session)?;
        Ok(self.comments.get(asset_id).cloned().unwrap_or_default())
    }

    async fn create_comment(
        &self,
        session: &Session,
        asset_id: &str,
        comment: &NewComment,
    ) -> Result<String> {
        self.authorize(session)?;
        if self.failing_texts.iter().any(|t| comment.text.ends_with(t)) {
            return Err(ApiError::Status {
                status: 422,
                body: "comment rejected".to_string(),
            });
        }

        let mut created = self
            .created
            .lock()
            .map_err(|_| ApiError::Request("recorder poisoned".to_string()))?;
        created.push(CreatedComment {
            asset_id: asset_id.to_string(),
            comment: comment.clone(),
            token: session.access_token.clone(),
            at: Instant::now(),
        });
        Ok(format!("created-{}", created.len()))
    }

    /// Issues `refreshed-<n>` tokens; a revoked refresh token or one past
    /// the refresh limit is rejected
    async fn refresh(&self, session: &Session) -> Result<Session> {
        let Some(refresh_token) = session.refresh_token.clone() else {
            return Err(ApiError::Auth(
                "session expired and no refresh token is available".to_string(),
            ));
        };
        if self.rejected_tokens.contains(&refresh_token) {
            return Err(ApiError::Auth("refresh rejected: token revoked".to_string()));
        }
        if self
            .refresh_limit
            .is_some_and(|limit| self.refreshes() >= limit)
        {
            return Err(ApiError::Auth("refresh rejected: grant used up".to_string()));
        }

        let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        let lifetime = self.token_lifetime.unwrap_or_else(|| Duration::hours(1));
        Ok(Session::new(format!("refreshed-{}", n), Some(refresh_token))
            .with_expiry(Utc::now() + lifetime))
    }
}
