//! Asset platform HTTP client with retry logic.

use super::session::Session;
use super::types::*;
use super::{AssetApi, NewComment};
use crate::error::{ApiError, Result};
use chrono::Utc;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use shared::config::ApiConfig;
use shared::SourceComment;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Asset platform client
pub struct HttpAssetClient {
    /// HTTP client
    client: Client,
    /// Base URL, without a trailing slash
    base_url: String,
    /// Maximum retries for failed reads
    max_retries: u32,
    /// Base delay for retry (exponential backoff)
    retry_delay_ms: u64,
}

impl HttpAssetClient {
    /// Create a new client
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| ApiError::Request(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
            retry_delay_ms: config.retry_delay_ms,
        })
    }

    fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(
            self.retry_delay_ms
                .saturating_mul(2u64.saturating_pow(attempt)),
        )
    }

    /// Make a GET request with retry logic
    async fn get<T: DeserializeOwned>(&self, session: &Session, endpoint: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, endpoint);
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            debug!(url = %url, attempt = attempt + 1, "Making API request");

            match self
                .client
                .get(&url)
                .header(AUTHORIZATION, session.bearer())
                .send()
                .await
            {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return response.json::<T>().await.map_err(|e| {
                            warn!(url = %url, error = %e, "Failed to parse response");
                            ApiError::Decode(e.to_string())
                        });
                    }

                    let body = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Unknown error".to_string());
                    let error = status_error(status, &url, body);
                    if !is_retryable(status) {
                        return Err(error);
                    }

                    warn!(url = %url, status = %status, "Request failed");
                    last_error = Some(error);
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "Request error");
                    last_error = Some(ApiError::Request(e.to_string()));
                }
            }

            if attempt < self.max_retries {
                let delay = self.backoff(attempt);
                debug!(delay_ms = delay.as_millis() as u64, "Retrying after delay");
                sleep(delay).await;
            }
        }

        Err(last_error
            .unwrap_or_else(|| ApiError::Request(format!("{} failed after all retries", url))))
    }

    /// Make a single POST request. Writes are never retried.
    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        session: Option<&Session>,
        endpoint: &str,
        body: &B,
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, endpoint);
        debug!(url = %url, "Making API write");

        let mut request = self.client.post(&url).json(body);
        if let Some(session) = session {
            request = request.header(AUTHORIZATION, session.bearer());
        }

        let response = request
            .send()
            .await
            .map_err(|e| ApiError::Request(e.to_string()))?;
        let status = response.status();

        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(status_error(status, &url, body));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }
}

impl AssetApi for HttpAssetClient {
    async fn resolve_video_url(&self, session: &Session, asset_id: &str) -> Result<String> {
        info!(asset_id = %asset_id, "Resolving asset rendition");
        let asset: AssetResponse = self.get(session, &format!("/assets/{}", asset_id)).await?;

        asset
            .playable_url()
            .map(str::to_string)
            .ok_or_else(|| ApiError::NoProxy(asset_id.to_string()))
    }

    async fn list_comments(&self, session: &Session, asset_id: &str) -> Result<Vec<SourceComment>> {
        let mut comments = Vec::new();
        let mut page = 1u32;

        loop {
            let batch: Vec<CommentResponse> = self
                .get(
                    session,
                    &format!(
                        "/assets/{}/comments?page={}&page_size={}",
                        asset_id, page, COMMENT_PAGE_SIZE
                    ),
                )
                .await?;
            let count = batch.len();
            comments.extend(batch.into_iter().filter_map(CommentResponse::into_source_comment));

            if count < COMMENT_PAGE_SIZE {
                break;
            }
            page += 1;
        }

        info!(asset_id = %asset_id, comments = comments.len(), "Fetched frame comments");
        Ok(comments)
    }

    async fn create_comment(
        &self,
        session: &Session,
        asset_id: &str,
        comment: &NewComment,
    ) -> Result<String> {
        let request = CreateCommentRequest {
            text: comment.text.clone(),
            timestamp: comment.frame_number,
        };
        let created: CreateCommentResponse = self
            .post(
                Some(session),
                &format!("/assets/{}/comments", asset_id),
                &request,
            )
            .await?;
        Ok(created.id)
    }

    async fn refresh(&self, session: &Session) -> Result<Session> {
        let Some(refresh_token) = session.refresh_token.clone() else {
            return Err(ApiError::Auth(
                "session expired and no refresh token is available".to_string(),
            ));
        };

        let request = RefreshRequest {
            grant_type: "refresh_token".to_string(),
            refresh_token: refresh_token.clone(),
        };
        let token: TokenResponse = self
            .post(None, "/oauth/token", &request)
            .await
            .map_err(|e| match e {
                ApiError::Status { status: 400, body } => {
                    ApiError::Auth(format!("refresh rejected: {}", body))
                }
                other => other,
            })?;

        let mut next = Session::new(
            token.access_token,
            token.refresh_token.or(Some(refresh_token)),
        );
        if let Some(seconds) = token.expires_in {
            next = next.with_expiry(Utc::now() + chrono::Duration::seconds(seconds));
        }

        info!(expires_at = ?next.expires_at, "Session refreshed");
        Ok(next)
    }
}

/// Map a non-success status to an error
fn status_error(status: StatusCode, url: &str, body: String) -> ApiError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ApiError::Auth(format!("{} returned {}", url, status))
        }
        StatusCode::NOT_FOUND => ApiError::NotFound(url.to_string()),
        _ => ApiError::Status {
            status: status.as_u16(),
            body,
        },
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}
