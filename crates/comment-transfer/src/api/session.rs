//! Authenticated session values.
//!
//! A session is never mutated. Refreshing produces a new value that the
//! caller threads through subsequent requests.

use chrono::{DateTime, Duration, Utc};
use shared::ApiCredentials;

/// Seconds before expiry at which a session is refreshed
pub const REFRESH_MARGIN_SECONDS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Unknown expiry means the token is used until the platform rejects it
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
            expires_at: None,
        }
    }

    pub fn from_credentials(credentials: &ApiCredentials) -> Self {
        Self::new(
            credentials.access_token.clone(),
            credentials.refresh_token.clone(),
        )
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// True once `now` is within the refresh margin of expiry
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => now + Duration::seconds(REFRESH_MARGIN_SECONDS) >= expires_at,
            None => false,
        }
    }

    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_without_expiry_never_refreshes() {
        let session = Session::new("token", None);
        assert!(!session.needs_refresh(Utc::now()));
        assert_eq!(session.bearer(), "Bearer token");
    }

    #[test]
    fn test_refresh_margin() {
        let now = Utc::now();
        let session = Session::new("token", Some("refresh".to_string()))
            .with_expiry(now + Duration::seconds(300));

        assert!(!session.needs_refresh(now));
        assert!(!session.needs_refresh(now + Duration::seconds(239)));
        assert!(session.needs_refresh(now + Duration::seconds(240)));
        assert!(session.needs_refresh(now + Duration::seconds(400)));
    }

    #[test]
    fn test_from_credentials() {
        let credentials = ApiCredentials {
            access_token: "abc".to_string(),
            refresh_token: None,
        };
        let session = Session::from_credentials(&credentials);
        assert_eq!(session.access_token, "abc");
        assert!(session.expires_at.is_none());
    }
}
