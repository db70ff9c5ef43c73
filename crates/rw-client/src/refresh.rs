//! Token refresh against the backend's refresh endpoint

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::RefreshError;
use crate::token::Token;

/// Exchanges a (possibly expired) token for a new one. Implementations make
/// a single attempt; retry policy belongs to the caller.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, token: &Token) -> Result<Token, RefreshError>;
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    token: &'a str,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    token: String,
}

/// `POST {refresh_url}` with `{"token": ...}`, expecting `{"token": ...}` back
#[derive(Debug, Clone)]
pub struct HttpTokenRefresher {
    http_client: reqwest::Client,
    refresh_url: String,
}

impl HttpTokenRefresher {
    pub fn new(http_client: reqwest::Client, refresh_url: impl Into<String>) -> Self {
        Self {
            http_client,
            refresh_url: refresh_url.into(),
        }
    }

    pub fn refresh_url(&self) -> &str {
        &self.refresh_url
    }
}

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(&self, token: &Token) -> Result<Token, RefreshError> {
        debug!(url = %self.refresh_url, "Requesting token refresh");

        let response = self
            .http_client
            .post(&self.refresh_url)
            .json(&RefreshRequest {
                token: token.as_str(),
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RefreshError::Rejected { status, body });
        }

        let body = response.bytes().await?;
        let parsed: RefreshResponse = serde_json::from_slice(&body)
            .map_err(|e| RefreshError::InvalidResponse(e.to_string()))?;

        if parsed.token.trim().is_empty() {
            return Err(RefreshError::InvalidResponse("empty token".to_string()));
        }

        Ok(Token::new(parsed.token))
    }
}
