//! Authenticated request dispatch with lazy token refresh.
//!
//! A dispatch moves through two token states. A **valid** token is attached
//! and the request goes out. An **expired** (or unreadable) token is first
//! exchanged at the refresh endpoint; success persists the new token and
//! continues with it, failure ends the session. The session also ends when
//! the server answers 401 to a request carrying a token we believed valid.
//!
//! Ending the session clears the credential store, notifies the
//! [`SessionListener`] once and returns [`DispatchError::AuthExpired`]. The
//! original request is never attempted after a failed refresh, and a 401 is
//! never followed by a second refresh.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use reqwest::StatusCode;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::RefreshPolicy;
use crate::error::{AuthExpiredReason, DispatchError, RefreshError, Result};
use crate::refresh::TokenRefresher;
use crate::request::{ApiRequest, ApiResponse};
use crate::store::CredentialStore;
use crate::token::Token;

/// Told when a session ends so the calling layer can route the user to the
/// login surface
pub trait SessionListener: Send + Sync {
    fn on_session_expired(&self, reason: &AuthExpiredReason);
}

/// Outcome of the most recent single-flight refresh, keyed by the token it
/// replaced
struct LastRefresh {
    stale: Token,
    generation: u64,
    outcome: std::result::Result<Token, AuthExpiredReason>,
}

pub struct Dispatcher {
    http_client: reqwest::Client,
    store: Arc<dyn CredentialStore>,
    refresher: Arc<dyn TokenRefresher>,
    listener: Option<Arc<dyn SessionListener>>,
    policy: RefreshPolicy,
    expiry_leeway: chrono::Duration,
    refresh_gate: Mutex<Option<LastRefresh>>,
    refresh_generation: AtomicU64,
}

impl Dispatcher {
    pub fn new(
        http_client: reqwest::Client,
        store: Arc<dyn CredentialStore>,
        refresher: Arc<dyn TokenRefresher>,
    ) -> Self {
        Self {
            http_client,
            store,
            refresher,
            listener: None,
            policy: RefreshPolicy::default(),
            expiry_leeway: chrono::Duration::zero(),
            refresh_gate: Mutex::new(None),
            refresh_generation: AtomicU64::new(0),
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn SessionListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn with_policy(mut self, policy: RefreshPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_expiry_leeway(mut self, leeway: std::time::Duration) -> Self {
        self.expiry_leeway = chrono::Duration::from_std(leeway).unwrap_or(chrono::Duration::MAX);
        self
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    pub fn policy(&self) -> RefreshPolicy {
        self.policy
    }

    /// Expired (or malformed), honouring the configured leeway
    pub fn is_expired(&self, token: &Token) -> bool {
        token.is_expired_with_leeway(self.expiry_leeway)
    }

    /// Exchange `token` for a new one and persist it
    pub async fn refresh(&self, token: &Token) -> std::result::Result<Token, RefreshError> {
        let fresh = self.refresher.refresh(token).await?;
        self.store.set(&fresh).await?;
        info!("Token refreshed");
        Ok(fresh)
    }

    /// Send `request` with the stored token
    pub async fn dispatch(&self, request: ApiRequest) -> Result<ApiResponse> {
        match self.store.get().await? {
            Some(token) => self.dispatch_with_token(token, request).await,
            None => Err(self.end_session(AuthExpiredReason::MissingCredentials).await),
        }
    }

    /// Send `request` with the caller's token, refreshing it first if expired
    pub async fn dispatch_with_token(&self, token: Token, request: ApiRequest) -> Result<ApiResponse> {
        let token = self.ensure_valid(token).await?;
        let method = request.method().clone();
        let url = request.url().to_string();

        debug!(%method, %url, "Dispatching request");

        let response = match request.build(&self.http_client, &token)?.send().await {
            Ok(response) => response,
            Err(source) => {
                error!(%method, %url, error = %source, "HTTP request failed");
                return Err(DispatchError::Transport { method, url, source });
            }
        };

        let status = response.status();
        if status.is_success() {
            return ApiResponse::read(response)
                .await
                .map_err(|source| DispatchError::Transport { method, url, source });
        }

        if status == StatusCode::UNAUTHORIZED {
            return Err(self.end_session(AuthExpiredReason::Unauthorized).await);
        }

        let body = response.text().await.unwrap_or_default();
        warn!(%method, %url, %status, "Request failed");
        Err(DispatchError::Status {
            method,
            url,
            status,
            body,
        })
    }

    async fn ensure_valid(&self, token: Token) -> Result<Token> {
        if !self.is_expired(&token) {
            return Ok(token);
        }

        debug!(policy = ?self.policy, "Token expired, refreshing before dispatch");

        match self.policy {
            RefreshPolicy::Independent => match self.refresh(&token).await {
                Ok(fresh) => Ok(fresh),
                Err(e) => Err(self.end_session(AuthExpiredReason::RefreshFailed(e.to_string())).await),
            },
            RefreshPolicy::SingleFlight => self.refresh_single_flight(token).await,
        }
    }

    async fn refresh_single_flight(&self, token: Token) -> Result<Token> {
        // Refreshes finishing after this point completed while we waited
        let observed = self.refresh_generation.load(Ordering::SeqCst);
        let mut last = self.refresh_gate.lock().await;

        if let Some(previous) = last.as_ref().filter(|previous| previous.stale == token) {
            match &previous.outcome {
                Ok(fresh) if !self.is_expired(fresh) => {
                    debug!("Reusing token refreshed by a concurrent dispatch");
                    return Ok(fresh.clone());
                }
                // Only callers queued behind the failed refresh share its
                // outcome; later dispatches end the session themselves
                Err(reason) if previous.generation > observed => {
                    return Err(DispatchError::AuthExpired {
                        reason: reason.clone(),
                    });
                }
                _ => {}
            }
        }

        let outcome = self
            .refresh(&token)
            .await
            .map_err(|e| AuthExpiredReason::RefreshFailed(e.to_string()));

        let generation = self.refresh_generation.fetch_add(1, Ordering::SeqCst) + 1;
        *last = Some(LastRefresh {
            stale: token,
            generation,
            outcome: outcome.clone(),
        });

        match outcome {
            Ok(fresh) => Ok(fresh),
            Err(reason) => Err(self.end_session(reason).await),
        }
    }

    /// Clear credentials, notify the listener and build the terminal error
    async fn end_session(&self, reason: AuthExpiredReason) -> DispatchError {
        warn!(%reason, "Session expired, clearing stored credentials");

        if let Err(e) = self.store.clear().await {
            warn!(error = %e, "Failed to clear stored credentials");
        }
        if let Some(listener) = &self.listener {
            listener.on_session_expired(&reason);
        }

        DispatchError::AuthExpired { reason }
    }
}
