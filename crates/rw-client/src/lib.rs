//! # Rentwise API client
//!
//! Authenticated request dispatch for the Rentwise backend. Every request
//! carries a bearer token; an expired token is exchanged once at the refresh
//! endpoint before the request goes out, and an unrecoverable auth failure
//! clears the stored credential and surfaces as
//! [`DispatchError::AuthExpired`].
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rw_client::{ApiClient, ClientConfig, MemoryCredentialStore, Token};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MemoryCredentialStore::with_token(Token::new("eyJ...")));
//! let client = ApiClient::new(ClientConfig::new("https://api.rentwise.example"), store)?;
//!
//! let response = client.get("/api/properties").await?;
//! let properties: serde_json::Value = response.json()?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod refresh;
pub mod request;
pub mod store;
pub mod token;

pub use client::{ApiClient, ApiClientBuilder};
pub use config::{ClientConfig, RefreshPolicy};
pub use dispatcher::{Dispatcher, SessionListener};
pub use error::{AuthExpiredReason, DecodeError, DispatchError, RefreshError, Result, StoreError};
pub use refresh::{HttpTokenRefresher, TokenRefresher};
pub use request::{ApiRequest, ApiResponse, MultipartPart, Payload};
pub use store::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use token::{Claims, Token, TokenExpiry};
