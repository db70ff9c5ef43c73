//! High-level Rentwise API client

use std::sync::Arc;

use reqwest::Method;
use serde::Serialize;

use crate::config::ClientConfig;
use crate::dispatcher::{Dispatcher, SessionListener};
use crate::error::{DispatchError, Result};
use crate::refresh::{HttpTokenRefresher, TokenRefresher};
use crate::request::{ApiRequest, ApiResponse, MultipartPart};
use crate::store::CredentialStore;

/// Rentwise API client
///
/// Resolves paths against the configured base URL and sends every request
/// through a [`Dispatcher`], so tokens are refreshed lazily and an ended
/// session surfaces as [`DispatchError::AuthExpired`].
#[derive(Clone)]
pub struct ApiClient {
    config: Arc<ClientConfig>,
    dispatcher: Arc<Dispatcher>,
}

impl ApiClient {
    /// Create a client that refreshes tokens at the configured endpoint
    pub fn new(config: ClientConfig, store: Arc<dyn CredentialStore>) -> Result<Self> {
        Self::builder(config, store).build()
    }

    pub fn builder(config: ClientConfig, store: Arc<dyn CredentialStore>) -> ApiClientBuilder {
        ApiClientBuilder {
            config,
            store,
            refresher: None,
            listener: None,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        self.dispatcher.store()
    }

    /// Where the calling layer should send the user after `AuthExpired`
    pub fn login_url(&self) -> String {
        self.config.resolve_url(&self.config.login_url)
    }

    /// Dispatch a request; a relative URL is joined onto the base URL
    pub async fn request(&self, request: ApiRequest) -> Result<ApiResponse> {
        let url = self.config.resolve_url(request.url());
        self.dispatcher.dispatch(request.with_url(url)).await
    }

    pub async fn get(&self, path: &str) -> Result<ApiResponse> {
        self.request(ApiRequest::get(path)).await
    }

    pub async fn delete(&self, path: &str) -> Result<ApiResponse> {
        self.request(ApiRequest::delete(path)).await
    }

    pub async fn post_json<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<ApiResponse> {
        self.send_json(Method::POST, path, body).await
    }

    pub async fn put_json<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<ApiResponse> {
        self.send_json(Method::PUT, path, body).await
    }

    pub async fn patch_json<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<ApiResponse> {
        self.send_json(Method::PATCH, path, body).await
    }

    /// multipart/form-data POST, e.g. document or photo uploads
    pub async fn upload(&self, path: &str, parts: Vec<MultipartPart>) -> Result<ApiResponse> {
        self.request(ApiRequest::post(path).multipart(parts)).await
    }

    async fn send_json<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: &T,
    ) -> Result<ApiResponse> {
        let request = ApiRequest::new(method, path)
            .json(body)
            .map_err(|e| DispatchError::InvalidRequest(format!("unserializable JSON body: {}", e)))?;
        self.request(request).await
    }
}

/// Builder for [`ApiClient`] with optional refresher and listener overrides
pub struct ApiClientBuilder {
    config: ClientConfig,
    store: Arc<dyn CredentialStore>,
    refresher: Option<Arc<dyn TokenRefresher>>,
    listener: Option<Arc<dyn SessionListener>>,
}

impl ApiClientBuilder {
    pub fn refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn SessionListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn build(self) -> Result<ApiClient> {
        let http_client = reqwest::Client::builder()
            .timeout(self.config.timeout)
            .connect_timeout(self.config.connect_timeout)
            .user_agent(&self.config.user_agent)
            .build()
            .map_err(DispatchError::Client)?;

        let refresher: Arc<dyn TokenRefresher> = match self.refresher {
            Some(refresher) => refresher,
            None => Arc::new(HttpTokenRefresher::new(
                http_client.clone(),
                self.config.refresh_url(),
            )),
        };

        let mut dispatcher = Dispatcher::new(http_client, self.store, refresher)
            .with_policy(self.config.refresh_policy)
            .with_expiry_leeway(self.config.expiry_leeway);
        if let Some(listener) = self.listener {
            dispatcher = dispatcher.with_listener(listener);
        }

        Ok(ApiClient {
            config: Arc::new(self.config),
            dispatcher: Arc::new(dispatcher),
        })
    }
}
