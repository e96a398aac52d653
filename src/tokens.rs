use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use url::Url;

use crate::error::RunaError;

/// Obtains the mapping-service access token.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch_token(&self) -> Result<String, RunaError>;
}

/// `GET {base}/tokens` returning `{"mapbox": "<token>"}`.
#[derive(Clone)]
pub struct HttpTokenSource {
    client: Client,
    endpoint: Url,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    mapbox: String,
}

impl HttpTokenSource {
    pub fn new(base_url: &Url, timeout: Duration) -> Result<Self, RunaError> {
        let endpoint = base_url
            .join("/tokens")
            .map_err(|err| RunaError::TokenHttp(err.to_string()))?;
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(format!("runa-ab/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| RunaError::TokenHttp(err.to_string()))?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl TokenSource for HttpTokenSource {
    async fn fetch_token(&self) -> Result<String, RunaError> {
        let response = self
            .client
            .get(self.endpoint.clone())
            .send()
            .await
            .map_err(|err| RunaError::TokenHttp(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "token request failed".to_string());
            return Err(RunaError::TokenStatus { status, message });
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|err| RunaError::TokenHttp(err.to_string()))?;
        Ok(body.mapbox)
    }
}

/// One-flight token cache. The token is stored only after a successful
/// fetch, so a failed attempt leaves the next request free to retry.
#[derive(Debug, Default)]
pub struct TokenCache {
    cached: Mutex<Option<String>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn ensure<S: TokenSource + ?Sized>(&self, source: &S) -> Result<String, RunaError> {
        let mut guard = self.cached.lock().await;
        if let Some(token) = guard.as_ref() {
            return Ok(token.clone());
        }
        let token = source.fetch_token().await?;
        *guard = Some(token.clone());
        Ok(token)
    }
}
