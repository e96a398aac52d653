use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use url::Url;

use crate::error::RunaError;

/// Retrieves one album image body. Implementations must be shareable
/// across the concurrent fetch fan-out.
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<Bytes, RunaError>;
}

#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, RunaError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("runa-ab/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| RunaError::FetchHttp(err.to_string()))?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| RunaError::FetchHttp(err.to_string()))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl AssetFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<Bytes, RunaError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|err| RunaError::FetchHttp(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .await
                .unwrap_or_default()
                .trim()
                .to_string();
            let message = if message.is_empty() {
                format!("GET {url}")
            } else {
                message
            };
            return Err(RunaError::FetchStatus { status, message });
        }

        response
            .bytes()
            .await
            .map_err(|err| RunaError::FetchHttp(err.to_string()))
    }
}
