//! HTTP client backed by reqwest

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

use crate::error::HttpError;
use crate::traits::HttpClient;

/// Default timeout for a single request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// `HttpClient` implementation using reqwest
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new() -> Result<Self, HttpError> {
        Self::with_timeout(REQUEST_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, HttpError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HttpError::Request {
                url: String::new(),
                message: e.to_string(),
            })?;
        Ok(Self { client })
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, HttpError> {
        let request_error = |e: reqwest::Error| HttpError::Request {
            url: url.to_string(),
            message: e.to_string(),
        };

        let response = self.client.get(url).send().await.map_err(request_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(HttpError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn get_text(&self, url: &str) -> Result<String, HttpError> {
        self.get(url)
            .await?
            .text()
            .await
            .map_err(|e| HttpError::Request {
                url: url.to_string(),
                message: e.to_string(),
            })
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<(), HttpError> {
        tracing::info!("Downloading {}", url);

        let bytes = self
            .get(url)
            .await?
            .bytes()
            .await
            .map_err(|e| HttpError::Request {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        tokio::fs::write(dest, &bytes)
            .await
            .map_err(|source| HttpError::Write {
                path: dest.to_path_buf(),
                source,
            })?;

        tracing::debug!("Saved {} bytes to {:?}", bytes.len(), dest);
        Ok(())
    }
}
