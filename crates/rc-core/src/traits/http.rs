//! HTTP access for downloads and local status endpoints

use async_trait::async_trait;
use std::path::Path;

use crate::error::HttpError;

/// Minimal HTTP client used by the provisioning steps
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// GET `url` and return the body as text
    async fn get_text(&self, url: &str) -> Result<String, HttpError>;

    /// GET `url` and write the body to `dest`
    async fn download(&self, url: &str, dest: &Path) -> Result<(), HttpError>;
}
