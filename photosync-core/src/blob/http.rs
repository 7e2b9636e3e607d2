//! HTTP object-storage adapter: PUT/GET/DELETE/HEAD on `{base_url}/{key}`.

use crate::blob::{split_target, BlobStore};
use crate::paths::{PhotoKey, DURABLE_PREFIX};
use crate::store::write_atomic;
use crate::{PhotoSyncError, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::path::Path;
use std::time::Duration;

/// HTTP client for a bucket-style object store.
pub struct HttpBlobStore {
    client: reqwest::Client,
    base_url: reqwest::Url,
    bearer_token: Option<String>,
}

impl HttpBlobStore {
    /// Create a new blob client.
    pub fn new(base_url: &str, bearer_token: Option<String>, timeout: Duration) -> Result<Self> {
        let base_url = reqwest::Url::parse(base_url)
            .map_err(|e| PhotoSyncError::Config(format!("blob base_url {:?}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(PhotoSyncError::Config(format!(
                "blob base_url {} cannot hold object paths",
                base_url
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PhotoSyncError::Transfer(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            bearer_token,
        })
    }

    /// `{base_url}/photos/<m>/<v>/<f>`, each segment percent-encoded.
    fn object_url(&self, key: &PhotoKey) -> Result<reqwest::Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                PhotoSyncError::Config(format!("blob base_url {} is not a base", self.base_url))
            })?
            .pop_if_empty()
            .extend([
                DURABLE_PREFIX,
                key.machine_id.as_str(),
                key.maintenance_id.as_str(),
                key.file_name.as_str(),
            ]);
        Ok(url)
    }

    fn request(&self, method: reqwest::Method, key: &PhotoKey) -> Result<reqwest::RequestBuilder> {
        let builder = self.client.request(method, self.object_url(key)?);
        Ok(match &self.bearer_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        })
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        builder
            .send()
            .await
            .map_err(|e| PhotoSyncError::Transfer(e.to_string()))
    }
}

fn status_error(op: &str, key: &PhotoKey, status: StatusCode) -> PhotoSyncError {
    PhotoSyncError::Transfer(format!("{} {} failed: {}", op, key, status))
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn upload(&self, local_path: &Path, key: &PhotoKey) -> Result<()> {
        let bytes = tokio::fs::read(local_path).await?;
        let resp = self
            .send(
                self.request(reqwest::Method::PUT, key)?
                    .header("Content-Type", "application/octet-stream")
                    .body(bytes),
            )
            .await?;

        if !resp.status().is_success() {
            return Err(status_error("upload", key, resp.status()));
        }
        Ok(())
    }

    async fn download(&self, key: &PhotoKey, local_path: &Path) -> Result<()> {
        let resp = self.send(self.request(reqwest::Method::GET, key)?).await?;

        match resp.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => return Err(PhotoSyncError::NotFound(key.durable_path())),
            status => return Err(status_error("download", key, status)),
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| PhotoSyncError::Transfer(e.to_string()))?;
        let (dir, name) = split_target(local_path)?;
        write_atomic(dir, name, &bytes).await?;
        Ok(())
    }

    async fn delete(&self, key: &PhotoKey) -> Result<()> {
        let resp = self.send(self.request(reqwest::Method::DELETE, key)?).await?;

        let status = resp.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(status_error("delete", key, status))
        }
    }

    async fn exists(&self, key: &PhotoKey) -> Result<bool> {
        let resp = self.send(self.request(reqwest::Method::HEAD, key)?).await?;

        match resp.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(status_error("exists", key, status)),
        }
    }
}
