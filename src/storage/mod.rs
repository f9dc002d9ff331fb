//! Object storage client: the narrow surface the upload coordinator needs
//! (PUT object, LIST by prefix, public URL), behind a trait so the race
//! logic can be exercised against in-memory stubs.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

/// Storage operations used by the upload coordinator.
///
/// PUT is assumed idempotent on retry for the same key and bytes.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload an object under `key`
    async fn put_object(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// List object keys under `prefix`
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Public address of an object
    fn public_url(&self, key: &str) -> String;
}

/// REST client for an S3-like storage server:
/// `PUT {endpoint}/{bucket}/{key}` and `GET {endpoint}/{bucket}?prefix=`.
#[derive(Debug, Clone)]
pub struct RestObjectStore {
    client: reqwest::Client,
    endpoint: String,
    bucket: String,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    objects: Vec<ObjectEntry>,
}

#[derive(Debug, Deserialize)]
struct ObjectEntry {
    name: String,
}

impl RestObjectStore {
    pub fn new(endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            bucket: bucket.into(),
        }
    }

    /// Percent-encode each key segment while keeping `/` separators intact,
    /// so nested keys like `owner/20250830_video.mp4` stay addressable.
    fn encode_key(key: &str) -> String {
        key.split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/")
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.bucket, Self::encode_key(key))
    }
}

#[async_trait]
impl ObjectStore for RestObjectStore {
    async fn put_object(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let url = self.object_url(key);
        tracing::debug!("PUT {} ({} bytes)", url, bytes.len());

        let response = self
            .client
            .put(&url)
            .header("Content-Type", "application/octet-stream")
            .body(bytes.to_vec())
            .send()
            .await
            .context("Failed to send upload request")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Storage rejected upload: HTTP {} {}", status, text);
        }

        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let url = format!(
            "{}/{}?prefix={}",
            self.endpoint,
            self.bucket,
            urlencoding::encode(prefix)
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to send list request")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Storage list failed: HTTP {}", status);
        }

        let listing: ListResponse = response
            .json()
            .await
            .context("Failed to parse list response")?;

        Ok(listing.objects.into_iter().map(|o| o.name).collect())
    }

    fn public_url(&self, key: &str) -> String {
        self.object_url(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_key_preserves_separators() {
        assert_eq!(
            RestObjectStore::encode_key("owner/my video.mp4"),
            "owner/my%20video.mp4"
        );
        assert_eq!(RestObjectStore::encode_key("plain.mp4"), "plain.mp4");
    }

    #[test]
    fn test_public_url_shape() {
        let store = RestObjectStore::new("https://store.example.com/", "videos");

        assert_eq!(
            store.public_url("owner/clip.mp4"),
            "https://store.example.com/videos/owner/clip.mp4"
        );
    }
}
