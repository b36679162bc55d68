use crate::http::build_client;
use reqwest::Client;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("upload failed: {0}")]
    Request(String),
    #[error("upload rejected: HTTP {0}")]
    Status(reqwest::StatusCode),
}

/// Narrow object-storage client (Supabase Storage REST). Uploads an encoded
/// image buffer under a destination key and hands back the public URL.
#[derive(Debug, Clone)]
pub struct StorageClient {
    base_url: String,
    service_key: String,
    bucket: String,
    prefix: String,
    http: Client,
}

impl StorageClient {
    /// `None` when storage is not configured; the upload stage then degrades
    /// to a no-op instead of failing the run.
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("SUPABASE_URL").ok()?;
        let service_key = std::env::var("SUPABASE_SERVICE_ROLE_KEY")
            .or_else(|_| std::env::var("SUPABASE_SERVICE_KEY"))
            .or_else(|_| std::env::var("SUPABASE_KEY"))
            .ok()?;
        let bucket =
            std::env::var("STORAGE_BUCKET").unwrap_or_else(|_| "product-images".to_string());
        let prefix = std::env::var("STORAGE_PREFIX").unwrap_or_default();
        Some(Self::new(base_url, service_key, bucket, prefix))
    }

    pub fn new(
        base_url: impl Into<String>,
        service_key: impl Into<String>,
        bucket: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key: service_key.into(),
            bucket: bucket.into(),
            prefix: normalize_prefix(prefix.into()),
            http: build_client(),
        }
    }

    fn object_path(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    pub fn public_url(&self, key: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url,
            self.bucket,
            self.object_path(key)
        )
    }

    /// Upload JPEG bytes under `key`, overwriting any previous object, and
    /// return the public URL.
    pub async fn upload_jpeg(&self, key: &str, bytes: Vec<u8>) -> Result<String, StorageError> {
        let url = format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url,
            self.bucket,
            self.object_path(key)
        );
        let response = self
            .http
            .post(&url)
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
            .header("Content-Type", "image/jpeg")
            .header("x-upsert", "true")
            .body(bytes)
            .send()
            .await
            .map_err(|err| StorageError::Request(err.to_string()))?;

        if !response.status().is_success() {
            return Err(StorageError::Status(response.status()));
        }

        let public = self.public_url(key);
        info!(target = "bodega.storage", key, url = %public, "uploaded");
        Ok(public)
    }
}

fn normalize_prefix(prefix: String) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_url_includes_bucket_and_prefix() {
        let client = StorageClient::new(
            "https://proj.supabase.co/",
            "key",
            "product-images",
            "catalog",
        );
        assert_eq!(
            client.public_url("masala_chai.jpeg"),
            "https://proj.supabase.co/storage/v1/object/public/product-images/catalog/masala_chai.jpeg"
        );
    }

    #[test]
    fn empty_prefix_produces_flat_keys() {
        let client = StorageClient::new("https://proj.supabase.co", "key", "imgs", "");
        assert_eq!(client.object_path("a.jpeg"), "a.jpeg");
        let client = StorageClient::new("https://proj.supabase.co", "key", "imgs", "/nested/dir/");
        assert_eq!(client.object_path("a.jpeg"), "nested/dir/a.jpeg");
    }
}
