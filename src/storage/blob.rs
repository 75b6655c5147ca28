//! Blob store client: uploads image bytes under deterministic keys.
//!
//! Keys are derived from the source filename, page index and image ordinal,
//! so re-ingesting the same PDF writes the same keys. The store treats an
//! "already exists" answer as success, which makes re-runs idempotent.
//!
//! A key is always a single URL path segment. Source names are reduced to
//! `[A-Za-z0-9._-]` before they reach a key, and keys outside that alphabet
//! are refused, so a filename like `Lecture #3.pdf` can neither truncate the
//! request path at a fragment nor leak a quote into a token's `url="…"`.

use crate::config::ServiceConfig;
use crate::error::EnrichmentError;
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use std::path::Path;
use tracing::{debug, warn};

/// Key/value blob storage addressed by object key.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload `bytes` under `key`; returns the public URL.
    ///
    /// A duplicate key counts as success.
    async fn store(&self, bytes: &[u8], key: &str, content_type: &str)
        -> Result<String, EnrichmentError>;

    /// Delete the object stored under `key`.
    async fn remove(&self, key: &str) -> Result<(), EnrichmentError>;

    /// Map a public URL produced by [`BlobStore::store`] back to its key.
    /// Returns `None` for URLs this store did not issue.
    fn key_for_url(&self, url: &str) -> Option<String>;
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

/// True when `key` is non-empty and made only of `[A-Za-z0-9._-]`.
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty() && key.chars().all(is_key_char)
}

/// Strip directories and the final extension; every other character
/// outside `[A-Za-z0-9._-]` (spaces included) becomes an underscore.
pub fn sanitize_source_name(filename: &str) -> String {
    let path = Path::new(filename);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| filename.to_string());
    stem.chars()
        .map(|c| if is_key_char(c) { c } else { '_' })
        .collect()
}

/// `doc_<source>_p<page_index>_img<ordinal>.<ext>` — page index is 0-based.
pub fn object_key(source_name: &str, page_index: usize, ordinal: usize, ext: &str) -> String {
    format!(
        "doc_{}_p{}_img{}.{}",
        sanitize_source_name(source_name),
        page_index,
        ordinal,
        ext.trim_start_matches('.')
    )
}

/// MIME type for an image extension.
pub fn content_type_for(ext: &str) -> &'static str {
    match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        _ => "application/octet-stream",
    }
}

/// Supabase Storage client (`/storage/v1/object/<bucket>/<key>`).
#[derive(Debug, Clone)]
pub struct SupabaseBlobStore {
    client: reqwest::Client,
    config: ServiceConfig,
}

impl SupabaseBlobStore {
    pub fn new(config: ServiceConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, config }
    }

    fn credentials(&self, key: &str) -> Result<(&str, &str), EnrichmentError> {
        self.config
            .credentials()
            .ok_or_else(|| EnrichmentError::StorageFailure {
                key: key.to_string(),
                detail: "blob storage is not configured".to_string(),
            })
    }

    fn public_prefix(&self) -> Option<String> {
        let base = self.config.base_url.as_deref()?;
        self.bucket_url(base, true).ok().map(|url| url.to_string())
    }

    /// `<base>/storage/v1/object[/public]/<bucket>/`, trailing slash included.
    fn bucket_url(&self, base: &str, public: bool) -> Result<Url, String> {
        let mut url = Url::parse(base).map_err(|e| format!("invalid storage URL: {}", e))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| format!("storage URL cannot take a path: {}", base))?;
            segments.pop_if_empty().extend(["storage", "v1", "object"]);
            if public {
                segments.push("public");
            }
            segments.push(&self.config.bucket).push("");
        }
        Ok(url)
    }

    /// Bucket URL with `key` pushed as one path segment.
    fn object_url(&self, base: &str, public: bool, key: &str) -> Result<Url, EnrichmentError> {
        let failure = |detail: String| EnrichmentError::StorageFailure {
            key: key.to_string(),
            detail,
        };
        if !is_valid_key(key) {
            return Err(failure(
                "object keys may only contain [A-Za-z0-9._-]".to_string(),
            ));
        }

        let mut url = self.bucket_url(base, public).map_err(failure)?;
        url.path_segments_mut()
            .map_err(|_| failure(format!("storage URL cannot take a path: {}", base)))?
            .pop()
            .push(key);
        Ok(url)
    }
}

#[async_trait]
impl BlobStore for SupabaseBlobStore {
    async fn store(
        &self,
        bytes: &[u8],
        key: &str,
        content_type: &str,
    ) -> Result<String, EnrichmentError> {
        let (base, service_key) = self.credentials(key)?;
        let url = self.object_url(base, false, key)?;

        let failure = |detail: String| EnrichmentError::StorageFailure {
            key: key.to_string(),
            detail,
        };

        let response = self
            .client
            .post(url)
            .bearer_auth(service_key)
            .header("apikey", service_key)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|e| failure(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status == StatusCode::OK || status == StatusCode::CONFLICT || body.contains("Duplicate")
        {
            if status != StatusCode::OK {
                debug!("Blob '{}' already exists, reusing", key);
            }
            return Ok(self.object_url(base, true, key)?.to_string());
        }

        warn!("Upload of '{}' failed: HTTP {}", key, status);
        Err(failure(format!("HTTP {}: {}", status.as_u16(), body)))
    }

    async fn remove(&self, key: &str) -> Result<(), EnrichmentError> {
        let (base, service_key) = self.credentials(key)?;
        let url = self.object_url(base, false, key)?;

        let response = self
            .client
            .delete(url)
            .bearer_auth(service_key)
            .header("apikey", service_key)
            .send()
            .await
            .map_err(|e| EnrichmentError::StorageFailure {
                key: key.to_string(),
                detail: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(EnrichmentError::StorageFailure {
            key: key.to_string(),
            detail: format!("HTTP {}: {}", status.as_u16(), body),
        })
    }

    fn key_for_url(&self, url: &str) -> Option<String> {
        let prefix = self.public_prefix()?;
        url.strip_prefix(prefix.as_str())
            .filter(|k| is_valid_key(k))
            .map(str::to_string)
    }
}
