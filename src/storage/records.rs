//! Metadata store: the upload history table.
//!
//! Rows are append-only from the pipeline's point of view. Identifiers are
//! assigned by the store, never by the pipeline.

use crate::config::ServiceConfig;
use crate::error::PersistenceError;
use crate::output::{Document, DocumentContent};
use crate::serialize::{parse_content, referenced_urls};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Status written for every successfully processed document.
pub const STATUS_PROCESSED: &str = "processed";

/// Number of rows the history listing returns by default.
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// A row about to be inserted (no identifier yet).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDocumentRecord {
    pub filename: String,
    pub subject: String,
    pub status: String,
    /// Flattened string, or JSON-serialised list of page records.
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl NewDocumentRecord {
    pub fn from_document(document: &Document) -> Self {
        Self {
            filename: document.filename.clone(),
            subject: document.subject.clone(),
            status: STATUS_PROCESSED.to_string(),
            content: document.serialized_content(),
            created_at: document.created_at,
        }
    }
}

/// One stored row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Store-assigned identifier. Accepts numeric or string ids.
    #[serde(deserialize_with = "id_as_string")]
    pub id: String,
    pub filename: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub content: Option<String>,
    /// Accepts RFC 3339 and zone-less timestamps (read as UTC).
    #[serde(deserialize_with = "timestamp_lenient")]
    pub created_at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn parsed_content(&self) -> Option<DocumentContent> {
        self.content.as_deref().map(parse_content)
    }

    /// Pages in structured content, image tokens in flattened content.
    pub fn slide_count(&self) -> usize {
        match self.parsed_content() {
            Some(DocumentContent::Structured(pages)) => pages.len(),
            Some(content @ DocumentContent::Flattened(_)) => referenced_urls(&content).len(),
            None => 0,
        }
    }
}

fn id_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "unexpected id value: {other}"
        ))),
    }
}

fn timestamp_lenient<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(serde::de::Error::custom)
}

/// Record store with list / filter / delete.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn insert(&self, record: NewDocumentRecord) -> Result<HistoryEntry, PersistenceError>;

    /// Newest first.
    async fn list_recent(&self, limit: usize) -> Result<Vec<HistoryEntry>, PersistenceError>;

    /// Newest first, restricted to one subject.
    async fn list_by_subject(
        &self,
        subject: &str,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>, PersistenceError>;

    async fn get(&self, id: &str) -> Result<HistoryEntry, PersistenceError>;

    async fn delete(&self, id: &str) -> Result<(), PersistenceError>;
}

/// PostgREST client for the documents table (`/rest/v1/<table>`).
#[derive(Debug, Clone)]
pub struct SupabaseDocumentStore {
    client: reqwest::Client,
    config: ServiceConfig,
}

impl SupabaseDocumentStore {
    pub fn new(config: ServiceConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, config }
    }

    fn request(
        &self,
        method: reqwest::Method,
        query: &[(&str, String)],
    ) -> Result<reqwest::RequestBuilder, PersistenceError> {
        let (base, key) = self
            .config
            .credentials()
            .ok_or(PersistenceError::NotConfigured)?;
        let url = format!("{}/rest/v1/{}", base, self.config.table);
        Ok(self
            .client
            .request(method, url)
            .query(query)
            .bearer_auth(key)
            .header("apikey", key))
    }

    async fn rows(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<Vec<HistoryEntry>, PersistenceError> {
        let response = check_status(builder.send().await?).await?;
        response
            .json::<Vec<HistoryEntry>>()
            .await
            .map_err(|e| PersistenceError::Decode(e.to_string()))
    }

    async fn select(&self, filters: Vec<(&str, String)>) -> Result<Vec<HistoryEntry>, PersistenceError> {
        let mut query = vec![("select", "*".to_string())];
        query.extend(filters);
        let builder = self.request(reqwest::Method::GET, &query)?;
        self.rows(builder).await
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, PersistenceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(PersistenceError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl DocumentStore for SupabaseDocumentStore {
    async fn insert(&self, record: NewDocumentRecord) -> Result<HistoryEntry, PersistenceError> {
        let builder = self
            .request(reqwest::Method::POST, &[])?
            .header("Prefer", "return=representation")
            .json(&record);
        let mut rows = self.rows(builder).await?;
        let entry = rows
            .pop()
            .ok_or_else(|| PersistenceError::Decode("insert returned no rows".to_string()))?;
        debug!("Stored document '{}' as id {}", entry.filename, entry.id);
        Ok(entry)
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<HistoryEntry>, PersistenceError> {
        self.select(vec![
            ("order", "created_at.desc".to_string()),
            ("limit", limit.to_string()),
        ])
        .await
    }

    async fn list_by_subject(
        &self,
        subject: &str,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>, PersistenceError> {
        self.select(vec![
            ("subject", format!("eq.{subject}")),
            ("order", "created_at.desc".to_string()),
            ("limit", limit.to_string()),
        ])
        .await
    }

    async fn get(&self, id: &str) -> Result<HistoryEntry, PersistenceError> {
        self.select(vec![("id", format!("eq.{id}"))])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| PersistenceError::NotFound { id: id.to_string() })
    }

    async fn delete(&self, id: &str) -> Result<(), PersistenceError> {
        let builder = self.request(reqwest::Method::DELETE, &[("id", format!("eq.{id}"))])?;
        check_status(builder.send().await?).await?;
        Ok(())
    }
}
