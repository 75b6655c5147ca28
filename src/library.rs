//! Upload history operations that span the pipeline and both stores.

use crate::error::{EnrichmentError, IngestError, PersistenceError};
use crate::ingest::Pipeline;
use crate::output::IngestOutput;
use crate::serialize::referenced_urls;
use crate::storage::blob::BlobStore;
use crate::storage::records::{DocumentStore, HistoryEntry, NewDocumentRecord};
use tracing::{info, warn};

/// A finished run plus the outcome of persisting it.
///
/// The document is kept even when saving failed, so it can still be
/// written out for direct download.
#[derive(Debug)]
pub struct IngestReport {
    pub output: IngestOutput,
    pub saved: Result<HistoryEntry, PersistenceError>,
}

impl IngestReport {
    pub fn is_saved(&self) -> bool {
        self.saved.is_ok()
    }
}

/// Run the pipeline, then insert one row into the metadata store.
pub async fn ingest_and_save(
    pipeline: &Pipeline,
    store: &dyn DocumentStore,
    bytes: Vec<u8>,
    filename: &str,
    subject: &str,
) -> Result<IngestReport, IngestError> {
    let output = pipeline.ingest(bytes, filename, subject).await?;
    Ok(save_output(store, output).await)
}

/// Persist a finished run. A store failure is kept in the report.
pub async fn save_output(store: &dyn DocumentStore, output: IngestOutput) -> IngestReport {
    let saved = store
        .insert(NewDocumentRecord::from_document(&output.document))
        .await;
    match &saved {
        Ok(entry) => info!("Saved '{}' as id {}", output.document.filename, entry.id),
        Err(e) => warn!("Could not save '{}': {}", output.document.filename, e),
    }
    IngestReport { output, saved }
}

/// What [`delete_document`] did.
#[derive(Debug, Default)]
pub struct DeletionReport {
    pub id: String,
    /// Keys removed from blob storage.
    pub blobs_removed: Vec<String>,
    /// Removals that failed; the row was deleted anyway.
    pub blob_failures: Vec<EnrichmentError>,
    /// Referenced URLs that do not map to a key in this store
    /// (failed-upload placeholders, foreign URLs).
    pub unresolved_urls: Vec<String>,
    /// Set when the row could not be read before deletion, in which case
    /// no blob cleanup was attempted.
    pub lookup_error: Option<String>,
}

impl DeletionReport {
    pub fn is_clean(&self) -> bool {
        self.blob_failures.is_empty() && self.lookup_error.is_none()
    }
}

/// Delete a document row and, best-effort, every blob its content references.
///
/// Blob cleanup never blocks the row deletion.
///
/// # Errors
/// Only a failure to delete the row itself.
pub async fn delete_document(
    store: &dyn DocumentStore,
    blobs: &dyn BlobStore,
    id: &str,
) -> Result<DeletionReport, PersistenceError> {
    let mut report = DeletionReport {
        id: id.to_string(),
        ..Default::default()
    };

    match store.get(id).await {
        Ok(entry) => {
            let urls = entry
                .parsed_content()
                .map(|content| referenced_urls(&content))
                .unwrap_or_default();
            for url in urls {
                let Some(key) = blobs.key_for_url(&url) else {
                    report.unresolved_urls.push(url);
                    continue;
                };
                match blobs.remove(&key).await {
                    Ok(()) => report.blobs_removed.push(key),
                    Err(e) => {
                        warn!("Could not remove blob '{}': {}", key, e);
                        report.blob_failures.push(e);
                    }
                }
            }
        }
        Err(e) => {
            warn!("Could not load document {} before deletion: {}", id, e);
            report.lookup_error = Some(e.to_string());
        }
    }

    store.delete(id).await?;
    info!(
        "Deleted document {} ({} blobs removed, {} failed)",
        id,
        report.blobs_removed.len(),
        report.blob_failures.len()
    );
    Ok(report)
}
