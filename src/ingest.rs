//! Pipeline driver: PDF bytes → [`IngestOutput`].
//!
//! Pages are processed strictly in order, one at a time, and blocks within
//! a page one at a time. The only suspension points are the blob upload,
//! the vision call and the inter-image delay. Progress is reported after
//! every page as `completed / total`.

use crate::config::{OutputMode, PipelineConfig, ServiceConfig};
use crate::error::IngestError;
use crate::output::{Document, DocumentContent, IngestOutput};
use crate::pipeline::describe::{ImageDescriber, VisionDescriber};
use crate::pipeline::extract::{open_pdf, ExtractedDocument};
use crate::pipeline::linearize::Linearizer;
use crate::serialize::flatten_pages;
use crate::storage::blob::{BlobStore, SupabaseBlobStore};
use chrono::Utc;
use futures::StreamExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// A configured pipeline. Cheap to clone; holds no per-run state.
#[derive(Clone)]
pub struct Pipeline {
    config: PipelineConfig,
    blobs: Arc<dyn BlobStore>,
    describer: Arc<dyn ImageDescriber>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        blobs: Arc<dyn BlobStore>,
        describer: Arc<dyn ImageDescriber>,
    ) -> Self {
        Self {
            config,
            blobs,
            describer,
        }
    }

    /// Supabase blob storage from `services` and the vision provider
    /// resolved from `config` and the environment.
    ///
    /// # Errors
    /// [`IngestError::ProviderNotConfigured`] when no vision provider can be
    /// resolved. Missing storage credentials are not an error here: uploads
    /// then fail per image and degrade to placeholders.
    pub fn from_services(config: PipelineConfig, services: &ServiceConfig) -> Result<Self, IngestError> {
        if !services.is_configured() {
            warn!("Blob storage not configured; image URLs will be placeholders");
        }
        let describer = VisionDescriber::from_config(&config)?;
        Ok(Self::new(
            config,
            Arc::new(SupabaseBlobStore::new(services.clone())),
            Arc::new(describer),
        ))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Ingest a PDF held in memory.
    ///
    /// # Errors
    /// Only [`IngestError`] aborts a run (unreadable PDF, pdfium binding).
    /// Storage and vision failures are absorbed into placeholder content
    /// and listed in [`IngestOutput::warnings`].
    pub async fn ingest(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        subject: &str,
    ) -> Result<IngestOutput, IngestError> {
        info!("Starting ingestion: {} ({} bytes)", filename, bytes.len());
        let extracted = open_pdf(bytes).await?;
        self.ingest_extracted(extracted, filename, subject).await
    }

    /// Ingest pages that have already been opened.
    pub async fn ingest_extracted(
        &self,
        extracted: ExtractedDocument,
        filename: &str,
        subject: &str,
    ) -> Result<IngestOutput, IngestError> {
        let start = Instant::now();
        let ExtractedDocument {
            page_count: total,
            mut pages,
        } = extracted;
        if total == 0 {
            return Err(IngestError::malformed("document has no pages"));
        }

        let cb = self.config.progress_callback.as_ref();
        if let Some(cb) = cb {
            cb.on_ingest_start(total);
        }

        let mut linearizer = Linearizer::new(
            filename,
            &self.config,
            self.blobs.as_ref(),
            self.describer.as_ref(),
        );
        let mut fragments = Vec::new();
        let mut records = Vec::new();
        let mut completed = 0usize;

        while let Some(page) = pages.next().await {
            let page = page?;
            if page.index != completed {
                return Err(IngestError::malformed(format!(
                    "expected page {}, extractor produced page {}",
                    completed + 1,
                    page.index + 1
                )));
            }
            let page_num = page.page_number();
            if let Some(cb) = cb {
                cb.on_page_start(page_num, total);
            }
            debug!("Page {}/{}: {} blocks", page_num, total, page.blocks.len());

            match self.config.mode {
                OutputMode::Flattened => fragments.push(linearizer.flattened_page(page).await),
                OutputMode::Structured => records.push(linearizer.structured_page(page).await),
            }

            completed += 1;
            if let Some(cb) = cb {
                cb.on_page_complete(page_num, total, completed as f64 / total as f64);
            }
        }

        if completed != total {
            return Err(IngestError::malformed(format!(
                "document announced {} pages but only {} could be read",
                total, completed
            )));
        }

        let content = match self.config.mode {
            OutputMode::Flattened => DocumentContent::Flattened(flatten_pages(fragments)),
            OutputMode::Structured => DocumentContent::Structured(records),
        };

        let (warnings, mut stats) = linearizer.into_parts();
        stats.total_pages = total;
        stats.total_duration_ms = start.elapsed().as_millis() as u64;

        info!(
            "Ingested {}: {} pages, {} images enriched, {} skipped, {} warnings in {}ms",
            filename,
            total,
            stats.images_enriched,
            stats.images_skipped,
            warnings.len(),
            stats.total_duration_ms
        );
        if let Some(cb) = cb {
            cb.on_ingest_complete(total, stats.images_enriched);
        }

        Ok(IngestOutput {
            document: Document {
                filename: filename.to_string(),
                subject: subject.to_string(),
                page_count: total,
                content,
                created_at: Utc::now(),
            },
            warnings,
            stats,
        })
    }
}

/// Synchronous wrapper around [`Pipeline::ingest`].
///
/// Creates a temporary tokio runtime internally; must not be called from
/// inside another runtime.
pub fn ingest_sync(
    pipeline: &Pipeline,
    bytes: Vec<u8>,
    filename: &str,
    subject: &str,
) -> Result<IngestOutput, IngestError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| IngestError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(pipeline.ingest(bytes, filename, subject))
}

/// Write a document's persisted content to `path` for direct download.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn write_document(document: &Document, path: impl AsRef<Path>) -> Result<(), IngestError> {
    let path = path.as_ref();
    let write_err = |source| IngestError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = std::path::PathBuf::from(tmp_name);

    tokio::fs::write(&tmp_path, document.serialized_content())
        .await
        .map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;
    debug!("Wrote {}", path.display());
    Ok(())
}
