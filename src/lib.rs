//! # lecture-ingest
//!
//! Turn lecture PDFs into reading-order text with inline, described images.
//!
//! Each page's text and image blocks are ordered top to bottom. Every image
//! worth keeping is uploaded to blob storage and described by a vision
//! model, and the result is written into the text as a token that a
//! downstream chat/RAG system can parse:
//!
//! ```text
//! <<SLIDE_IMAGE: url="…" caption="Image 3 (Page 7)" context="…">>
//! ```
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF bytes
//!  │
//!  ├─ 1. Extract    pages of text/image blocks via pdfium (spawn_blocking)
//!  ├─ 2. Linearize  sort by top edge, drop small images
//!  ├─ 3. Enrich     upload → describe → fixed delay, per image, in order
//!  ├─ 4. Serialize  flattened string or per-page JSON records
//!  └─ 5. Persist    one row in the upload history (optional)
//! ```
//!
//! Only an unreadable PDF aborts a run. Upload and vision failures turn into
//! placeholder URLs and `[Image description unavailable: …]` markers and are
//! listed in [`IngestOutput::warnings`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lecture_ingest::{ingest_and_save, Pipeline, PipelineConfig, ServiceConfig, SupabaseDocumentStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let services = ServiceConfig::from_env();
//!     let pipeline = Pipeline::from_services(PipelineConfig::default(), &services)?;
//!     let store = SupabaseDocumentStore::new(services);
//!
//!     let bytes = std::fs::read("week3-antibiotics.pdf")?;
//!     let report = ingest_and_save(&pipeline, &store, bytes, "week3-antibiotics.pdf", "Pharmacology").await?;
//!     println!("{}", report.output.document.serialized_content());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `lecture-ingest` binary (clap + anyhow + indicatif + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod ingest;
pub mod library;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod serialize;
pub mod storage;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{OutputMode, PipelineConfig, PipelineConfigBuilder, ServiceConfig};
pub use error::{EnrichmentError, IngestError, PersistenceError};
pub use ingest::{ingest_sync, write_document, Pipeline};
pub use library::{delete_document, ingest_and_save, save_output, DeletionReport, IngestReport};
pub use output::{
    BoundingBox, ContentBlock, Document, DocumentContent, ImageRecord, IngestOutput, IngestStats,
    PageContent, PageRecord,
};
pub use pipeline::describe::{ImageDescriber, VisionDescriber};
pub use pipeline::extract::{open_pdf, ExtractedDocument};
pub use pipeline::linearize::FAILED_UPLOAD_URL;
pub use progress::{IngestProgressCallback, NoopProgressCallback, ProgressCallback};
pub use storage::{BlobStore, DocumentStore, HistoryEntry, SupabaseBlobStore, SupabaseDocumentStore};
