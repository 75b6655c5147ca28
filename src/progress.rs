//! Progress-callback trait for per-page ingestion events.
//!
//! Inject an [`Arc<dyn IngestProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as the pipeline walks the document. Callers can forward them to a
//! terminal progress bar, a web socket or a job table without the library
//! knowing how the host application reports progress.
//!
//! # Example
//!
//! ```rust
//! use lecture_ingest::{IngestProgressCallback, PipelineConfig};
//! use std::sync::{Arc, Mutex};
//!
//! struct Fractions(Mutex<Vec<f64>>);
//!
//! impl IngestProgressCallback for Fractions {
//!     fn on_page_complete(&self, _page_num: usize, _total_pages: usize, fraction: f64) {
//!         self.0.lock().unwrap().push(fraction);
//!     }
//! }
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(Arc::new(Fractions(Mutex::new(Vec::new()))))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the pipeline as it processes each page.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Pages are processed sequentially, so calls never
/// overlap within one run.
pub trait IngestProgressCallback: Send + Sync {
    /// Called once the page count is known, before any page is processed.
    fn on_ingest_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called before a page's blocks are linearised.
    ///
    /// # Arguments
    /// * `page_num`    — 1-indexed page number
    /// * `total_pages` — total pages in the document
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called after a page has been fully linearised.
    ///
    /// # Arguments
    /// * `page_num`    — 1-indexed page number
    /// * `total_pages` — total pages
    /// * `fraction`    — `page_num / total_pages`, ends at exactly `1.0`
    fn on_page_complete(&self, page_num: usize, total_pages: usize, fraction: f64) {
        let _ = (page_num, total_pages, fraction);
    }

    /// Called after each image has been stored and described.
    ///
    /// `degraded` is true when either step fell back to placeholder content.
    fn on_image_enriched(&self, page_num: usize, ordinal: usize, degraded: bool) {
        let _ = (page_num, ordinal, degraded);
    }

    /// Called once after the last page.
    fn on_ingest_complete(&self, total_pages: usize, images: usize) {
        let _ = (total_pages, images);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl IngestProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn IngestProgressCallback>;
