//! Shared fakes and fixtures for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use lecture_ingest::{
    BlobStore, BoundingBox, ContentBlock, EnrichmentError, ExtractedDocument, ImageDescriber,
    IngestProgressCallback, PageContent,
};
use std::sync::{Mutex, Once};

static INIT: Once = Once::new();

/// Initializes tracing for tests.
pub fn setup_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

// ── Blocks and pages ─────────────────────────────────────────────────────────

pub fn text(top: f32, s: &str) -> ContentBlock {
    ContentBlock::text(BoundingBox::new(40.0, top, 500.0, top + 14.0), vec![s.to_string()])
}

pub fn image(top: f32, len: usize) -> ContentBlock {
    ContentBlock::image(BoundingBox::new(40.0, top, 400.0, top + 200.0), vec![0xAB; len], "png")
}

pub fn document(pages: Vec<Vec<ContentBlock>>) -> ExtractedDocument {
    let pages = pages
        .into_iter()
        .enumerate()
        .map(|(i, blocks)| PageContent::from_blocks(i, blocks))
        .collect();
    ExtractedDocument::from_pages(pages).unwrap()
}

/// Page 1 pure text, page 2 one 10KB image plus caption text, page 3 empty.
pub fn three_page_lecture() -> ExtractedDocument {
    document(vec![
        vec![text(60.0, "Intro")],
        vec![text(40.0, "Figure 1: beta-lactam ring"), image(120.0, 10 * 1024)],
        vec![],
    ])
}

// ── Fakes ────────────────────────────────────────────────────────────────────

/// In-memory blob store that records every call.
#[derive(Default)]
pub struct MemoryBlobs {
    pub stored: Mutex<Vec<String>>,
    pub removed: Mutex<Vec<String>>,
    pub fail_store: bool,
    pub fail_remove: bool,
}

pub const MEMORY_PREFIX: &str = "https://blobs.test/public/";

#[async_trait]
impl BlobStore for MemoryBlobs {
    async fn store(&self, _bytes: &[u8], key: &str, _ct: &str) -> Result<String, EnrichmentError> {
        self.stored.lock().unwrap().push(key.to_string());
        if self.fail_store {
            return Err(EnrichmentError::StorageFailure {
                key: key.to_string(),
                detail: "connection refused".into(),
            });
        }
        Ok(format!("{MEMORY_PREFIX}{key}"))
    }

    async fn remove(&self, key: &str) -> Result<(), EnrichmentError> {
        self.removed.lock().unwrap().push(key.to_string());
        if self.fail_remove {
            return Err(EnrichmentError::StorageFailure {
                key: key.to_string(),
                detail: "HTTP 500".into(),
            });
        }
        Ok(())
    }

    fn key_for_url(&self, url: &str) -> Option<String> {
        url.strip_prefix(MEMORY_PREFIX).map(str::to_string)
    }
}

/// Describer returning a fixed answer, counting calls.
pub struct FakeDescriber {
    pub answer: Result<String, EnrichmentError>,
    pub calls: Mutex<usize>,
}

impl FakeDescriber {
    pub fn ok(text: &str) -> Self {
        Self {
            answer: Ok(text.to_string()),
            calls: Mutex::new(0),
        }
    }

    pub fn failing(detail: &str) -> Self {
        Self {
            answer: Err(EnrichmentError::DescriptionFailure {
                detail: detail.to_string(),
            }),
            calls: Mutex::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl ImageDescriber for FakeDescriber {
    async fn describe(&self, _bytes: &[u8], _mime: &str) -> Result<String, EnrichmentError> {
        *self.calls.lock().unwrap() += 1;
        self.answer.clone()
    }
}

/// Records every progress fraction reported.
#[derive(Default)]
pub struct RecordingProgress {
    pub fractions: Mutex<Vec<f64>>,
    pub started: Mutex<Option<usize>>,
    pub finished: Mutex<Option<(usize, usize)>>,
}

impl IngestProgressCallback for RecordingProgress {
    fn on_ingest_start(&self, total_pages: usize) {
        *self.started.lock().unwrap() = Some(total_pages);
    }

    fn on_page_complete(&self, _page_num: usize, _total_pages: usize, fraction: f64) {
        self.fractions.lock().unwrap().push(fraction);
    }

    fn on_ingest_complete(&self, total_pages: usize, images: usize) {
        *self.finished.lock().unwrap() = Some((total_pages, images));
    }
}
