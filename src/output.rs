//! Data model: extracted blocks, linearised pages, and the finished document.

use crate::config::OutputMode;
use crate::error::EnrichmentError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Extractor output ─────────────────────────────────────────────────────

/// Axis-aligned box with a top-left origin: `top` grows downward from the
/// top edge of the page, in PDF points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl BoundingBox {
    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn height(&self) -> f32 {
        (self.bottom - self.top).abs()
    }
}

/// Payload of a content block.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockKind {
    /// Text spans in extractor order.
    Text { spans: Vec<String> },
    /// Encoded image bytes and their file extension (without dot).
    Image { data: Vec<u8>, ext: String },
}

/// One text or image region reported by the extractor.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentBlock {
    pub bbox: BoundingBox,
    pub kind: BlockKind,
}

impl ContentBlock {
    pub fn text(bbox: BoundingBox, spans: Vec<String>) -> Self {
        Self {
            bbox,
            kind: BlockKind::Text { spans },
        }
    }

    pub fn image(bbox: BoundingBox, data: Vec<u8>, ext: impl Into<String>) -> Self {
        Self {
            bbox,
            kind: BlockKind::Image {
                data,
                ext: ext.into(),
            },
        }
    }

    /// Top-edge vertical coordinate, the only sort key used for reading order.
    pub fn top(&self) -> f32 {
        self.bbox.top
    }
}

/// One page as delivered by the extractor.
#[derive(Debug, Clone, PartialEq)]
pub struct PageContent {
    /// 0-based page index.
    pub index: usize,
    pub blocks: Vec<ContentBlock>,
}

impl PageContent {
    pub fn from_blocks(index: usize, blocks: Vec<ContentBlock>) -> Self {
        Self { index, blocks }
    }

    /// 1-based page number.
    pub fn page_number(&self) -> usize {
        self.index + 1
    }
}

// ── Linearised output ────────────────────────────────────────────────────

/// Enrichment result for one embedded image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    /// Public blob URL; `None` when the upload failed.
    pub url: Option<String>,
    /// "Image <ordinal> (Page <page>)". Not part of the persisted page
    /// record shape.
    #[serde(default, skip_serializing)]
    pub caption: String,
    /// Model description, or a bracketed error marker. Never empty.
    pub description: String,
}

/// One page in structured mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRecord {
    /// 1-based.
    pub page_number: usize,
    /// Text blocks in reading order, or the empty-page placeholder.
    pub text: String,
    pub image: Option<ImageRecord>,
}

/// Document body in either output mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "content", rename_all = "snake_case")]
pub enum DocumentContent {
    Flattened(String),
    Structured(Vec<PageRecord>),
}

impl DocumentContent {
    pub fn mode(&self) -> OutputMode {
        match self {
            DocumentContent::Flattened(_) => OutputMode::Flattened,
            DocumentContent::Structured(_) => OutputMode::Structured,
        }
    }
}

/// The artifact of one pipeline run. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub filename: String,
    /// Free-form subject label supplied by the caller.
    pub subject: String,
    pub page_count: usize,
    pub content: DocumentContent,
    pub created_at: DateTime<Utc>,
}

impl Document {
    /// The exact string persisted in the metadata store's `content` column.
    pub fn serialized_content(&self) -> String {
        crate::serialize::serialize_content(&self.content)
    }
}

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestStats {
    pub total_pages: usize,
    /// Image blocks encountered (all sizes).
    pub images_seen: usize,
    /// Image blocks dropped by the size threshold (or by the one-per-page rule).
    pub images_skipped: usize,
    /// Image blocks that were stored and described.
    pub images_enriched: usize,
    pub storage_failures: usize,
    pub description_failures: usize,
    pub total_duration_ms: u64,
}

/// Result of a successful run: the document plus everything that degraded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestOutput {
    pub document: Document,
    /// Every absorbed per-image failure, in processing order.
    pub warnings: Vec<EnrichmentError>,
    pub stats: IngestStats,
}

impl IngestOutput {
    /// True when at least one image carries placeholder content.
    pub fn is_degraded(&self) -> bool {
        !self.warnings.is_empty()
    }
}
