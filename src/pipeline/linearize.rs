//! Page linearisation: unordered content blocks → reading-order output.
//!
//! Blocks are stable-sorted by the top edge of their bounding box. This is
//! an approximation of reading order: a two-column slide is read row by row
//! across both columns rather than column by column. No column detection is
//! attempted.
//!
//! Each qualifying image goes through the same enrichment sequence: derive
//! the storage key, upload, describe, wait the configured throttle delay.
//! Both remote calls degrade to placeholder content on failure, so a page
//! always linearises.

use crate::config::PipelineConfig;
use crate::error::EnrichmentError;
use crate::output::{BlockKind, ContentBlock, ImageRecord, IngestStats, PageContent, PageRecord};
use crate::pipeline::describe::{non_empty, ImageDescriber};
use crate::prompts::description_unavailable;
use crate::serialize::{caption, image_token, PARAGRAPH_BREAK};
use crate::storage::blob::{content_type_for, object_key, BlobStore};
use tracing::{debug, warn};

/// URL written into an inline token when the upload failed.
pub const FAILED_UPLOAD_URL: &str = "upload_failed";

/// Sort blocks top to bottom. Equal tops keep extractor order.
pub fn sort_blocks(blocks: &mut [ContentBlock]) {
    blocks.sort_by(|a, b| a.top().total_cmp(&b.top()));
}

/// Join spans with single spaces and trim; `None` for whitespace-only text.
pub fn text_fragment(spans: &[String]) -> Option<String> {
    let joined = spans.join(" ");
    let trimmed = joined.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Outcome of enriching one image.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedImage {
    pub ordinal: usize,
    pub key: String,
    pub url: Option<String>,
    pub caption: String,
    pub description: String,
}

impl EnrichedImage {
    fn into_record(self) -> ImageRecord {
        ImageRecord {
            url: self.url,
            caption: self.caption,
            description: self.description,
        }
    }
}

/// Per-run linearizer. Owns the document-wide image ordinal, so one value
/// must be used for all pages of a document and never shared across runs.
pub struct Linearizer<'a> {
    source_name: &'a str,
    config: &'a PipelineConfig,
    blobs: &'a dyn BlobStore,
    describer: &'a dyn ImageDescriber,
    ordinal: usize,
    warnings: Vec<EnrichmentError>,
    stats: IngestStats,
}

impl<'a> Linearizer<'a> {
    pub fn new(
        source_name: &'a str,
        config: &'a PipelineConfig,
        blobs: &'a dyn BlobStore,
        describer: &'a dyn ImageDescriber,
    ) -> Self {
        Self {
            source_name,
            config,
            blobs,
            describer,
            ordinal: 0,
            warnings: Vec::new(),
            stats: IngestStats::default(),
        }
    }

    /// Flattened mode: text paragraphs and inline image tokens in block order.
    pub async fn flattened_page(&mut self, mut page: PageContent) -> String {
        sort_blocks(&mut page.blocks);
        let min_bytes = self.config.min_image_bytes();
        let mut out = String::new();

        for block in page.blocks {
            match block.kind {
                BlockKind::Text { spans } => {
                    if let Some(text) = text_fragment(&spans) {
                        out.push_str(&text);
                        out.push_str(PARAGRAPH_BREAK);
                    }
                }
                BlockKind::Image { data, ext } => {
                    self.stats.images_seen += 1;
                    if data.len() < min_bytes {
                        debug!(
                            "Page {}: skipping {}-byte image (< {})",
                            page.index + 1,
                            data.len(),
                            min_bytes
                        );
                        self.stats.images_skipped += 1;
                        continue;
                    }
                    let image = self.enrich(page.index, &data, &ext).await;
                    let url = image.url.as_deref().unwrap_or(FAILED_UPLOAD_URL);
                    out.push_str(&image_token(url, &image.caption, &image.description));
                    out.push_str(PARAGRAPH_BREAK);
                }
            }
        }

        out
    }

    /// Structured mode: page text plus at most one image.
    ///
    /// The largest image at or above the threshold is kept (ties go to the
    /// one higher on the page); every other image on the page is dropped.
    pub async fn structured_page(&mut self, mut page: PageContent) -> PageRecord {
        sort_blocks(&mut page.blocks);
        let min_bytes = self.config.min_image_bytes();

        let mut paragraphs = Vec::new();
        let mut chosen: Option<(Vec<u8>, String)> = None;

        for block in page.blocks {
            match block.kind {
                BlockKind::Text { spans } => paragraphs.extend(text_fragment(&spans)),
                BlockKind::Image { data, ext } => {
                    self.stats.images_seen += 1;
                    let qualifies = data.len() >= min_bytes;
                    let larger = chosen.as_ref().map_or(true, |(best, _)| data.len() > best.len());
                    if qualifies && larger {
                        if chosen.is_some() {
                            self.stats.images_skipped += 1;
                        }
                        chosen = Some((data, ext));
                    } else {
                        self.stats.images_skipped += 1;
                    }
                }
            }
        }

        let text = if paragraphs.is_empty() {
            self.config.empty_page_text.clone()
        } else {
            paragraphs.join(PARAGRAPH_BREAK)
        };

        let image = match chosen {
            Some((data, ext)) => Some(self.enrich(page.index, &data, &ext).await.into_record()),
            None => None,
        };

        PageRecord {
            page_number: page.index + 1,
            text,
            image,
        }
    }

    /// Upload, describe, then throttle.
    async fn enrich(&mut self, page_index: usize, data: &[u8], ext: &str) -> EnrichedImage {
        self.ordinal += 1;
        let ordinal = self.ordinal;
        let page_num = page_index + 1;
        let key = object_key(self.source_name, page_index, ordinal, ext);
        let content_type = content_type_for(ext);
        debug!("Page {}: enriching image {} as '{}'", page_num, ordinal, key);

        let url = match self.blobs.store(data, &key, content_type).await {
            Ok(url) => Some(url),
            Err(e) => {
                warn!("Page {}: image {} not stored: {}", page_num, ordinal, e);
                self.stats.storage_failures += 1;
                self.warnings.push(e);
                None
            }
        };

        let described = match self.describer.describe(data, content_type).await {
            Ok(text) => non_empty(&text),
            Err(e) => Err(e),
        };
        let (description, described_ok) = match described {
            Ok(text) => (text, true),
            Err(e) => {
                warn!("Page {}: image {} not described: {}", page_num, ordinal, e);
                self.stats.description_failures += 1;
                let detail = match &e {
                    EnrichmentError::DescriptionFailure { detail } => detail.clone(),
                    other => other.to_string(),
                };
                self.warnings.push(e);
                (description_unavailable(&detail), false)
            }
        };

        self.stats.images_enriched += 1;
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_image_enriched(page_num, ordinal, url.is_none() || !described_ok);
        }

        let delay = self.config.image_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        EnrichedImage {
            ordinal,
            key,
            url,
            caption: caption(ordinal, page_num),
            description,
        }
    }

    /// Absorbed failures and counters accumulated so far.
    pub fn into_parts(self) -> (Vec<EnrichmentError>, IngestStats) {
        (self.warnings, self.stats)
    }
}
