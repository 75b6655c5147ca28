//! Document extraction: PDF bytes → a lazy stream of pages with content
//! blocks.
//!
//! ## Why a blocking thread and a channel?
//!
//! pdfium is a C++ library with thread-local state; it must not run on Tokio
//! worker threads, and its document handle borrows the loaded bytes so it
//! cannot be held across `.await` points. The document is therefore opened
//! on a `spawn_blocking` thread that reports the page count first and then
//! produces one page at a time into a bounded channel. Pages are extracted
//! only as fast as the pipeline consumes them; dropping the stream stops the
//! thread after the page in flight.
//!
//! ## Coordinates
//!
//! PDF space has its origin at the bottom-left corner. Blocks are converted
//! to a top-left origin so that "ascending top edge" means "higher on the
//! page first".
//!
//! Objects nested in form XObjects (figures included from other PDFs, many
//! exporters' slide layers) report bounds in form space. They are walked
//! recursively and mapped through each enclosing form's matrix before the
//! flip.
//!
//! ## Image size
//!
//! pdfium exposes embedded images as decoded bitmaps, so images are
//! re-encoded as PNG (see [`crate::pipeline::encode`]). The noise threshold
//! is therefore measured against PNG bytes rather than the embedded stream,
//! and every key ends in `.png`.

use crate::error::IngestError;
use crate::output::{BoundingBox, ContentBlock, PageContent};
use crate::pipeline::encode::{encode_png, IMAGE_EXT};
use futures::stream;
use pdfium_render::prelude::*;
use std::pin::Pin;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tracing::{debug, info, warn};

/// A one-pass stream of extracted pages in ascending page order.
pub type PageStream = Pin<Box<dyn Stream<Item = Result<PageContent, IngestError>> + Send>>;

/// Form XObjects nested deeper than this are skipped.
const MAX_FORM_DEPTH: usize = 16;

/// Consecutive text runs whose tops are within this many line heights of
/// the previous run are merged into one text block.
const LINE_GAP_FACTOR: f32 = 1.5;

/// An opened document: page count up front, pages on demand.
pub struct ExtractedDocument {
    pub page_count: usize,
    pub pages: PageStream,
}

impl std::fmt::Debug for ExtractedDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractedDocument")
            .field("page_count", &self.page_count)
            .finish_non_exhaustive()
    }
}

impl ExtractedDocument {
    /// Wrap pages produced by some other extractor.
    ///
    /// Pages must be in ascending order with contiguous 0-based indices.
    pub fn from_pages(pages: Vec<PageContent>) -> Result<Self, IngestError> {
        if pages.is_empty() {
            return Err(IngestError::malformed("document has no pages"));
        }
        if let Some((pos, page)) = pages.iter().enumerate().find(|(i, p)| p.index != *i) {
            return Err(IngestError::malformed(format!(
                "page at position {} has index {}",
                pos, page.index
            )));
        }
        Ok(Self {
            page_count: pages.len(),
            pages: Box::pin(stream::iter(pages.into_iter().map(Ok))),
        })
    }
}

/// Open a PDF held in memory.
///
/// # Errors
/// [`IngestError::MalformedDocument`] when the buffer is empty, lacks the
/// `%PDF` header, cannot be parsed by pdfium, or has zero pages.
pub async fn open_pdf(bytes: Vec<u8>) -> Result<ExtractedDocument, IngestError> {
    check_magic(&bytes)?;

    let (header_tx, header_rx) = oneshot::channel();
    let (page_tx, page_rx) = mpsc::channel(1);

    tokio::task::spawn_blocking(move || extract_blocking(bytes, header_tx, page_tx));

    let page_count = header_rx
        .await
        .map_err(|_| IngestError::Internal("Extraction thread exited early".to_string()))??;

    if page_count == 0 {
        return Err(IngestError::malformed("document has no pages"));
    }
    info!("PDF has {} pages", page_count);

    Ok(ExtractedDocument {
        page_count,
        pages: Box::pin(ReceiverStream::new(page_rx)),
    })
}

fn check_magic(bytes: &[u8]) -> Result<(), IngestError> {
    if bytes.is_empty() {
        return Err(IngestError::malformed("empty buffer"));
    }
    if !bytes.starts_with(b"%PDF") {
        let magic: Vec<u8> = bytes.iter().take(4).copied().collect();
        return Err(IngestError::malformed(format!(
            "missing %PDF header (first bytes: {:?})",
            magic
        )));
    }
    Ok(())
}

/// Bind pdfium: `PDFIUM_LIB_DIR` when set, otherwise the system library.
fn bind_pdfium() -> Result<Pdfium, IngestError> {
    let bindings = match std::env::var("PDFIUM_LIB_DIR") {
        Ok(dir) if !dir.is_empty() => {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&dir))
        }
        _ => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| IngestError::PdfiumBindingFailed(format!("{:?}", e)))?;
    Ok(Pdfium::new(bindings))
}

/// Blocking side of [`open_pdf`].
fn extract_blocking(
    bytes: Vec<u8>,
    header_tx: oneshot::Sender<Result<usize, IngestError>>,
    page_tx: mpsc::Sender<Result<PageContent, IngestError>>,
) {
    let pdfium = match bind_pdfium() {
        Ok(p) => p,
        Err(e) => {
            let _ = header_tx.send(Err(e));
            return;
        }
    };

    let document = match pdfium.load_pdf_from_byte_slice(&bytes, None) {
        Ok(d) => d,
        Err(e) => {
            let _ = header_tx.send(Err(IngestError::malformed(format!("{:?}", e))));
            return;
        }
    };

    let pages = document.pages();
    let total = pages.len() as usize;
    if header_tx.send(Ok(total)).is_err() {
        return;
    }

    for (index, page) in pages.iter().enumerate() {
        let result = page_blocks(&page)
            .map(|blocks| PageContent::from_blocks(index, blocks))
            .map_err(|e| IngestError::malformed(format!("page {}: {:?}", index + 1, e)));
        let failed = result.is_err();

        // Receiver gone means the pipeline stopped consuming.
        if page_tx.blocking_send(result).is_err() || failed {
            debug!("Extraction stopped after page {}", index + 1);
            return;
        }
    }
}

/// One page object reduced to what grouping needs.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Run {
    Text { text: String, bbox: BoundingBox },
    Image(ContentBlock),
}

/// Collect a page's text and image objects in content-stream order.
fn page_blocks(page: &PdfPage) -> Result<Vec<ContentBlock>, PdfiumError> {
    let page_height = page.height().value;
    let mut runs = Vec::new();

    for object in page.objects().iter() {
        collect_runs(&object, Transform::IDENTITY, page_height, 0, &mut runs);
    }

    Ok(group_runs(runs))
}

fn collect_runs(
    object: &PdfPageObject,
    to_page: Transform,
    page_height: f32,
    depth: usize,
    runs: &mut Vec<Run>,
) {
    if let PdfPageObject::XObjectForm(form) = object {
        if depth >= MAX_FORM_DEPTH {
            warn!("Skipping form XObject nested {} levels deep", depth);
            return;
        }
        let inner = match form.matrix() {
            Ok(m) => Transform([m.a(), m.b(), m.c(), m.d(), m.e(), m.f()]).then(to_page),
            Err(e) => {
                debug!("Form XObject without matrix, assuming identity: {:?}", e);
                to_page
            }
        };
        for i in 0..form.len() {
            match form.get(i) {
                Ok(child) => collect_runs(&child, inner, page_height, depth + 1, runs),
                Err(e) => debug!("Skipping unreadable form child {}: {:?}", i, e),
            }
        }
        return;
    }

    let bounds = match object.bounds() {
        Ok(b) => b,
        Err(e) => {
            debug!("Skipping object without bounds: {:?}", e);
            return;
        }
    };
    let (left, bottom, right, top) = to_page.map_rect(
        bounds.left().value,
        bounds.bottom().value,
        bounds.right().value,
        bounds.top().value,
    );
    let bbox = flip_to_top_left(left, bottom, right, top, page_height);

    match object {
        PdfPageObject::Text(text) => runs.push(Run::Text {
            text: text.text(),
            bbox,
        }),
        PdfPageObject::Image(image) => match image.get_raw_image() {
            Ok(decoded) => match encode_png(&decoded) {
                Ok(png) => runs.push(Run::Image(ContentBlock::image(bbox, png, IMAGE_EXT))),
                Err(e) => warn!("Could not re-encode embedded image: {}", e),
            },
            Err(e) => warn!("Could not decode embedded image: {:?}", e),
        },
        _ => {}
    }
}

/// PDF affine matrix `[a b c d e f]`: `x' = a·x + c·y + e`, `y' = b·x + d·y + f`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Transform([f32; 6]);

impl Transform {
    const IDENTITY: Transform = Transform([1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);

    /// `self` applied first, then `outer`.
    fn then(self, outer: Transform) -> Transform {
        let [a, b, c, d, e, f] = self.0;
        let [oa, ob, oc, od, oe, of] = outer.0;
        Transform([
            a * oa + b * oc,
            a * ob + b * od,
            c * oa + d * oc,
            c * ob + d * od,
            e * oa + f * oc + oe,
            e * ob + f * od + of,
        ])
    }

    fn map_point(self, x: f32, y: f32) -> (f32, f32) {
        let [a, b, c, d, e, f] = self.0;
        (a * x + c * y + e, b * x + d * y + f)
    }

    /// Axis-aligned hull of the mapped rectangle, as `(left, bottom, right, top)`.
    fn map_rect(self, left: f32, bottom: f32, right: f32, top: f32) -> (f32, f32, f32, f32) {
        let corners = [
            self.map_point(left, bottom),
            self.map_point(left, top),
            self.map_point(right, bottom),
            self.map_point(right, top),
        ];
        corners.iter().fold(
            (f32::MAX, f32::MAX, f32::MIN, f32::MIN),
            |(l, b, r, t), &(x, y)| (l.min(x), b.min(y), r.max(x), t.max(y)),
        )
    }
}

/// Bottom-left page coordinates to a top-left-origin box.
fn flip_to_top_left(left: f32, bottom: f32, right: f32, top: f32, page_height: f32) -> BoundingBox {
    BoundingBox::new(left, page_height - top, right, page_height - bottom)
}

/// Merge consecutive text runs into text blocks.
///
/// A run continues the current block when its top edge lies between one
/// line above and [`LINE_GAP_FACTOR`] lines below the previous run's top.
/// An image always closes the current text block.
pub(crate) fn group_runs(runs: Vec<Run>) -> Vec<ContentBlock> {
    struct Pending {
        bbox: BoundingBox,
        spans: Vec<String>,
        last: BoundingBox,
    }

    fn flush(pending: &mut Option<Pending>, blocks: &mut Vec<ContentBlock>) {
        if let Some(p) = pending.take() {
            blocks.push(ContentBlock::text(p.bbox, p.spans));
        }
    }

    let mut blocks = Vec::new();
    let mut pending: Option<Pending> = None;

    for run in runs {
        match run {
            Run::Text { text, bbox } => {
                if let Some(p) = pending.as_mut() {
                    let line = p.last.height().max(1.0);
                    let delta = bbox.top - p.last.top;
                    if delta >= -line && delta <= line * LINE_GAP_FACTOR {
                        p.bbox = BoundingBox::new(
                            p.bbox.left.min(bbox.left),
                            p.bbox.top.min(bbox.top),
                            p.bbox.right.max(bbox.right),
                            p.bbox.bottom.max(bbox.bottom),
                        );
                        p.spans.push(text);
                        p.last = bbox;
                        continue;
                    }
                }
                flush(&mut pending, &mut blocks);
                pending = Some(Pending {
                    bbox,
                    spans: vec![text],
                    last: bbox,
                });
            }
            Run::Image(block) => {
                flush(&mut pending, &mut blocks);
                blocks.push(block);
            }
        }
    }
    flush(&mut pending, &mut blocks);
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::BlockKind;
    use futures::StreamExt;

    fn text(s: &str, top: f32) -> Run {
        Run::Text {
            text: s.to_string(),
            bbox: BoundingBox::new(50.0, top, 300.0, top + 12.0),
        }
    }

    fn spans(block: &ContentBlock) -> Vec<String> {
        match &block.kind {
            BlockKind::Text { spans } => spans.clone(),
            BlockKind::Image { .. } => panic!("expected text block"),
        }
    }

    #[test]
    fn adjacent_lines_form_one_block() {
        let blocks = group_runs(vec![text("Beta", 100.0), text("blockers", 114.0)]);
        assert_eq!(blocks.len(), 1);
        assert_eq!(spans(&blocks[0]), vec!["Beta", "blockers"]);
        assert_eq!(blocks[0].top(), 100.0);
    }

    #[test]
    fn distant_lines_split() {
        let blocks = group_runs(vec![text("Title", 40.0), text("Body", 200.0)]);
        assert_eq!(blocks.len(), 2);
    }

    #[test]
    fn image_closes_text_block() {
        let img = ContentBlock::image(BoundingBox::new(0.0, 112.0, 10.0, 120.0), vec![0; 4], "png");
        let blocks = group_runs(vec![text("a", 100.0), Run::Image(img.clone()), text("b", 113.0)]);
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[1], img);
    }

    #[test]
    fn flip_puts_higher_objects_first() {
        // Letter page: a heading near the top edge, a footer near the bottom.
        let heading = flip_to_top_left(72.0, 700.0, 540.0, 720.0, 792.0);
        let footer = flip_to_top_left(72.0, 30.0, 540.0, 42.0, 792.0);
        assert_eq!(heading, BoundingBox::new(72.0, 72.0, 540.0, 92.0));
        assert_eq!(footer.top, 750.0);
        assert!(heading.top < footer.top);
        assert_eq!(heading.height(), 20.0);
    }

    #[test]
    fn form_space_maps_to_page_space() {
        // A figure form scaled by half and placed at (100, 400).
        let form = Transform([0.5, 0.0, 0.0, 0.5, 100.0, 400.0]);
        assert_eq!(form.map_rect(0.0, 0.0, 200.0, 100.0), (100.0, 400.0, 200.0, 450.0));

        let bbox = {
            let (l, b, r, t) = form.map_rect(0.0, 0.0, 200.0, 100.0);
            flip_to_top_left(l, b, r, t, 792.0)
        };
        assert_eq!(bbox, BoundingBox::new(100.0, 342.0, 200.0, 392.0));
    }

    #[test]
    fn nested_forms_apply_inner_matrix_first() {
        let inner = Transform([2.0, 0.0, 0.0, 2.0, 10.0, 0.0]);
        let outer = Transform([1.0, 0.0, 0.0, 1.0, 0.0, 50.0]);
        let combined = inner.then(outer);
        assert_eq!(combined.map_point(1.0, 1.0), (12.0, 52.0));
        assert_eq!(
            combined.map_point(3.0, 4.0),
            outer.map_point(inner.map_point(3.0, 4.0).0, inner.map_point(3.0, 4.0).1)
        );
        assert_eq!(Transform::IDENTITY.then(outer), outer);
    }

    #[test]
    fn rotated_form_still_yields_an_ordered_box() {
        // 90° rotation: (x, y) → (-y, x), then shifted right by 300.
        let rotate = Transform([0.0, 1.0, -1.0, 0.0, 300.0, 0.0]);
        let (l, b, r, t) = rotate.map_rect(0.0, 0.0, 100.0, 50.0);
        assert_eq!((l, b, r, t), (250.0, 0.0, 300.0, 100.0));
        assert!(l <= r && b <= t);
    }

    #[test]
    fn magic_check() {
        assert!(matches!(
            check_magic(b""),
            Err(IngestError::MalformedDocument { .. })
        ));
        assert!(matches!(
            check_magic(b"PK\x03\x04"),
            Err(IngestError::MalformedDocument { .. })
        ));
        assert!(check_magic(b"%PDF-1.7").is_ok());
    }

    #[tokio::test]
    async fn non_pdf_bytes_are_rejected_before_pdfium() {
        let err = open_pdf(b"hello world".to_vec()).await.unwrap_err();
        assert!(matches!(err, IngestError::MalformedDocument { .. }));
    }

    #[test]
    fn from_pages_rejects_empty() {
        assert!(matches!(
            ExtractedDocument::from_pages(vec![]),
            Err(IngestError::MalformedDocument { .. })
        ));
    }

    #[test]
    fn from_pages_rejects_gaps() {
        let pages = vec![
            PageContent::from_blocks(0, vec![]),
            PageContent::from_blocks(2, vec![]),
        ];
        assert!(ExtractedDocument::from_pages(pages).is_err());
    }

    #[tokio::test]
    async fn from_pages_streams_in_order() {
        let pages = vec![
            PageContent::from_blocks(0, vec![]),
            PageContent::from_blocks(1, vec![]),
        ];
        let doc = ExtractedDocument::from_pages(pages).unwrap();
        assert_eq!(doc.page_count, 2);
        let indices: Vec<usize> = doc
            .pages
            .map(|p| p.unwrap().index)
            .collect()
            .await;
        assert_eq!(indices, vec![0, 1]);
    }
}
