//! Document serialisation: inline image tokens, the flattened document
//! string, the structured page list, and parsing them back.
//!
//! ## Token format
//!
//! ```text
//! <<SLIDE_IMAGE: url="<URL>" caption="Image <n> (Page <p>)" context="<description>">>
//! ```
//!
//! Downstream consumers pull URLs out with a single regular expression over
//! the `url` attribute, so the layout must not drift. The format has no
//! escape syntax: double quotes inside the description are replaced with
//! single quotes before embedding.

use crate::output::{DocumentContent, PageRecord};
use once_cell::sync::Lazy;
use regex::Regex;

/// Paragraph break appended after every text block and token.
pub const PARAGRAPH_BREAK: &str = "\n\n";

static RE_TOKEN_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<<SLIDE_IMAGE: url="([^"]*)""#).unwrap());

/// Caption for the `ordinal`-th image of a document, found on 1-based `page_number`.
pub fn caption(ordinal: usize, page_number: usize) -> String {
    format!("Image {} (Page {})", ordinal, page_number)
}

/// Make a description safe to embed between double quotes.
pub fn escape_context(description: &str) -> String {
    description.replace('"', "'")
}

/// Render one inline image token (without the trailing paragraph break).
pub fn image_token(url: &str, caption: &str, description: &str) -> String {
    format!(
        "<<SLIDE_IMAGE: url=\"{}\" caption=\"{}\" context=\"{}\">>",
        url,
        caption,
        escape_context(description)
    )
}

/// Extract every token URL, left to right.
pub fn token_urls(flattened: &str) -> Vec<String> {
    RE_TOKEN_URL
        .captures_iter(flattened)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Join per-page fragments into the flattened document string.
pub fn flatten_pages<I, S>(fragments: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    fragments
        .into_iter()
        .fold(String::new(), |mut doc, fragment| {
            doc.push_str(fragment.as_ref());
            doc
        })
}

/// The persisted `content` string for either mode.
pub fn serialize_content(content: &DocumentContent) -> String {
    match content {
        DocumentContent::Flattened(s) => s.clone(),
        // Page records are plain strings, numbers and options; encoding cannot fail.
        DocumentContent::Structured(pages) => {
            serde_json::to_string(pages).unwrap_or_else(|_| "[]".to_string())
        }
    }
}

/// Reverse of [`serialize_content`]: a JSON page list is read as structured
/// content, anything else as a flattened string.
pub fn parse_content(raw: &str) -> DocumentContent {
    let trimmed = raw.trim_start();
    if trimmed.starts_with('[') {
        if let Ok(pages) = serde_json::from_str::<Vec<PageRecord>>(raw) {
            return DocumentContent::Structured(pages);
        }
    }
    DocumentContent::Flattened(raw.to_string())
}

/// All blob URLs referenced by stored content, in document order.
///
/// Failed uploads (`null` in structured mode) are not included; flattened
/// placeholders are returned as-is and filtered by the caller.
pub fn referenced_urls(content: &DocumentContent) -> Vec<String> {
    match content {
        DocumentContent::Flattened(s) => token_urls(s),
        DocumentContent::Structured(pages) => pages
            .iter()
            .filter_map(|p| p.image.as_ref().and_then(|img| img.url.clone()))
            .collect(),
    }
}
