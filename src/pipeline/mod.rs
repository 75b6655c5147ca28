//! Pipeline stages for lecture ingestion.
//!
//! ## Data Flow
//!
//! ```text
//! extract ──▶ linearize ──▶ (encode + describe, per qualifying image)
//! (pdfium)    (sort, tokens)   (base64 + vision model)
//! ```
//!
//! 1. [`extract`]   — open the PDF on a blocking thread and stream pages of
//!    text and image blocks
//! 2. [`linearize`] — order blocks top to bottom, filter small images, drive
//!    upload and description, build flattened text or page records
//! 3. [`encode`]    — PNG-encode embedded images and wrap bytes for the
//!    multimodal request
//! 4. [`describe`]  — the only stage that talks to the vision model

pub mod describe;
pub mod encode;
pub mod extract;
pub mod linearize;
