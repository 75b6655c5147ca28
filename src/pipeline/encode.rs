//! Image encoding: decoded PDF images → PNG bytes, and bytes → `ImageData`
//! for the vision request.
//!
//! pdfium hands back embedded images as decoded bitmaps, whatever their
//! original filter was. Re-encoding them as PNG gives every image the same
//! lossless format, one file extension for storage keys, and a byte length
//! that is meaningful for the noise threshold (flat logos and bullets
//! compress to almost nothing).
//!
//! The threshold is calibrated against these PNG bytes, not the size of the
//! embedded stream. A JPEG photo usually grows when re-encoded and a flat
//! bitmap shrinks, so an image near the cut-off can land on the other side
//! of it than its raw stream would. Keys always carry [`IMAGE_EXT`], never
//! the embedded filter's extension.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Extension written for every extracted image.
pub const IMAGE_EXT: &str = "png";

/// Encode a decoded image as PNG bytes.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    debug!(
        "Encoded {}x{} image → {} bytes PNG",
        img.width(),
        img.height(),
        buf.len()
    );
    Ok(buf)
}

/// Wrap raw image bytes as a base64 attachment for the vision model.
pub fn image_data(bytes: &[u8], mime_type: &str) -> ImageData {
    ImageData::new(STANDARD.encode(bytes), mime_type).with_detail("high")
}
