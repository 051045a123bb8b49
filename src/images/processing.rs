use std::io::Cursor;

use bytes::Bytes;
use image::{
    codecs::jpeg::JpegEncoder, imageops::FilterType, DynamicImage, ImageDecoder, ImageFormat,
    ImageReader,
};

use crate::error::PipelineError;
use crate::inference::cache::sha256_hex;

const JPEG_QUALITY: u8 = 85;

/// Re-encoded photo ready for storage, with its content hash.
#[derive(Debug, Clone)]
pub struct ProcessedImage {
    pub bytes: Bytes,
    pub content_type: &'static str,
    pub width: u32,
    pub height: u32,
    pub content_hash: String,
}

impl ProcessedImage {
    pub fn extension(&self) -> &'static str {
        ext_from_mime(self.content_type).unwrap_or("bin")
    }
}

pub fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/heic" => Some("heic"),
        _ => None,
    }
}

fn invalid(e: impl std::fmt::Display) -> PipelineError {
    PipelineError::InvalidImage(e.to_string())
}

/// Decodes, applies EXIF orientation, bounds the longest side and re-encodes. PNG stays PNG,
/// everything else becomes JPEG. CPU bound: call from `spawn_blocking`.
pub fn preprocess(raw: &[u8], max_side: u32) -> Result<ProcessedImage, PipelineError> {
    if raw.is_empty() {
        return Err(invalid("empty upload"));
    }

    let reader = ImageReader::new(Cursor::new(raw))
        .with_guessed_format()
        .map_err(invalid)?;
    let is_png = reader.format() == Some(ImageFormat::Png);

    let mut decoder = reader.into_decoder().map_err(invalid)?;
    let orientation = decoder.orientation().map_err(invalid)?;
    let mut img = DynamicImage::from_decoder(decoder).map_err(invalid)?;
    img.apply_orientation(orientation);

    if img.width().max(img.height()) > max_side {
        img = img.resize(max_side, max_side, FilterType::Lanczos3);
    }

    let mut buf = Vec::new();
    let content_type = if is_png {
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .map_err(invalid)?;
        "image/png"
    } else {
        let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
        rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY))
            .map_err(invalid)?;
        "image/jpeg"
    };

    let content_hash = sha256_hex(&buf);
    Ok(ProcessedImage {
        width: img.width(),
        height: img.height(),
        bytes: Bytes::from(buf),
        content_type,
        content_hash,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{jpeg_bytes, png_bytes};

    #[test]
    fn test_ext_from_mime() {
        assert_eq!(ext_from_mime("image/jpeg"), Some("jpg"));
        assert_eq!(ext_from_mime("image/jpg"), Some("jpg"));
        assert_eq!(ext_from_mime("image/png"), Some("png"));
        assert_eq!(ext_from_mime("image/webp"), Some("webp"));
        assert_eq!(ext_from_mime("application/octet-stream"), None);
    }

    #[test]
    fn bounds_longest_side_and_keeps_png() {
        let out = preprocess(&png_bytes(400, 100, 7), 200).unwrap();
        assert_eq!(out.content_type, "image/png");
        assert_eq!((out.width, out.height), (200, 50));
        assert_eq!(out.content_hash.len(), 64);
        assert_eq!(out.extension(), "png");
    }

    #[test]
    fn small_images_are_not_upscaled() {
        let out = preprocess(&png_bytes(40, 30, 1), 200).unwrap();
        assert_eq!((out.width, out.height), (40, 30));
    }

    #[test]
    fn jpeg_is_reencoded_as_jpeg() {
        let out = preprocess(&jpeg_bytes(64, 48, 3), 1600).unwrap();
        assert_eq!(out.content_type, "image/jpeg");
        assert_eq!(out.extension(), "jpg");
    }

    #[test]
    fn same_bytes_same_hash() {
        let raw = png_bytes(32, 32, 9);
        let a = preprocess(&raw, 1600).unwrap();
        let b = preprocess(&raw, 1600).unwrap();
        assert_eq!(a.content_hash, b.content_hash);
        assert_ne!(a.content_hash, preprocess(&png_bytes(32, 32, 10), 1600).unwrap().content_hash);
    }

    #[test]
    fn garbage_is_invalid_image() {
        assert!(matches!(
            preprocess(b"definitely not an image", 1600),
            Err(PipelineError::InvalidImage(_))
        ));
        assert!(matches!(preprocess(&[], 1600), Err(PipelineError::InvalidImage(_))));
    }
}
