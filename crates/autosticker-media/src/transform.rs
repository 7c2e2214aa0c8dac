//! JPEG → WebP sticker conversion.
//!
//! The source is probed by content, never by extension. Only JPEG sources
//! are accepted; everything else, including empty and truncated files, is
//! reported as [`MediaError::UnsupportedFormat`]. Sources above
//! [`MAX_SOURCE_SIZE`] are refused before they are read. The source file is
//! only ever read.

use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat};
use tracing::debug;

use autosticker_shared::constants::{MAX_SOURCE_SIZE, STICKER_CANVAS_PX};
use autosticker_shared::error::MediaError;

use crate::catalog::MediaAsset;

/// A decoded source image, ready to encode.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    image: DynamicImage,
}

impl DecodedImage {
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// Sticker payload produced by [`MediaTransform::encode`]. Owned by the
/// pipeline run that created it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedMedia {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
}

impl EncodedMedia {
    pub fn byte_length(&self) -> u64 {
        self.bytes.len() as u64
    }
}

#[derive(Debug, Clone)]
pub struct MediaTransform {
    canvas_px: u32,
    max_source_bytes: u64,
}

impl Default for MediaTransform {
    fn default() -> Self {
        Self::new(STICKER_CANVAS_PX)
    }
}

impl MediaTransform {
    pub fn new(canvas_px: u32) -> Self {
        Self {
            canvas_px,
            max_source_bytes: MAX_SOURCE_SIZE,
        }
    }

    pub fn with_max_source_bytes(mut self, max: u64) -> Self {
        self.max_source_bytes = max;
        self
    }

    pub async fn decode(&self, asset: &MediaAsset) -> Result<DecodedImage, MediaError> {
        // the listed length may be stale, so the read itself is bounded too
        check_source_size(asset.byte_length, self.max_source_bytes)?;
        let bytes = tokio::fs::read(&asset.path).await?;
        check_source_size(bytes.len() as u64, self.max_source_bytes)?;
        debug!(
            path = %asset.path.display(),
            size = bytes.len(),
            "Read media source"
        );

        tokio::task::spawn_blocking(move || decode_jpeg(&bytes))
            .await
            .map_err(|e| MediaError::UnsupportedFormat(format!("decoder task failed: {e}")))?
    }

    pub async fn encode(&self, decoded: DecodedImage) -> Result<EncodedMedia, MediaError> {
        let canvas_px = self.canvas_px;
        tokio::task::spawn_blocking(move || encode_webp(&decoded, canvas_px))
            .await
            .map_err(|e| MediaError::Encode(format!("encoder task failed: {e}")))?
    }
}

fn check_source_size(size: u64, max: u64) -> Result<(), MediaError> {
    if size > max {
        return Err(MediaError::TooLarge { size, max });
    }
    Ok(())
}

/// Identify an image by its magic bytes.
pub fn probe_format(bytes: &[u8]) -> Option<ImageFormat> {
    image::guess_format(bytes).ok()
}

pub fn decode_jpeg(bytes: &[u8]) -> Result<DecodedImage, MediaError> {
    match probe_format(bytes) {
        Some(ImageFormat::Jpeg) => {}
        Some(other) => {
            return Err(MediaError::UnsupportedFormat(format!(
                "{other:?} source, only JPEG is accepted"
            )));
        }
        None if bytes.is_empty() => {
            return Err(MediaError::UnsupportedFormat("empty file".to_string()));
        }
        None => {
            return Err(MediaError::UnsupportedFormat(
                "unrecognised content".to_string(),
            ));
        }
    }

    let image = image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)
        .map_err(|e| MediaError::UnsupportedFormat(format!("corrupt JPEG: {e}")))?;

    Ok(DecodedImage { image })
}

/// Fit the image inside a `canvas_px` square (aspect preserved, never
/// upscaled) and encode it as lossless RGBA WebP.
pub fn encode_webp(decoded: &DecodedImage, canvas_px: u32) -> Result<EncodedMedia, MediaError> {
    let (width, height) = decoded.image.dimensions();
    if width == 0 || height == 0 || canvas_px == 0 {
        return Err(MediaError::Encode(format!(
            "cannot fit {width}x{height} into {canvas_px}px canvas"
        )));
    }

    let fitted = if width > canvas_px || height > canvas_px {
        decoded.image.resize(canvas_px, canvas_px, FilterType::Triangle)
    } else {
        decoded.image.clone()
    };
    let rgba = DynamicImage::ImageRgba8(fitted.to_rgba8());

    let mut bytes = Vec::new();
    rgba.write_with_encoder(WebPEncoder::new_lossless(&mut bytes))
        .map_err(|e| MediaError::Encode(e.to_string()))?;

    let mime_type = probe_format(&bytes)
        .filter(|f| *f == ImageFormat::WebP)
        .map(|f| f.to_mime_type().to_string())
        .ok_or_else(|| MediaError::Encode("encoder output is not WebP".to_string()))?;

    debug!(
        source = %format!("{width}x{height}"),
        output = %format!("{}x{}", rgba.width(), rgba.height()),
        size = bytes.len(),
        "Encoded sticker"
    );

    Ok(EncodedMedia {
        width: rgba.width(),
        height: rgba.height(),
        bytes,
        mime_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use std::path::PathBuf;

    fn image_bytes(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> =
            ImageBuffer::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]));
        let mut buf = Vec::new();
        let mut cursor = std::io::Cursor::new(&mut buf);
        img.write_to(&mut cursor, format).unwrap();
        buf
    }

    fn asset_at(path: PathBuf) -> MediaAsset {
        MediaAsset {
            format_tag: ImageFormat::from_path(&path).ok(),
            byte_length: std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0),
            path,
        }
    }

    #[test]
    fn test_decode_jpeg() {
        let decoded = decode_jpeg(&image_bytes(40, 30, ImageFormat::Jpeg)).unwrap();
        assert_eq!(decoded.dimensions(), (40, 30));
    }

    #[test]
    fn test_png_rejected() {
        let err = decode_jpeg(&image_bytes(10, 10, ImageFormat::Png)).unwrap_err();
        assert!(matches!(err, MediaError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_empty_rejected() {
        let err = decode_jpeg(&[]).unwrap_err();
        assert!(matches!(err, MediaError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_truncated_jpeg_rejected() {
        let full = image_bytes(64, 64, ImageFormat::Jpeg);
        let err = decode_jpeg(&full[..20]).unwrap_err();
        assert!(matches!(err, MediaError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_garbage_rejected() {
        let err = decode_jpeg(b"definitely not an image").unwrap_err();
        assert!(matches!(err, MediaError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_encode_small_image_keeps_size() {
        let decoded = decode_jpeg(&image_bytes(64, 48, ImageFormat::Jpeg)).unwrap();
        let encoded = encode_webp(&decoded, 512).unwrap();

        assert_eq!(encoded.mime_type, "image/webp");
        assert_eq!((encoded.width, encoded.height), (64, 48));
        assert_eq!(&encoded.bytes[..4], b"RIFF");
        assert_eq!(&encoded.bytes[8..12], b"WEBP");
    }

    #[test]
    fn test_encode_large_image_fits_canvas() {
        let decoded = decode_jpeg(&image_bytes(1024, 512, ImageFormat::Jpeg)).unwrap();
        let encoded = encode_webp(&decoded, 512).unwrap();
        assert_eq!((encoded.width, encoded.height), (512, 256));
    }

    #[test]
    fn test_encoding_twice_is_stable() {
        let source = image_bytes(700, 300, ImageFormat::Jpeg);
        let a = encode_webp(&decode_jpeg(&source).unwrap(), 512).unwrap();
        let b = encode_webp(&decode_jpeg(&source).unwrap(), 512).unwrap();

        assert_eq!(a.mime_type, b.mime_type);
        assert_eq!((a.width, a.height), (b.width, b.height));
        assert_eq!(a.byte_length(), a.bytes.len() as u64);
    }

    #[tokio::test]
    async fn test_png_with_jpg_extension_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("liar.jpg");
        std::fs::write(&path, image_bytes(8, 8, ImageFormat::Png)).unwrap();

        let err = MediaTransform::default()
            .decode(&asset_at(path))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::UnsupportedFormat(_)));
    }

    #[tokio::test]
    async fn test_oversized_source_refused_before_read() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("huge.jpg");
        std::fs::write(&path, image_bytes(64, 64, ImageFormat::Jpeg)).unwrap();

        let transform = MediaTransform::default().with_max_source_bytes(16);

        // listed size over the limit: the file is never opened
        let listed = MediaAsset {
            path: dir.path().join("not-there.jpg"),
            format_tag: Some(ImageFormat::Jpeg),
            byte_length: 17,
        };
        let err = transform.decode(&listed).await.unwrap_err();
        assert!(matches!(err, MediaError::TooLarge { size: 17, max: 16 }));

        // listed size understated: the bytes actually read are checked
        let mut understated = asset_at(path);
        understated.byte_length = 0;
        let err = transform.decode(&understated).await.unwrap_err();
        assert!(matches!(err, MediaError::TooLarge { max: 16, .. }));
    }

    #[tokio::test]
    async fn test_source_left_untouched() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("cat.jpg");
        let source = image_bytes(32, 32, ImageFormat::Jpeg);
        std::fs::write(&path, &source).unwrap();

        let transform = MediaTransform::default();
        let decoded = transform.decode(&asset_at(path.clone())).await.unwrap();
        let encoded = transform.encode(decoded).await.unwrap();

        assert_eq!(encoded.mime_type, "image/webp");
        assert_eq!(std::fs::read(&path).unwrap(), source);
    }
}
