//! Image decoding with format detection, orientation normalization, and timeout support.

use image::error::ImageError;
use image::{DynamicImage, GenericImageView, ImageFormat};
use std::io::Cursor;
use std::time::Duration;
use tokio::time::timeout;

use super::orientation::Orientation;
use crate::config::LimitsConfig;
use crate::error::PipelineError;

/// Image decoder with configurable limits and timeout.
pub struct ImageDecoder {
    limits: LimitsConfig,
}

/// A decoded image whose pixels are already in display orientation.
///
/// The source orientation has been consumed; nothing downstream should
/// apply it again.
pub struct NormalizedImage {
    /// Upright pixel data
    pub image: DynamicImage,
    /// Detected source format
    pub format: ImageFormat,
    /// Width after orientation correction
    pub width: u32,
    /// Height after orientation correction
    pub height: u32,
    /// The orientation that was applied
    pub applied_orientation: Orientation,
}

impl ImageDecoder {
    /// Create a new decoder with the given limits.
    pub fn new(limits: LimitsConfig) -> Self {
        Self { limits }
    }

    /// Decode on the blocking pool, bounded by `limits.decode_timeout_ms`.
    ///
    /// Enforces `limits.max_image_dimension` on the normalized result.
    pub async fn decode(
        &self,
        bytes: Vec<u8>,
        declared_content_type: Option<String>,
    ) -> Result<NormalizedImage, PipelineError> {
        let timeout_duration = Duration::from_millis(self.limits.decode_timeout_ms);

        let decode_result = timeout(timeout_duration, async move {
            tokio::task::spawn_blocking(move || {
                Self::decode_sync(&bytes, declared_content_type.as_deref())
            })
            .await
        })
        .await;

        let decoded = match decode_result {
            Ok(Ok(result)) => result?,
            Ok(Err(e)) => {
                return Err(PipelineError::CorruptInput(format!(
                    "decoder task failed: {e}"
                )))
            }
            Err(_) => {
                return Err(PipelineError::Timeout {
                    stage: "decode".to_string(),
                    timeout_ms: self.limits.decode_timeout_ms,
                })
            }
        };

        let max_dim = self.limits.max_image_dimension;
        if decoded.width > max_dim || decoded.height > max_dim {
            return Err(PipelineError::InputTooLarge(format!(
                "{}x{} exceeds the {max_dim}px dimension limit",
                decoded.width, decoded.height
            )));
        }
        Ok(decoded)
    }

    /// Synchronous decode. Pure: no I/O beyond reading `bytes`.
    ///
    /// Format detection uses magic bytes first and falls back to the
    /// declared content type.
    pub fn decode_sync(
        bytes: &[u8],
        declared_content_type: Option<&str>,
    ) -> Result<NormalizedImage, PipelineError> {
        let mut reader = image::ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| PipelineError::CorruptInput(format!("cannot read header: {e}")))?;

        let format = match reader.format() {
            Some(format) => format,
            None => {
                let hinted = declared_content_type
                    .and_then(ImageFormat::from_mime_type)
                    .ok_or_else(|| {
                        PipelineError::UnsupportedFormat(format!(
                            "unrecognized image data (declared {})",
                            declared_content_type.unwrap_or("no content type")
                        ))
                    })?;
                reader.set_format(hinted);
                hinted
            }
        };

        if !format.reading_enabled() {
            return Err(PipelineError::UnsupportedFormat(format!(
                "{} decoding is not supported",
                format_to_string(format)
            )));
        }

        if format == ImageFormat::Jpeg && !jpeg_scan_is_terminated(bytes) {
            return Err(PipelineError::CorruptInput(
                "JPEG entropy data is truncated (no EOI marker after the last scan)".into(),
            ));
        }

        let image = reader.decode().map_err(classify_decode_error)?;
        let orientation = Orientation::read(bytes);
        let image = orientation.apply(image);
        let (width, height) = image.dimensions();

        Ok(NormalizedImage {
            image,
            format,
            width,
            height,
            applied_orientation: orientation,
        })
    }
}

/// Whether an EOI marker follows the last start-of-scan marker.
///
/// The JPEG decoder pads a stream that ends mid-scan with gray blocks instead
/// of failing. Inside entropy-coded data every `0xFF` is followed by a stuffed
/// `0x00` or a restart marker, so `FF D9` after the final `FF DA` can only be
/// the real end of image. Bytes after EOI are ignored.
fn jpeg_scan_is_terminated(bytes: &[u8]) -> bool {
    let Some(last_scan) = bytes.windows(2).rposition(|w| w == [0xFF, 0xDA]) else {
        return false;
    };
    bytes[last_scan + 2..]
        .windows(2)
        .any(|w| w == [0xFF, 0xD9])
}

fn classify_decode_error(error: ImageError) -> PipelineError {
    match error {
        ImageError::Unsupported(e) => PipelineError::UnsupportedFormat(e.to_string()),
        ImageError::Limits(e) => PipelineError::InputTooLarge(e.to_string()),
        other => PipelineError::CorruptInput(other.to_string()),
    }
}

/// Convert an ImageFormat to a string representation.
pub fn format_to_string(format: ImageFormat) -> String {
    match format {
        ImageFormat::Jpeg => "jpeg".to_string(),
        ImageFormat::Png => "png".to_string(),
        ImageFormat::WebP => "webp".to_string(),
        ImageFormat::Gif => "gif".to_string(),
        ImageFormat::Tiff => "tiff".to_string(),
        ImageFormat::Bmp => "bmp".to_string(),
        ImageFormat::Ico => "ico".to_string(),
        ImageFormat::Pnm => "pnm".to_string(),
        ImageFormat::Avif => "avif".to_string(),
        _ => "unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use image::codecs::jpeg::JpegEncoder;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        DynamicImage::new_rgb8(width, height)
            .write_to(&mut buffer, ImageFormat::Png)
            .unwrap();
        buffer.into_inner()
    }

    fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
        let mut buffer = Vec::new();
        DynamicImage::new_rgb8(width, height)
            .write_with_encoder(JpegEncoder::new_with_quality(&mut buffer, 90))
            .unwrap();
        buffer
    }

    #[test]
    fn test_format_to_string() {
        assert_eq!(format_to_string(ImageFormat::Jpeg), "jpeg");
        assert_eq!(format_to_string(ImageFormat::Png), "png");
        assert_eq!(format_to_string(ImageFormat::WebP), "webp");
    }

    #[test]
    fn test_decode_png() {
        let decoded = ImageDecoder::decode_sync(&png_bytes(64, 32), None).unwrap();
        assert_eq!(decoded.format, ImageFormat::Png);
        assert_eq!((decoded.width, decoded.height), (64, 32));
        assert_eq!(decoded.applied_orientation, Orientation::Normal);
    }

    #[test]
    fn test_format_detected_by_content_not_declared_type() {
        // PNG bytes declared as JPEG: magic bytes win
        let decoded = ImageDecoder::decode_sync(&png_bytes(8, 8), Some("image/jpeg")).unwrap();
        assert_eq!(decoded.format, ImageFormat::Png);
    }

    #[test]
    fn test_unrecognized_bytes_are_unsupported() {
        let err = ImageDecoder::decode_sync(b"plain text, not pixels", Some("text/plain"))
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::UnsupportedFormat);

        let err = ImageDecoder::decode_sync(b"plain text, not pixels", None)
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::UnsupportedFormat);
    }

    #[test]
    fn test_truncated_jpeg_is_corrupt() {
        let bytes = jpeg_bytes(64, 64);
        let truncated = &bytes[..20];
        let err = ImageDecoder::decode_sync(truncated, Some("image/jpeg"))
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::CorruptInput);
    }

    fn gradient_jpeg(width: u32, height: u32) -> Vec<u8> {
        let image = image::RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x * 7 % 256) as u8, (y * 3 % 256) as u8, ((x ^ y) % 256) as u8])
        });
        let mut buffer = Vec::new();
        DynamicImage::ImageRgb8(image)
            .write_with_encoder(JpegEncoder::new_with_quality(&mut buffer, 90))
            .unwrap();
        buffer
    }

    /// Splice an APP1 Exif segment carrying only an Orientation tag after SOI.
    fn with_exif_orientation(jpeg: &[u8], orientation: u16) -> Vec<u8> {
        let mut tiff = Vec::new();
        tiff.extend_from_slice(b"MM\x00\x2A\x00\x00\x00\x08");
        tiff.extend_from_slice(&1u16.to_be_bytes());
        tiff.extend_from_slice(&0x0112u16.to_be_bytes()); // Orientation
        tiff.extend_from_slice(&3u16.to_be_bytes()); // SHORT
        tiff.extend_from_slice(&1u32.to_be_bytes());
        tiff.extend_from_slice(&orientation.to_be_bytes());
        tiff.extend_from_slice(&[0, 0]);
        tiff.extend_from_slice(&0u32.to_be_bytes());

        let mut payload = b"Exif\x00\x00".to_vec();
        payload.extend_from_slice(&tiff);

        let mut out = jpeg[..2].to_vec();
        out.extend_from_slice(&[0xFF, 0xE1]);
        out.extend_from_slice(&((payload.len() + 2) as u16).to_be_bytes());
        out.extend_from_slice(&payload);
        out.extend_from_slice(&jpeg[2..]);
        out
    }

    #[test]
    fn test_jpeg_truncated_mid_scan_is_corrupt() {
        let bytes = gradient_jpeg(400, 400);
        for cut in [bytes.len() / 2, bytes.len() - 2] {
            let err = ImageDecoder::decode_sync(&bytes[..cut], Some("image/jpeg"))
                .err()
                .unwrap();
            assert_eq!(err.kind(), ErrorKind::CorruptInput, "cut at {cut}");
        }
    }

    #[test]
    fn test_trailing_bytes_after_eoi_are_accepted() {
        let mut bytes = gradient_jpeg(32, 32);
        bytes.extend_from_slice(&[0u8; 16]);
        let decoded = ImageDecoder::decode_sync(&bytes, None).unwrap();
        assert_eq!((decoded.width, decoded.height), (32, 32));
    }

    #[test]
    fn test_jpeg_scan_marker_scan() {
        assert!(jpeg_scan_is_terminated(&[0xFF, 0xD8, 0xFF, 0xDA, 0x12, 0xFF, 0x00, 0xFF, 0xD9]));
        assert!(!jpeg_scan_is_terminated(&[0xFF, 0xD8, 0xFF, 0xDA, 0x12, 0xFF, 0x00]));
        // An EOI belonging to an embedded thumbnail does not count
        assert!(!jpeg_scan_is_terminated(&[0xFF, 0xD9, 0xFF, 0xDA, 0x12, 0x34]));
        assert!(!jpeg_scan_is_terminated(&[0xFF, 0xD8]));
    }

    #[test]
    fn test_exif_orientation_6_swaps_dimensions() {
        let bytes = with_exif_orientation(&gradient_jpeg(40, 20), 6);
        let decoded = ImageDecoder::decode_sync(&bytes, Some("image/jpeg")).unwrap();
        assert_eq!(decoded.applied_orientation, Orientation::Rotate90);
        assert_eq!((decoded.width, decoded.height), (20, 40));
        assert_eq!(decoded.image.dimensions(), (20, 40));
    }

    #[tokio::test]
    async fn test_decode_enforces_dimension_limit() {
        let limits = LimitsConfig {
            max_image_dimension: 16,
            ..LimitsConfig::default()
        };
        let decoder = ImageDecoder::new(limits);
        let err = decoder.decode(png_bytes(32, 8), None).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::InputTooLarge);
    }

    #[tokio::test]
    async fn test_decode_async_round_trip() {
        let decoder = ImageDecoder::new(LimitsConfig::default());
        let decoded = decoder
            .decode(jpeg_bytes(30, 10), Some("image/jpeg".into()))
            .await
            .unwrap();
        assert_eq!(decoded.format, ImageFormat::Jpeg);
        assert_eq!((decoded.width, decoded.height), (30, 10));
    }
}
