//! Variant generation: resize into each bounding box and re-encode.
//!
//! Everything here is pure and deterministic. Given the same normalized
//! image and configuration, the produced bytes are identical, which is what
//! makes re-running an invocation safe.

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::{DynamicImage, GenericImageView};

use super::decode::NormalizedImage;
use crate::config::{EncodeFormat, OutputConfig, VariantSpec};
use crate::error::PipelineError;
use crate::types::Variant;

/// Dimensions that fit `source` inside `target` preserving aspect ratio.
///
/// Never upscales: a source already inside the box keeps its resolution.
///
/// ```
/// # use prism_core::pipeline::variants::fit_within;
/// assert_eq!(fit_within((800, 800), (1024, 1024)), (800, 800));
/// assert_eq!(fit_within((800, 800), (512, 512)), (512, 512));
/// assert_eq!(fit_within((4000, 3000), (1024, 1024)), (1024, 768));
/// ```
pub fn fit_within(source: (u32, u32), target: (u32, u32)) -> (u32, u32) {
    let (src_w, src_h) = source;
    let (tgt_w, tgt_h) = target;

    if src_w <= tgt_w && src_h <= tgt_h {
        return source;
    }

    let scale = f64::min(
        tgt_w as f64 / src_w as f64,
        tgt_h as f64 / src_h as f64,
    );
    let w = ((src_w as f64 * scale).round() as u32).clamp(1, tgt_w.max(1));
    let h = ((src_h as f64 * scale).round() as u32).clamp(1, tgt_h.max(1));
    (w, h)
}

/// Variants that were produced, plus the specs that failed.
#[derive(Debug, Default)]
pub struct GenerationReport {
    /// Successful variants, in configured order
    pub variants: Vec<Variant>,
    /// (variant name, error) for every spec that failed, in configured order
    pub failures: Vec<(String, PipelineError)>,
}

impl GenerationReport {
    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }
}

/// Produces the configured variant set from a normalized image.
pub struct VariantGenerator {
    format: EncodeFormat,
    quality: u8,
}

impl VariantGenerator {
    /// Create a generator using the output format and quality.
    pub fn new(config: &OutputConfig) -> Self {
        Self {
            format: config.format,
            quality: config.quality,
        }
    }

    /// Render every variant. A failing variant is recorded and the rest continue.
    pub fn generate(&self, image: &NormalizedImage, specs: &[VariantSpec]) -> GenerationReport {
        let mut report = GenerationReport::default();

        for spec in specs {
            match self.render(&image.image, spec) {
                Ok(variant) => {
                    tracing::trace!(
                        "  Variant {}: {}x{} ({} bytes)",
                        variant.name,
                        variant.width,
                        variant.height,
                        variant.bytes.len()
                    );
                    report.variants.push(variant);
                }
                Err(e) => {
                    tracing::warn!("Variant {} failed: {e}", spec.name);
                    report.failures.push((spec.name.clone(), e));
                }
            }
        }

        report
    }

    /// Resize and encode one variant.
    pub fn render(&self, image: &DynamicImage, spec: &VariantSpec) -> Result<Variant, PipelineError> {
        if spec.width == 0 || spec.height == 0 {
            return Err(PipelineError::Encoding {
                variant: spec.name.clone(),
                message: format!(
                    "target {}x{} has a zero dimension",
                    spec.width, spec.height
                ),
            });
        }

        let source = image.dimensions();
        let (width, height) = fit_within(source, (spec.width, spec.height));

        let bytes = if (width, height) == source {
            self.encode(image)
        } else {
            self.encode(&image.thumbnail_exact(width, height))
        }
        .map_err(|e| PipelineError::Encoding {
            variant: spec.name.clone(),
            message: e.to_string(),
        })?;

        Ok(Variant {
            name: spec.name.clone(),
            bytes,
            content_type: self.format.content_type().to_string(),
            width,
            height,
        })
    }

    fn encode(&self, image: &DynamicImage) -> image::ImageResult<Vec<u8>> {
        let mut buffer = Vec::new();
        match self.format {
            // JPEG has no alpha channel
            EncodeFormat::Jpeg => DynamicImage::ImageRgb8(image.to_rgb8())
                .write_with_encoder(JpegEncoder::new_with_quality(&mut buffer, self.quality))?,
            EncodeFormat::Png => image.write_with_encoder(PngEncoder::new(&mut buffer))?,
            // The WebP encoder only accepts 8-bit RGB(A)
            EncodeFormat::WebP => DynamicImage::ImageRgba8(image.to_rgba8())
                .write_with_encoder(WebPEncoder::new_lossless(&mut buffer))?,
        }
        Ok(buffer)
    }

    pub fn format(&self) -> EncodeFormat {
        self.format
    }
}
