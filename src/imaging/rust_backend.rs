//! Pure Rust transform backend built on the `image` crate.
//!
//! Everything is statically linked into the binary.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, GIF, TIFF, WebP) | `image::ImageReader` (format sniffed from content) |
//! | Resize | `image::DynamicImage::resize_exact` with `Lanczos3` |
//! | Crop (`cover`) | `image::DynamicImage::crop_imm`, centered |
//! | Encode → JPEG | `JpegEncoder::new_with_quality` |
//! | Encode → PNG | `PngEncoder` with best compression, adaptive filtering |
//! | Encode → WebP | `WebPEncoder::new_lossless` (the only WebP encoder in `image`; ignores quality) |
//! | Encode → AVIF | `AvifEncoder` (rav1e, speed 6) |
//! | Encode → GIF, TIFF | `DynamicImage::write_to` |
//!
//! A lossless re-encode of a lossy WebP always comes out larger, so such
//! inputs are rejected with [`TransformError::LossyWebp`] before decoding
//! when the target is WebP. Forcing another format (`--format avif`) still
//! optimizes them.
//!
//! Output is always written through
//! [`fsops::write_atomically`](crate::fsops::write_atomically), which is what
//! makes in-place transforms (`input == output`) safe.

use super::backend::{TransformError, TransformOutput, Transformer};
use super::calculations::plan_resize;
use super::params::{OutputFormat, Quality, TransformParams};
use crate::fsops;
use image::codecs::avif::AvifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Pure Rust backend using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Load and decode an image from disk.
fn load_image(path: &Path) -> Result<DynamicImage, TransformError> {
    ImageReader::open(path)?
        .with_guessed_format()?
        .decode()
        .map_err(|e| {
            TransformError::ProcessingFailed(format!("Failed to decode {}: {}", path.display(), e))
        })
}

/// Apply the fit policy. Returns the input unchanged when nothing needs to shrink.
fn fit_image(img: DynamicImage, params: &TransformParams) -> DynamicImage {
    let Some(plan) = plan_resize(
        (img.width(), img.height()),
        (params.max_width, params.max_height),
        params.fit,
    ) else {
        return img;
    };

    let resized = if (plan.width, plan.height) == (img.width(), img.height()) {
        img
    } else {
        img.resize_exact(plan.width, plan.height, FilterType::Lanczos3)
    };

    match plan.crop {
        Some((w, h)) => {
            let x = (resized.width() - w) / 2;
            let y = (resized.height() - h) / 2;
            resized.crop_imm(x, y, w, h)
        }
        None => resized,
    }
}

/// `true` when `path` is a WebP whose image data is a lossy `VP8 ` chunk.
///
/// Walks the top-level RIFF chunks, so an extended (`VP8X`) file is
/// classified by the bitstream chunk that follows its header.
fn is_lossy_webp(path: &Path) -> Result<bool, TransformError> {
    let data = std::fs::read(path)?;
    if data.len() < 12 || &data[0..4] != b"RIFF" || &data[8..12] != b"WEBP" {
        return Ok(false);
    }
    let mut offset = 12;
    while offset + 8 <= data.len() {
        let fourcc = &data[offset..offset + 4];
        let size = u32::from_le_bytes([
            data[offset + 4],
            data[offset + 5],
            data[offset + 6],
            data[offset + 7],
        ]) as usize;
        match fourcc {
            b"VP8 " => return Ok(true),
            b"VP8L" => return Ok(false),
            _ => {}
        }
        // Chunks are padded to an even length
        offset = offset.saturating_add(8).saturating_add(size + (size & 1));
    }
    Ok(false)
}

fn encode_failed(format: OutputFormat, err: image::ImageError) -> TransformError {
    TransformError::ProcessingFailed(format!("{format} encode failed: {err}"))
}

/// Encode `img` as `format` into `file`.
fn encode(
    img: &DynamicImage,
    format: OutputFormat,
    quality: Quality,
    file: &mut File,
) -> Result<(), TransformError> {
    let mut writer = BufWriter::new(file);
    match format {
        OutputFormat::Jpeg => {
            // Baseline JPEG: 8-bit, no alpha
            let rgb;
            let img = match img {
                DynamicImage::ImageRgb8(_) | DynamicImage::ImageLuma8(_) => img,
                other => {
                    rgb = DynamicImage::ImageRgb8(other.to_rgb8());
                    &rgb
                }
            };
            let encoder = JpegEncoder::new_with_quality(&mut writer, quality.value() as u8);
            img.write_with_encoder(encoder)
                .map_err(|e| encode_failed(format, e))?;
        }
        OutputFormat::Png => {
            let encoder =
                PngEncoder::new_with_quality(&mut writer, CompressionType::Best, PngFilter::Adaptive);
            img.write_with_encoder(encoder)
                .map_err(|e| encode_failed(format, e))?;
        }
        OutputFormat::Webp => {
            let encoder = WebPEncoder::new_lossless(&mut writer);
            img.write_with_encoder(encoder)
                .map_err(|e| encode_failed(format, e))?;
        }
        OutputFormat::Avif => {
            let encoder =
                AvifEncoder::new_with_speed_quality(&mut writer, 6, quality.value() as u8);
            img.write_with_encoder(encoder)
                .map_err(|e| encode_failed(format, e))?;
        }
        OutputFormat::Gif => {
            img.write_to(&mut writer, ImageFormat::Gif)
                .map_err(|e| encode_failed(format, e))?;
        }
        OutputFormat::Tiff => {
            img.write_to(&mut writer, ImageFormat::Tiff)
                .map_err(|e| encode_failed(format, e))?;
        }
    }
    writer.flush()?;
    Ok(())
}

impl Transformer for RustBackend {
    fn transform(
        &self,
        input: &Path,
        output: &Path,
        params: &TransformParams,
    ) -> Result<TransformOutput, TransformError> {
        let format = OutputFormat::resolve(input, params.format)
            .ok_or_else(|| TransformError::UnsupportedFormat(input.display().to_string()))?;

        if format == OutputFormat::Webp && is_lossy_webp(input)? {
            return Err(TransformError::LossyWebp(input.display().to_string()));
        }

        let img = fit_image(load_image(input)?, params);
        let output_size = fsops::write_atomically(output, input, |file| {
            encode(&img, format, params.quality, file)
        })?;

        tracing::trace!(
            input = %input.display(),
            output = %output.display(),
            %format,
            output_size,
            "encoded"
        );
        Ok(TransformOutput { output_size })
    }
}
