//! Parameter types for the transform.
//!
//! These structs describe *what* to do, not *how* to do it. They are the
//! interface between the transaction layer (which decides which file goes
//! where) and the [`backend`](super::backend) (which does the pixel work).
//! This separation allows swapping backends (e.g. a scripted fake in tests)
//! without changing transaction logic.
//!
//! ## Types
//!
//! - [`Quality`]: Lossy encoding quality (1–100, default 80). Clamped on construction.
//! - [`Fit`]: How the image is fitted into the `max_width × max_height` box.
//! - [`OutputFormat`]: Encoded format, either derived from the input extension or forced.
//! - [`TransformParams`]: Everything the backend needs besides the two paths.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quality(pub u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(80)
    }
}

/// Resize policy relative to the `max_width × max_height` box.
///
/// Images are never enlarged, whatever the policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Fit {
    /// Shrink until both edges fit inside the box, preserving aspect ratio.
    #[default]
    Inside,
    /// Shrink until both edges are at least the box size, preserving aspect ratio.
    Outside,
    /// Shrink to cover the box, then center-crop to it.
    Cover,
    /// Same scaling as `inside`; no letterboxing is added.
    Contain,
    /// Stretch to the box, ignoring aspect ratio.
    Fill,
}

impl fmt::Display for Fit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Fit::Inside => "inside",
            Fit::Outside => "outside",
            Fit::Cover => "cover",
            Fit::Contain => "contain",
            Fit::Fill => "fill",
        };
        f.write_str(name)
    }
}

/// Encoded output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Jpeg,
    Png,
    Webp,
    Gif,
    Tiff,
    Avif,
}

impl OutputFormat {
    /// Map a file extension (any case) to a format.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "webp" => Some(Self::Webp),
            "gif" => Some(Self::Gif),
            "tif" | "tiff" => Some(Self::Tiff),
            "avif" => Some(Self::Avif),
            _ => None,
        }
    }

    /// Format for `path`, unless `forced` overrides it.
    pub fn resolve(path: &Path, forced: Option<OutputFormat>) -> Option<Self> {
        forced.or_else(|| {
            path.extension()
                .and_then(|e| e.to_str())
                .and_then(Self::from_extension)
        })
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutputFormat::Jpeg => "jpeg",
            OutputFormat::Png => "png",
            OutputFormat::Webp => "webp",
            OutputFormat::Gif => "gif",
            OutputFormat::Tiff => "tiff",
            OutputFormat::Avif => "avif",
        };
        f.write_str(name)
    }
}

/// Parameters for a single transform, independent of the input/output paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformParams {
    pub quality: Quality,
    pub max_width: u32,
    pub max_height: u32,
    pub fit: Fit,
    /// Explicit output format; `None` keeps the input's format.
    pub format: Option<OutputFormat>,
}

impl Default for TransformParams {
    fn default() -> Self {
        Self {
            quality: Quality::default(),
            max_width: 2200,
            max_height: 2400,
            fit: Fit::default(),
            format: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_clamps_to_valid_range() {
        assert_eq!(Quality::new(0).value(), 1);
        assert_eq!(Quality::new(50).value(), 50);
        assert_eq!(Quality::new(150).value(), 100);
    }

    #[test]
    fn quality_default_is_80() {
        assert_eq!(Quality::default().value(), 80);
    }

    #[test]
    fn format_from_extension_ignores_case() {
        assert_eq!(OutputFormat::from_extension("JPG"), Some(OutputFormat::Jpeg));
        assert_eq!(OutputFormat::from_extension("jpeg"), Some(OutputFormat::Jpeg));
        assert_eq!(OutputFormat::from_extension("TIF"), Some(OutputFormat::Tiff));
        assert_eq!(OutputFormat::from_extension("bmp"), None);
    }

    #[test]
    fn forced_format_wins_over_extension() {
        let path = Path::new("photos/a.png");
        assert_eq!(OutputFormat::resolve(path, None), Some(OutputFormat::Png));
        assert_eq!(
            OutputFormat::resolve(path, Some(OutputFormat::Webp)),
            Some(OutputFormat::Webp)
        );
        assert_eq!(OutputFormat::resolve(Path::new("noext"), None), None);
    }

    #[test]
    fn default_params_match_stock_config() {
        let p = TransformParams::default();
        assert_eq!(p.max_width, 2200);
        assert_eq!(p.max_height, 2400);
        assert_eq!(p.fit, Fit::Inside);
        assert_eq!(p.format, None);
    }
}
