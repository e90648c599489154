//! Run configuration module.
//!
//! Handles loading, validating, and layering the run configuration. Values
//! come from three layers, each overriding the one before:
//!
//! ```text
//! stock defaults  →  imgslim.toml (or --config <path>)  →  CLI flags / env vars
//! ```
//!
//! The result is a single immutable [`RunConfig`] handed to the mode
//! controller at startup. Nothing re-reads the environment mid-run.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! mode = "overwrite"        # overwrite | copy | restore
//!
//! [directories]
//! images = "images"         # Tree to optimize (and restore into)
//! backup = "backup"         # Originals kept by overwrite mode
//! output = "optimized"      # Destination tree for copy mode
//!
//! [filter]
//! extensions = ["jpg", "JPG", "jpeg", "JPEG", "png", "PNG", "gif", "GIF",
//!               "webp", "WEBP", "tif", "TIF", "tiff", "TIFF"]
//! min_size_kb = 800         # Skip files smaller than this ("none" disables)
//! # max_age_hours = 24      # Skip files modified longer ago than this
//!
//! [transform]
//! quality = 80              # Encoder quality (1-100)
//! max_width = 2200          # Bounding box, never enlarged
//! max_height = 2400
//! fit = "inside"            # inside | outside | cover | contain | fill
//! # format = "webp"         # Force an output format
//!
//! [processing]
//! # concurrency = 8         # Parallel transactions, 1-32 (omit for auto)
//!
//! [report]
//! quiet = false             # Suppress per-file lines
//! # owner = "1000:1000"     # chown -R the backup/output tree afterwards
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::eligibility::EligibilityConfig;
use crate::imaging::{Fit, OutputFormat, Quality, TransformParams};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// File looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "imgslim.toml";

/// Hard bounds on the worker pool size.
pub const MIN_CONCURRENCY: usize = 1;
pub const MAX_CONCURRENCY: usize = 32;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Operating mode, fixed for the lifetime of the process.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Optimize in place, keeping originals in the backup tree.
    #[default]
    Overwrite,
    /// Write optimized copies to the output tree; sources are never touched.
    Copy,
    /// Put backed-up originals back over the images tree.
    Restore,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mode::Overwrite => "overwrite",
            Mode::Copy => "copy",
            Mode::Restore => "restore",
        };
        f.write_str(name)
    }
}

/// Run configuration loaded from `imgslim.toml` plus CLI/env overrides.
///
/// All fields have sensible defaults. User config files need only specify
/// the values they want to override. Unknown keys are rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub mode: Mode,
    /// Where images are read from and written to.
    pub directories: DirectoriesConfig,
    /// Which discovered files are candidates.
    pub filter: FilterConfig,
    /// Encoding parameters passed to the transform backend.
    pub transform: TransformConfig,
    /// Worker pool settings.
    pub processing: ProcessingConfig,
    /// Output verbosity and post-run ownership.
    pub report: ReportConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DirectoriesConfig {
    pub images: PathBuf,
    pub backup: PathBuf,
    pub output: PathBuf,
}

impl Default for DirectoriesConfig {
    fn default() -> Self {
        Self {
            images: PathBuf::from("images"),
            backup: PathBuf::from("backup"),
            output: PathBuf::from("optimized"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilterConfig {
    /// File extensions to match, case-sensitive, without the dot.
    pub extensions: Vec<String>,
    /// Minimum file size in KB (1 KB = 1024 bytes). `None` disables the floor.
    #[serde(
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_threshold"
    )]
    pub min_size_kb: Option<u64>,
    /// Maximum age in hours since last modification. `None` disables the ceiling.
    #[serde(
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_threshold"
    )]
    pub max_age_hours: Option<u64>,
}

/// Extensions matched by default: common web formats in both cases.
pub const DEFAULT_EXTENSIONS: &[&str] = &[
    "jpg", "JPG", "jpeg", "JPEG", "png", "PNG", "gif", "GIF", "webp", "WEBP", "tif", "TIF",
    "tiff", "TIFF",
];

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            extensions: DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            min_size_kb: Some(800),
            max_age_hours: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransformConfig {
    pub quality: u32,
    pub max_width: u32,
    pub max_height: u32,
    pub fit: Fit,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<OutputFormat>,
}

impl Default for TransformConfig {
    fn default() -> Self {
        let params = TransformParams::default();
        Self {
            quality: params.quality.value(),
            max_width: params.max_width,
            max_height: params.max_height,
            fit: params.fit,
            format: params.format,
        }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Number of transactions running at once.
    /// When absent, defaults to the number of CPU cores, clamped to 1-32.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReportConfig {
    /// Suppress per-file output; the final summary is still printed.
    pub quiet: bool,
    /// `user[:group]` (names or numeric ids) applied recursively after the run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

/// Resolve the effective worker count.
///
/// - `None` → available cores, clamped to `[1, 32]`
/// - `Some(n)` → `n` as given (already validated to lie in `[1, 32]`)
pub fn effective_concurrency(config: &ProcessingConfig) -> usize {
    config.concurrency.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .clamp(MIN_CONCURRENCY, MAX_CONCURRENCY)
    })
}

fn validate_extension(ext: &str) -> Result<(), ConfigError> {
    const FORBIDDEN: &[char] = &['/', '\\', '*', '?', '[', ']', '{', '}', ',', '.'];
    if ext.is_empty() || ext.contains(FORBIDDEN) || ext.contains(char::is_whitespace) {
        return Err(ConfigError::Validation(format!(
            "filter.extensions entry {ext:?} must be a bare extension like \"jpg\""
        )));
    }
    Ok(())
}

impl RunConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.transform.quality) {
            return Err(ConfigError::Validation(
                "transform.quality must be 1-100".into(),
            ));
        }
        if self.transform.max_width == 0 || self.transform.max_height == 0 {
            return Err(ConfigError::Validation(
                "transform.max_width and transform.max_height must be non-zero".into(),
            ));
        }
        if self.filter.extensions.is_empty() {
            return Err(ConfigError::Validation(
                "filter.extensions must not be empty".into(),
            ));
        }
        for ext in &self.filter.extensions {
            validate_extension(ext)?;
        }
        if self.filter.min_size_kb == Some(0) {
            return Err(ConfigError::Validation(
                "filter.min_size_kb must be positive (use `none` to disable)".into(),
            ));
        }
        if self.filter.max_age_hours == Some(0) {
            return Err(ConfigError::Validation(
                "filter.max_age_hours must be positive (use `none` to disable)".into(),
            ));
        }
        if let Some(n) = self.processing.concurrency
            && !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&n)
        {
            return Err(ConfigError::Validation(format!(
                "processing.concurrency must be {MIN_CONCURRENCY}-{MAX_CONCURRENCY}, got {n}"
            )));
        }
        if let Some(owner) = &self.report.owner {
            owner
                .parse::<crate::ownership::OwnerSpec>()
                .map_err(|e| ConfigError::Validation(format!("report.owner: {e}")))?;
            if !cfg!(unix) {
                return Err(ConfigError::Validation(
                    "report.owner is only supported on Unix".into(),
                ));
            }
        }
        let dirs = &self.directories;
        match self.mode {
            Mode::Overwrite | Mode::Restore if dirs.backup == dirs.images => {
                return Err(ConfigError::Validation(
                    "directories.backup must differ from directories.images".into(),
                ));
            }
            Mode::Copy if dirs.output == dirs.images => {
                return Err(ConfigError::Validation(
                    "directories.output must differ from directories.images".into(),
                ));
            }
            _ => {}
        }
        Ok(())
    }

    /// Thresholds for the eligibility filter, converted to bytes and durations.
    pub fn eligibility(&self) -> EligibilityConfig {
        EligibilityConfig {
            min_size: self.filter.min_size_kb.map(|kb| kb.saturating_mul(1024)),
            max_age: self
                .filter
                .max_age_hours
                .map(|h| Duration::from_secs(h.saturating_mul(3600))),
        }
    }

    /// Parameters handed to the transform backend for every file.
    pub fn transform_params(&self) -> TransformParams {
        TransformParams {
            quality: Quality::new(self.transform.quality),
            max_width: self.transform.max_width,
            max_height: self.transform.max_height,
            fit: self.transform.fit,
            format: self.transform.format,
        }
    }
}

/// A size or age limit given on the command line: a positive number, or
/// `none` to disable the limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Threshold(pub Option<u64>);

impl FromStr for Threshold {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("none") || s.eq_ignore_ascii_case("off") {
            return Ok(Threshold(None));
        }
        s.parse::<u64>()
            .map(|n| Threshold(Some(n)))
            .map_err(|_| format!("expected a positive number or `none`, got {s:?}"))
    }
}

/// Accepts either a number or the words `none` / `off` for a threshold key.
///
/// TOML has no null, so a file turns the stock size floor off with
/// `min_size_kb = "none"`.
fn deserialize_threshold<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Word(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(Some(n)),
        Raw::Word(word) => word
            .parse::<Threshold>()
            .map(|Threshold(limit)| limit)
            .map_err(serde::de::Error::custom),
    }
}

/// Values supplied by CLI flags or environment variables.
///
/// Every field is optional; only the ones set replace what the config file
/// (or stock defaults) provided.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub mode: Option<Mode>,
    pub images: Option<PathBuf>,
    pub backup: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub extensions: Option<Vec<String>>,
    pub min_size_kb: Option<Threshold>,
    pub max_age_hours: Option<Threshold>,
    pub quality: Option<u32>,
    pub max_width: Option<u32>,
    pub max_height: Option<u32>,
    pub fit: Option<Fit>,
    pub format: Option<OutputFormat>,
    pub concurrency: Option<usize>,
    pub quiet: Option<bool>,
    pub owner: Option<String>,
}

impl ConfigOverrides {
    /// Layer these overrides on top of `config`.
    pub fn apply(self, mut config: RunConfig) -> RunConfig {
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(images) = self.images {
            config.directories.images = images;
        }
        if let Some(backup) = self.backup {
            config.directories.backup = backup;
        }
        if let Some(output) = self.output {
            config.directories.output = output;
        }
        if let Some(extensions) = self.extensions {
            config.filter.extensions = extensions
                .into_iter()
                .map(|e| e.trim().to_string())
                .filter(|e| !e.is_empty())
                .collect();
        }
        if let Some(Threshold(kb)) = self.min_size_kb {
            config.filter.min_size_kb = kb;
        }
        if let Some(Threshold(hours)) = self.max_age_hours {
            config.filter.max_age_hours = hours;
        }
        if let Some(quality) = self.quality {
            config.transform.quality = quality;
        }
        if let Some(w) = self.max_width {
            config.transform.max_width = w;
        }
        if let Some(h) = self.max_height {
            config.transform.max_height = h;
        }
        if let Some(fit) = self.fit {
            config.transform.fit = fit;
        }
        if self.format.is_some() {
            config.transform.format = self.format;
        }
        if self.concurrency.is_some() {
            config.processing.concurrency = self.concurrency;
        }
        if let Some(quiet) = self.quiet {
            config.report.quiet = quiet;
        }
        if self.owner.is_some() {
            config.report.owner = self.owner;
        }
        config
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(RunConfig::default())
        .unwrap_or_else(|_| toml::Value::Table(toml::map::Map::new()))
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
/// Returns `Err` if the file exists but contains invalid TOML.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<RunConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: RunConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load the run config.
///
/// An explicit `path` must exist. Without one, [`DEFAULT_CONFIG_FILE`] in the
/// working directory is used if present, and stock defaults otherwise.
pub fn load_config(path: Option<&Path>) -> Result<RunConfig, ConfigError> {
    let overlay = match path {
        Some(p) => Some(load_raw_config(p)?.ok_or_else(|| ConfigError::NotFound(p.to_path_buf()))?),
        None => load_raw_config(Path::new(DEFAULT_CONFIG_FILE))?,
    };
    resolve_config(stock_defaults_value(), overlay)
}

/// Load the config file, layer CLI/env overrides on top, and validate the result.
pub fn build_config(
    path: Option<&Path>,
    overrides: ConfigOverrides,
) -> Result<RunConfig, ConfigError> {
    let config = overrides.apply(load_config(path)?);
    config.validate()?;
    Ok(config)
}

/// Returns a fully-commented stock `imgslim.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# imgslim Configuration
# =====================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
#
# Every key can also be set from the command line or the environment;
# those win over this file. Unknown keys will cause an error.

# overwrite: optimize in place, originals kept under directories.backup
# copy:      write optimized files under directories.output
# restore:   copy originals from directories.backup back over directories.images
mode = "overwrite"

# ---------------------------------------------------------------------------
# Directories
# ---------------------------------------------------------------------------
[directories]
images = "images"
backup = "backup"
output = "optimized"

# ---------------------------------------------------------------------------
# Which files are processed
# ---------------------------------------------------------------------------
[filter]
# Case-sensitive, matched anywhere below directories.images.
extensions = ["jpg", "JPG", "jpeg", "JPEG", "png", "PNG", "gif", "GIF", "webp", "WEBP", "tif", "TIF", "tiff", "TIFF"]

# Files smaller than this (in KB) are skipped. "none" processes every size.
min_size_kb = 800

# Files last modified more than this many hours ago are skipped.
# max_age_hours = 24

# ---------------------------------------------------------------------------
# Encoding
# ---------------------------------------------------------------------------
[transform]
# Encoder quality, 1-100. Ignored by lossless formats.
quality = 80

# Bounding box. Images are shrunk to fit, never enlarged.
max_width = 2200
max_height = 2400

# inside | outside | cover | contain | fill
fit = "inside"

# Force an output format: jpeg | png | webp | gif | tiff | avif.
# Omit to keep each file's own format.
# format = "webp"

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Transactions running in parallel, 1-32.
# Omit to use the number of CPU cores (capped at 32).
# concurrency = 8

# ---------------------------------------------------------------------------
# Reporting
# ---------------------------------------------------------------------------
[report]
# Only print the final summary.
quiet = false

# Recursively chown the backup (overwrite) or output (copy) tree after the run.
# owner = "1000:1000"
"##
}
