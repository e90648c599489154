//! Shared test utilities for the imgslim test suite.
//!
//! Provides a scripted [`Transformer`] that writes files of a chosen size
//! without decoding anything, real JPEG/PNG fixture writers for the image
//! backend tests, and a [`TestTree`] with the images/backup/output layout
//! most tests need.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tree = TestTree::new();
//! tree.image("album/big.jpg", 1000 * 1024, days_ago(3));
//!
//! let backend = ScriptedBackend::new().with("big.jpg", Script::Output(700 * 1024));
//! // ... run a transaction or a mode against `tree` with `backend`
//! assert_eq!(backend.calls(), vec!["big.jpg".to_string()]);
//! ```

use crate::fsops;
use crate::imaging::{TransformError, TransformOutput, TransformParams, Transformer};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tempfile::TempDir;

// =========================================================================
// Scripted transformer
// =========================================================================

/// What the scripted backend does for one input file name.
#[derive(Debug, Clone, Copy)]
pub enum Script {
    /// Write exactly this many bytes.
    Output(u64),
    /// Fail with this message; the output is not touched.
    Fail(&'static str),
}

/// Transformer stand-in that never decodes images.
///
/// Files without a script shrink to 70% of their input size. Every call is
/// recorded, and the number of transforms in flight at once is tracked so
/// concurrency bounds can be asserted.
#[derive(Default)]
pub struct ScriptedBackend {
    scripts: HashMap<String, Script>,
    delay: Option<Duration>,
    calls: Mutex<Vec<(PathBuf, PathBuf)>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the behavior for inputs whose file name is `name`.
    pub fn with(mut self, name: &str, script: Script) -> Self {
        self.scripts.insert(name.to_string(), script);
        self
    }

    /// Sleep this long inside every transform.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Input file names in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(input, _)| file_name(input))
            .collect()
    }

    /// `(input, output)` of the most recent call.
    pub fn last_paths(&self) -> Option<(PathBuf, PathBuf)> {
        self.calls.lock().unwrap().last().cloned()
    }

    /// Highest number of transforms observed running at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

impl Transformer for ScriptedBackend {
    fn transform(
        &self,
        input: &Path,
        output: &Path,
        _params: &TransformParams,
    ) -> Result<TransformOutput, TransformError> {
        let running = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        self.calls
            .lock()
            .unwrap()
            .push((input.to_path_buf(), output.to_path_buf()));
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }

        let result = match self.scripts.get(&file_name(input)).copied() {
            Some(Script::Fail(message)) => {
                Err(TransformError::ProcessingFailed(message.to_string()))
            }
            Some(Script::Output(size)) => write_filler(input, output, size),
            None => {
                let size = std::fs::metadata(input)?.len() * 7 / 10;
                write_filler(input, output, size)
            }
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

fn write_filler(input: &Path, output: &Path, size: u64) -> Result<TransformOutput, TransformError> {
    let output_size = fsops::write_atomically(output, input, |file| {
        file.write_all(&vec![0xAB; size as usize])
            .map_err(TransformError::from)
    })?;
    Ok(TransformOutput { output_size })
}

// =========================================================================
// Real image fixtures
// =========================================================================

fn gradient(width: u32, height: u32) -> image::RgbImage {
    image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            ((x + y) % 256) as u8,
        ])
    })
}

/// Write a gradient JPEG of the given dimensions.
pub fn write_test_jpeg(path: &Path, width: u32, height: u32) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    gradient(width, height)
        .save_with_format(path, image::ImageFormat::Jpeg)
        .unwrap();
}

/// Write a gradient PNG of the given dimensions.
pub fn write_test_png(path: &Path, width: u32, height: u32) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    gradient(width, height)
        .save_with_format(path, image::ImageFormat::Png)
        .unwrap();
}

// =========================================================================
// Directory layout
// =========================================================================

/// Whole-second timestamp `days` days in the past.
///
/// Truncated to a day boundary so repeated calls within a test agree and the
/// value survives a round trip through the filesystem unchanged.
pub fn days_ago(days: u64) -> SystemTime {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs();
    let today = now / 86_400 * 86_400;
    UNIX_EPOCH + Duration::from_secs(today - days * 86_400)
}

/// Deterministic, size-specific content so byte comparisons mean something.
pub fn content_of(size: u64, seed: u8) -> Vec<u8> {
    (0..size)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

/// Temp directory with empty `images/`, `backup/` and `output/` trees.
pub struct TestTree {
    tmp: TempDir,
}

impl TestTree {
    pub fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        for dir in ["images", "backup", "output"] {
            std::fs::create_dir_all(tmp.path().join(dir)).unwrap();
        }
        Self { tmp }
    }

    pub fn root(&self) -> &Path {
        self.tmp.path()
    }

    pub fn images(&self) -> PathBuf {
        self.tmp.path().join("images")
    }

    pub fn backup(&self) -> PathBuf {
        self.tmp.path().join("backup")
    }

    pub fn output(&self) -> PathBuf {
        self.tmp.path().join("output")
    }

    /// Write `images/<rel>` with `size` bytes and the given mtime. Returns the content.
    pub fn image(&self, rel: &str, size: u64, mtime: SystemTime) -> Vec<u8> {
        write_file(&self.images().join(rel), content_of(size, 7), mtime)
    }

    /// Write `backup/<rel>` with `size` bytes and the given mtime. Returns the content.
    pub fn backup_file(&self, rel: &str, size: u64, mtime: SystemTime) -> Vec<u8> {
        write_file(&self.backup().join(rel), content_of(size, 91), mtime)
    }
}

fn write_file(path: &Path, content: Vec<u8>, mtime: SystemTime) -> Vec<u8> {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, &content).unwrap();
    fsops::set_modified_time(path, mtime).unwrap();
    content
}
