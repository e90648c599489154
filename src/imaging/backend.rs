//! Transform backend trait and shared types.
//!
//! The [`Transformer`] trait is the one capability the rest of the crate needs
//! from an image library: read `input`, resize + re-encode it, and place the
//! result at `output`. Transactions only ever see a [`TransformOutput`] or a
//! [`TransformError`]; no callbacks, no partial state.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend), pure Rust, built on
//! the `image` crate.
//!
//! ## Contract
//!
//! - The output is written to a temporary sibling and renamed over `output`,
//!   so a failure never leaves a truncated file behind. This holds when
//!   `input == output` too.
//! - The format comes from `input`'s extension unless
//!   [`TransformParams::format`](super::params::TransformParams) forces one.

use super::params::TransformParams;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransformError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Fs(#[from] crate::fsops::FsError),
    #[error("Unsupported format for {0}")]
    UnsupportedFormat(String),
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
    #[error("Lossy WebP input {0} cannot be re-encoded smaller as lossless WebP")]
    LossyWebp(String),
}

/// Result of a successful transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformOutput {
    /// Size in bytes of the file now at `output`.
    pub output_size: u64,
}

/// Resize + re-encode capability used by every transaction.
///
/// `Send + Sync` because a single backend instance is shared by all scheduler
/// workers.
pub trait Transformer: Send + Sync {
    fn transform(
        &self,
        input: &Path,
        output: &Path,
        params: &TransformParams,
    ) -> Result<TransformOutput, TransformError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{Script, ScriptedBackend};
    use tempfile::TempDir;

    #[test]
    fn scripted_backend_writes_requested_size() {
        let tmp = TempDir::new().unwrap();
        let input = tmp.path().join("in.jpg");
        let output = tmp.path().join("out.jpg");
        std::fs::write(&input, vec![1u8; 1000]).unwrap();

        let backend = ScriptedBackend::new().with("in.jpg", Script::Output(400));
        let result = backend
            .transform(&input, &output, &TransformParams::default())
            .unwrap();

        assert_eq!(result.output_size, 400);
        assert_eq!(std::fs::metadata(&output).unwrap().len(), 400);
        assert_eq!(backend.calls(), vec!["in.jpg".to_string()]);
    }

    #[test]
    fn scripted_backend_failure_leaves_output_untouched() {
        let tmp = TempDir::new().unwrap();
        let input = tmp.path().join("in.jpg");
        let output = tmp.path().join("out.jpg");
        std::fs::write(&input, vec![1u8; 1000]).unwrap();
        std::fs::write(&output, b"original").unwrap();

        let backend = ScriptedBackend::new().with("in.jpg", Script::Fail("corrupt header"));
        let err = backend
            .transform(&input, &output, &TransformParams::default())
            .unwrap_err();

        assert!(err.to_string().contains("corrupt header"));
        assert_eq!(std::fs::read(&output).unwrap(), b"original");
    }
}
