//! Eligibility filter: decides which discovered files enter a transaction.
//!
//! The filter itself is a pure function of a [`Candidate`]'s metadata and the
//! thresholds, with `now` passed in so tests control the clock. The single
//! `stat` happens when the candidate is built ([`Candidate::stat`]); a file
//! that cannot be read fails there, at the caller, not inside the filter.

use crate::fsops::{FsError, FsResult};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Size and age limits. Both optional; when present, strictly positive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EligibilityConfig {
    /// Files smaller than this many bytes are rejected.
    pub min_size: Option<u64>,
    /// Files last modified longer ago than this are rejected.
    pub max_age: Option<Duration>,
}

/// A discovered file and the metadata the filter looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Path relative to the scanned root; mirrored into backup/output trees.
    pub relative_path: PathBuf,
    /// Full path on disk.
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
}

impl Candidate {
    /// Read size and modification time for `root/relative_path`.
    pub fn stat(root: &Path, relative_path: &Path) -> FsResult<Self> {
        let path = root.join(relative_path);
        let meta = std::fs::metadata(&path).map_err(|e| FsError::io("stat", &path, e))?;
        let modified = meta
            .modified()
            .map_err(|e| FsError::io("stat.modified", &path, e))?;
        Ok(Self {
            relative_path: relative_path.to_path_buf(),
            path,
            size: meta.len(),
            modified,
        })
    }
}

/// Why a candidate was filtered out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    TooSmall { size: u64, min_size: u64 },
    TooOld { age: Duration, max_age: Duration },
    /// A backup with the same modification time exists: the file is the
    /// output of an earlier overwrite run.
    AlreadyOptimized,
}

/// Filter verdict. `original_mtime` is kept for restoring timestamps later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Eligibility {
    pub eligible: bool,
    pub original_mtime: SystemTime,
    pub rejection: Option<Rejection>,
}

/// Apply the size floor and age ceiling to `candidate`.
///
/// A modification time in the future counts as age zero.
pub fn is_eligible(
    candidate: &Candidate,
    config: &EligibilityConfig,
    now: SystemTime,
) -> Eligibility {
    let rejection = check(candidate, config, now);
    Eligibility {
        eligible: rejection.is_none(),
        original_mtime: candidate.modified,
        rejection,
    }
}

fn check(candidate: &Candidate, config: &EligibilityConfig, now: SystemTime) -> Option<Rejection> {
    if let Some(min_size) = config.min_size
        && candidate.size < min_size
    {
        return Some(Rejection::TooSmall {
            size: candidate.size,
            min_size,
        });
    }
    if let Some(max_age) = config.max_age {
        let age = now
            .duration_since(candidate.modified)
            .unwrap_or(Duration::ZERO);
        if age > max_age {
            return Some(Rejection::TooOld { age, max_age });
        }
    }
    None
}
