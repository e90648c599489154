//! Per-file transactions.
//!
//! A [`Transaction`] owns one eligible [`Candidate`] from admission to a
//! terminal [`Outcome`]. Two variants exist:
//!
//! ## Overwrite
//!
//! ```text
//! Pending ─▶ Running ─┬─ backup fails ──────────────────────────▶ Failed
//!                     ├─ transform fails ─ delete backup ───────▶ Failed
//!                     ├─ output larger ─ move backup back ─ mtime ▶ Reverted
//!                     └─ output ≤ original ─ mtime ─────────────▶ Committed
//! ```
//!
//! 1. **Backup**: byte-exact copy of the original to `backup_root/<relative>`.
//! 2. **Transform**: backup as input, the original path as output, in place.
//! 3. **Verify**: `bytes_saved = original_size - new_size`; negative reverts.
//! 4. **Metadata**: the original modification time is put back on both the
//!    commit and the revert path. On the commit path a failure here is only
//!    logged; the optimized file stays.
//! 5. **Commit**: the backup stays on disk for a later restore run.
//!
//! The revert moves the backup over the output with a rename, so the
//! original content and the disappearance of the backup happen in one atomic
//! step whenever both trees share a filesystem.
//!
//! A file whose backup already carries its modification time is the output
//! of an earlier run and is filtered out with [`Rejection::AlreadyOptimized`],
//! so the first backup of each original survives repeated runs.
//!
//! ## Copy
//!
//! Transform `images_root/<relative>` into `output_root/<relative>`, creating
//! directories as needed. The source is only ever read; there is no backup
//! and no revert.
//!
//! Errors never escape a transaction: every path ends in an [`Outcome`].
//! [`restore_file`] is the inverse of the backup step, used by restore mode.

use crate::eligibility::{Candidate, EligibilityConfig, Rejection, is_eligible};
use crate::fsops;
use crate::imaging::{TransformParams, Transformer};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

/// Lifecycle of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TxState {
    Pending,
    FilteredOut,
    Running,
    Committed,
    Reverted,
    Failed,
}

impl TxState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TxState::FilteredOut | TxState::Committed | TxState::Reverted | TxState::Failed
        )
    }
}

/// Step at which a transaction failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Discover,
    Stat,
    Backup,
    Prepare,
    Transform,
    Revert,
    Metadata,
    Restore,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Discover => "discover",
            Stage::Stat => "stat",
            Stage::Backup => "backup",
            Stage::Prepare => "prepare",
            Stage::Transform => "transform",
            Stage::Revert => "revert",
            Stage::Metadata => "metadata",
            Stage::Restore => "restore",
        };
        f.write_str(name)
    }
}

/// Terminal result of a transaction that ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum Outcome {
    Committed { original_size: u64, new_size: u64 },
    Reverted { original_size: u64, attempted_size: u64 },
    Failed { stage: Stage, reason: String },
}

impl Outcome {
    /// `original - new` for commits; zero otherwise.
    pub fn bytes_saved(&self) -> i64 {
        match self {
            Outcome::Committed {
                original_size,
                new_size,
            } => *original_size as i64 - *new_size as i64,
            _ => 0,
        }
    }

    pub fn state(&self) -> TxState {
        match self {
            Outcome::Committed { .. } => TxState::Committed,
            Outcome::Reverted { .. } => TxState::Reverted,
            Outcome::Failed { .. } => TxState::Failed,
        }
    }

    fn failed(stage: Stage, err: impl fmt::Display) -> Self {
        Outcome::Failed {
            stage,
            reason: err.to_string(),
        }
    }
}

/// Outcome of one transaction, tagged with the file it concerned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TxReport {
    pub relative_path: PathBuf,
    #[serde(flatten)]
    pub outcome: Outcome,
}

/// Where the result of a transaction goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Variant {
    /// In place, with the original kept at `backup`.
    Overwrite { backup: PathBuf },
    /// Into a separate tree at `output`.
    Copy { output: PathBuf },
}

impl Variant {
    pub fn overwrite(backup_root: &Path, relative: &Path) -> Self {
        Variant::Overwrite {
            backup: backup_root.join(relative),
        }
    }

    pub fn copy(output_root: &Path, relative: &Path) -> Self {
        Variant::Copy {
            output: output_root.join(relative),
        }
    }

    /// Backups carry the original mtime and commits put it back, so an
    /// overwrite target whose backup shares its mtime was already processed.
    /// Running it again would replace the backup with optimized bytes.
    fn already_optimized(&self, candidate: &Candidate) -> bool {
        match self {
            Variant::Overwrite { backup } => {
                fsops::modified_time(backup).is_ok_and(|t| t == candidate.modified)
            }
            Variant::Copy { .. } => false,
        }
    }
}

/// Result of passing a candidate through the eligibility filter.
#[derive(Debug)]
pub enum Admission {
    Admitted(Transaction),
    FilteredOut {
        relative_path: PathBuf,
        rejection: Rejection,
    },
}

/// Unit of work for a single candidate. Owned by exactly one worker.
#[derive(Debug)]
pub struct Transaction {
    candidate: Candidate,
    original_mtime: SystemTime,
    variant: Variant,
    state: TxState,
}

impl Transaction {
    /// Filter `candidate`; an eligible one becomes a `Pending` transaction.
    pub fn admit(
        candidate: Candidate,
        variant: Variant,
        config: &EligibilityConfig,
        now: SystemTime,
    ) -> Admission {
        let eligibility = is_eligible(&candidate, config, now);
        let rejection = eligibility.rejection.or_else(|| {
            variant
                .already_optimized(&candidate)
                .then_some(Rejection::AlreadyOptimized)
        });
        match rejection {
            Some(rejection) => {
                debug!(
                    path = %candidate.relative_path.display(),
                    ?rejection,
                    "filtered out"
                );
                Admission::FilteredOut {
                    relative_path: candidate.relative_path,
                    rejection,
                }
            }
            None => Admission::Admitted(Transaction {
                original_mtime: eligibility.original_mtime,
                candidate,
                variant,
                state: TxState::Pending,
            }),
        }
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    pub fn relative_path(&self) -> &Path {
        &self.candidate.relative_path
    }

    fn advance(&mut self, next: TxState) {
        debug!(
            path = %self.candidate.relative_path.display(),
            from = ?self.state,
            to = ?next,
            "transaction state"
        );
        self.state = next;
    }

    /// Run to a terminal state.
    pub fn run(mut self, transformer: &dyn Transformer, params: &TransformParams) -> TxReport {
        self.advance(TxState::Running);
        let outcome = match self.variant.clone() {
            Variant::Overwrite { backup } => self.run_overwrite(&backup, transformer, params),
            Variant::Copy { output } => self.run_copy(&output, transformer, params),
        };
        self.advance(outcome.state());

        if let Outcome::Failed { stage, reason } = &outcome {
            warn!(
                path = %self.candidate.relative_path.display(),
                %stage,
                reason = %reason,
                "transaction failed"
            );
        }
        TxReport {
            relative_path: self.candidate.relative_path,
            outcome,
        }
    }

    fn run_overwrite(
        &self,
        backup: &Path,
        transformer: &dyn Transformer,
        params: &TransformParams,
    ) -> Outcome {
        let original = &self.candidate.path;

        let original_size = match fsops::copy_file(original, backup) {
            Ok(size) => size,
            Err(e) => return Outcome::failed(Stage::Backup, e),
        };

        let output = match transformer.transform(backup, original, params) {
            Ok(output) => output,
            Err(e) => {
                if let Err(cleanup) = fsops::remove_file(backup) {
                    warn!(backup = %backup.display(), error = %cleanup, "could not remove backup");
                }
                return Outcome::failed(Stage::Transform, e);
            }
        };

        if output.output_size > original_size {
            if let Err(e) = fsops::move_over(backup, original) {
                return Outcome::failed(Stage::Revert, e);
            }
            if let Err(e) = fsops::set_modified_time(original, self.original_mtime) {
                return Outcome::failed(Stage::Metadata, e);
            }
            debug!(
                path = %self.candidate.relative_path.display(),
                original_size,
                attempted_size = output.output_size,
                "output larger than original, reverted"
            );
            return Outcome::Reverted {
                original_size,
                attempted_size: output.output_size,
            };
        }

        // New content is in place and the backup kept; not a failure.
        if let Err(e) = fsops::set_modified_time(original, self.original_mtime) {
            warn!(
                path = %self.candidate.relative_path.display(),
                error = %e,
                "committed without restoring modification time"
            );
        }
        Outcome::Committed {
            original_size,
            new_size: output.output_size,
        }
    }

    fn run_copy(
        &self,
        output: &Path,
        transformer: &dyn Transformer,
        params: &TransformParams,
    ) -> Outcome {
        if let Err(e) = fsops::ensure_parent(output) {
            return Outcome::failed(Stage::Prepare, e);
        }
        match transformer.transform(&self.candidate.path, output, params) {
            Ok(result) => Outcome::Committed {
                original_size: self.candidate.size,
                new_size: result.output_size,
            },
            Err(e) => Outcome::failed(Stage::Transform, e),
        }
    }
}

/// Result of restoring one backed-up file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum RestoreOutcome {
    /// The backup replaced the destination.
    Restored { previous_size: u64, restored_size: u64 },
    /// No destination file exists; nothing was written.
    Skipped,
    Failed { reason: String },
}

/// Copy `backup_root/<relative>` over `images_root/<relative>`, if the latter exists.
///
/// The destination also gets the backup's modification time, which is the
/// original's since backups carry it over.
pub fn restore_file(backup_root: &Path, images_root: &Path, relative: &Path) -> RestoreOutcome {
    let backup = backup_root.join(relative);
    let destination = images_root.join(relative);

    let previous_size = match std::fs::metadata(&destination) {
        Ok(meta) if meta.is_file() => meta.len(),
        _ => return RestoreOutcome::Skipped,
    };

    let result = fsops::replace_atomically(&backup, &destination).and_then(|restored_size| {
        let mtime = fsops::modified_time(&backup)?;
        fsops::set_modified_time(&destination, mtime)?;
        Ok(restored_size)
    });

    match result {
        Ok(restored_size) => RestoreOutcome::Restored {
            previous_size,
            restored_size,
        },
        Err(e) => {
            warn!(path = %relative.display(), error = %e, "restore failed");
            RestoreOutcome::Failed {
                reason: e.to_string(),
            }
        }
    }
}
