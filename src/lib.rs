//! # imgslim
//!
//! Batch image optimizer. Walks a tree of images, picks the files worth
//! touching (large enough, recent enough), and shrinks them, in one of three
//! modes:
//!
//! - **overwrite**: re-encode in place, keeping the original in a backup tree
//!   and reverting any file that came out larger;
//! - **copy**: write optimized versions into a separate output tree;
//! - **restore**: copy backed-up originals back over the images tree.
//!
//! # Pipeline
//!
//! ```text
//! images/ ─ discover ─▶ eligibility ─▶ scheduler (N workers) ─▶ transaction ─▶ aggregate ─▶ report
//!                                                                   │
//!                                                                   └─ Transformer (image crate)
//! ```
//!
//! Discovery is lazy, so the first transactions start while the walk is
//! still running. Each transaction owns exactly one file; the aggregator is
//! the only state shared between workers.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`config`] | `imgslim.toml` loading, CLI/env overrides, validation, stock config text |
//! | [`discover`] | Recursive, case-sensitive extension matching; streaming and full scans |
//! | [`eligibility`] | Size floor and age ceiling deciding which files enter a transaction |
//! | [`transaction`] | Per-file state machine: backup → transform → verify → commit or revert |
//! | [`scheduler`] | Bounded worker pool with back-pressured submit, drain and cancellation |
//! | [`aggregate`] | Lock-free totals across concurrently finishing transactions |
//! | [`mode`] | Overwrite / copy / restore strategies and the [`mode::run`] entry point |
//! | [`imaging`] | The transform capability: resize + re-encode with the `image` crate |
//! | [`fsops`] | Atomic writes, byte-exact copies, timestamp handling |
//! | [`ownership`] | Post-run recursive chown |
//! | [`output`] | Per-file progress lines and the final summary |
//!
//! # Design Decisions
//!
//! ## Backup Before Transform
//!
//! In overwrite mode the original is copied to the backup tree *before* the
//! transform touches anything, and the transform reads the backup rather
//! than the original. If the process dies at any point, either the original
//! is untouched or a complete backup exists.
//!
//! ## Never Leave a File Larger
//!
//! Lossy re-encoding occasionally inflates an already-optimized file. The
//! transaction compares sizes after the transform and moves the backup back
//! over the output when the result is larger. The move is a rename, so the
//! restored original and the removal of the backup happen in one step.
//!
//! ## Timestamps Are Preserved
//!
//! Tools that detect changes by modification time (sync clients, build
//! caches) should not see an optimization pass as an edit. Overwrite mode
//! resets the mtime on both the commit and the revert path, and backups
//! carry the original mtime so a restore brings it back too.
//!
//! ## Pure-Rust Imaging
//!
//! The [`imaging`] module decodes and encodes with the `image` crate only.
//! No ImageMagick, no libvips: the binary runs anywhere without system
//! libraries.

pub mod aggregate;
pub mod config;
pub mod discover;
pub mod eligibility;
pub mod fsops;
pub mod imaging;
pub mod mode;
pub mod output;
pub mod ownership;
pub mod scheduler;
pub mod transaction;

#[cfg(test)]
pub(crate) mod test_helpers;
