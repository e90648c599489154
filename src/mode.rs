//! Mode controller.
//!
//! [`Mode`] is resolved once at startup into a strategy implementing
//! [`ModeRunner`]. Each strategy checks its directories on entry, before any
//! work is scheduled, then drives the rest of the crate:
//!
//! | Mode | Reads | Writes | Concurrency |
//! |------|-------|--------|-------------|
//! | [`OverwriteMode`] | images | images (in place), backup | scheduler, `N` workers |
//! | [`CopyMode`] | images | output | scheduler, `N` workers |
//! | [`RestoreMode`] | backup | images (existing files only) | sequential |
//!
//! Overwrite and Copy stream discovery straight into the [`Scheduler`], so
//! work starts before the walk finishes. Every completed transaction is
//! recorded in one shared [`ResultAggregator`] and, when a sender is
//! attached, reported as a [`RunEvent`].
//!
//! [`run`] is the library entry point: validate, pick the strategy, run it,
//! then apply the ownership post-pass.

use crate::aggregate::{ResultAggregator, Snapshot};
use crate::config::{ConfigError, Mode, RunConfig, effective_concurrency};
use crate::discover::{DiscoverError, Discovery, ExtensionMatcher, discover, scan_all};
use crate::eligibility::{Candidate, Rejection};
use crate::fsops::FsError;
use crate::imaging::Transformer;
use crate::ownership;
use crate::scheduler::{CancelToken, Scheduler, SchedulerError};
use crate::transaction::{
    Admission, Outcome, RestoreOutcome, Stage, Transaction, TxReport, Variant, restore_file,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{role} directory does not exist: {}", .path.display())]
    MissingDirectory { role: &'static str, path: PathBuf },
    #[error(transparent)]
    Discover(#[from] DiscoverError),
    #[error(transparent)]
    Fs(#[from] FsError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

impl RunError {
    /// Process exit status: 2 for configuration problems, 1 for everything else.
    pub fn exit_code(&self) -> u8 {
        match self {
            RunError::Config(_) | RunError::Scheduler(SchedulerError::InvalidConcurrency(_)) => 2,
            _ => 1,
        }
    }
}

/// Progress notifications, one per file that reached a terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    Committed {
        path: PathBuf,
        original_size: u64,
        new_size: u64,
    },
    Reverted {
        path: PathBuf,
        original_size: u64,
        attempted_size: u64,
    },
    Failed {
        path: PathBuf,
        stage: Stage,
        reason: String,
    },
    Filtered {
        path: PathBuf,
        rejection: Rejection,
    },
    Restored {
        path: PathBuf,
        previous_size: u64,
        restored_size: u64,
    },
    /// Restore found no destination for a backed-up file.
    Skipped { path: PathBuf },
}

impl From<&TxReport> for RunEvent {
    fn from(report: &TxReport) -> Self {
        let path = report.relative_path.clone();
        match &report.outcome {
            Outcome::Committed {
                original_size,
                new_size,
            } => RunEvent::Committed {
                path,
                original_size: *original_size,
                new_size: *new_size,
            },
            Outcome::Reverted {
                original_size,
                attempted_size,
            } => RunEvent::Reverted {
                path,
                original_size: *original_size,
                attempted_size: *attempted_size,
            },
            Outcome::Failed { stage, reason } => RunEvent::Failed {
                path,
                stage: *stage,
                reason: reason.clone(),
            },
        }
    }
}

/// A file that ended in failure, kept for the final report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedFile {
    pub path: PathBuf,
    pub stage: Stage,
    pub reason: String,
}

/// Terminal observable output of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub mode: Mode,
    pub totals: Snapshot,
    pub failures: Vec<FailedFile>,
    /// True when cancellation stopped the run early.
    pub cancelled: bool,
    /// Peak number of transactions observed running at once.
    pub peak_concurrency: usize,
    /// Set when the ownership post-pass failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ownership_error: Option<String>,
}

/// Everything a strategy needs, fixed for the run.
#[derive(Clone)]
pub struct RunContext {
    pub config: Arc<RunConfig>,
    pub transformer: Arc<dyn Transformer>,
    pub cancel: CancelToken,
    pub events: Option<Sender<RunEvent>>,
}

impl RunContext {
    pub fn new(config: RunConfig, transformer: Arc<dyn Transformer>) -> Self {
        Self {
            config: Arc::new(config),
            transformer,
            cancel: CancelToken::new(),
            events: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_events(mut self, events: Sender<RunEvent>) -> Self {
        self.events = Some(events);
        self
    }
}

fn emit(events: &Option<Sender<RunEvent>>, event: RunEvent) {
    if let Some(tx) = events {
        tx.send(event).ok();
    }
}

/// One operating mode.
pub trait ModeRunner {
    fn mode(&self) -> Mode;

    /// Check the directories this mode needs, without touching anything.
    fn check(&self, config: &RunConfig) -> Result<(), RunError>;

    /// Run the mode to completion (or cancellation).
    fn run(&self, ctx: &RunContext) -> Result<RunReport, RunError>;

    /// Trees the ownership post-pass applies to.
    fn ownership_roots(&self, config: &RunConfig) -> Vec<PathBuf>;
}

pub struct OverwriteMode;
pub struct CopyMode;
pub struct RestoreMode;

/// Resolve `mode` to its strategy.
pub fn runner_for(mode: Mode) -> Box<dyn ModeRunner> {
    match mode {
        Mode::Overwrite => Box::new(OverwriteMode),
        Mode::Copy => Box::new(CopyMode),
        Mode::Restore => Box::new(RestoreMode),
    }
}

/// Validate `config` and the directories its mode requires.
pub fn check(config: &RunConfig) -> Result<(), RunError> {
    config.validate()?;
    runner_for(config.mode).check(config)
}

/// Validate the configuration, run its mode, then normalize ownership.
pub fn run(ctx: &RunContext) -> Result<RunReport, RunError> {
    ctx.config.validate()?;
    let runner = runner_for(ctx.config.mode);
    info!(mode = %runner.mode(), "run started");

    let mut report = runner.run(ctx)?;

    if let Some(owner) = &ctx.config.report.owner {
        let roots = runner.ownership_roots(&ctx.config);
        match ownership::normalize_str(owner, &roots) {
            Ok(changed) => debug!(owner = %owner, changed, "ownership normalized"),
            Err(e) => {
                warn!(owner = %owner, error = %e, "ownership normalization failed");
                report.ownership_error = Some(e.to_string());
            }
        }
    }

    info!(
        mode = %report.mode,
        files = report.totals.files,
        bytes_saved = report.totals.bytes_saved,
        failed = report.totals.failed,
        cancelled = report.cancelled,
        "run finished"
    );
    Ok(report)
}

fn require_dir(role: &'static str, path: &Path) -> Result<(), RunError> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(RunError::MissingDirectory {
            role,
            path: path.to_path_buf(),
        })
    }
}

fn create_dir(path: &Path) -> Result<(), RunError> {
    std::fs::create_dir_all(path).map_err(|e| FsError::io("create_dir_all", path, e))?;
    Ok(())
}

type Failures = Arc<Mutex<Vec<FailedFile>>>;

/// Log and report an entry the walk could not read. The run carries on.
fn walk_failure(root: &Path, err: &DiscoverError, events: &Option<Sender<RunEvent>>) -> FailedFile {
    warn!(error = %err, "discovery error");
    let path = err
        .path()
        .map(|p| p.strip_prefix(root).unwrap_or(p).to_path_buf())
        .unwrap_or_default();
    let reason = err.to_string();
    emit(
        events,
        RunEvent::Failed {
            path: path.clone(),
            stage: Stage::Discover,
            reason: reason.clone(),
        },
    );
    FailedFile {
        path,
        stage: Stage::Discover,
        reason,
    }
}

fn push_failure(failures: &Failures, failure: FailedFile) {
    failures
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .push(failure);
}

fn take_failures(failures: &Failures) -> Vec<FailedFile> {
    let mut list = std::mem::take(&mut *failures.lock().unwrap_or_else(|e| e.into_inner()));
    list.sort_by(|a, b| a.path.cmp(&b.path));
    list
}

/// Feed discovered files through the filter into the scheduler.
fn dispatch<F>(
    ctx: &RunContext,
    mode: Mode,
    discovery: Discovery,
    variant_for: F,
) -> Result<RunReport, RunError>
where
    F: Fn(&Path) -> Variant,
{
    let config = &ctx.config;
    let images = &config.directories.images;
    let eligibility = config.eligibility();
    let params = config.transform_params();
    let now = SystemTime::now();

    let scheduler = Scheduler::new(effective_concurrency(&config.processing), ctx.cancel.clone())?;
    let aggregator = Arc::new(ResultAggregator::new());
    let failures: Failures = Arc::new(Mutex::new(Vec::new()));
    debug!(workers = scheduler.concurrency(), "dispatching");

    for found in discovery {
        if ctx.cancel.is_cancelled() {
            break;
        }
        let relative = match found {
            Ok(relative) => relative,
            Err(e) => {
                aggregator.record_failure();
                push_failure(&failures, walk_failure(images, &e, &ctx.events));
                continue;
            }
        };

        let candidate = match Candidate::stat(images, &relative) {
            Ok(candidate) => candidate,
            Err(e) => {
                aggregator.record_failure();
                let reason = e.to_string();
                emit(
                    &ctx.events,
                    RunEvent::Failed {
                        path: relative.clone(),
                        stage: Stage::Stat,
                        reason: reason.clone(),
                    },
                );
                push_failure(
                    &failures,
                    FailedFile {
                        path: relative,
                        stage: Stage::Stat,
                        reason,
                    },
                );
                continue;
            }
        };

        let variant = variant_for(&relative);
        let tx = match Transaction::admit(candidate, variant, &eligibility, now) {
            Admission::Admitted(tx) => tx,
            Admission::FilteredOut {
                relative_path,
                rejection,
            } => {
                aggregator.record_filtered();
                emit(
                    &ctx.events,
                    RunEvent::Filtered {
                        path: relative_path,
                        rejection,
                    },
                );
                continue;
            }
        };

        let transformer = Arc::clone(&ctx.transformer);
        let aggregator_ref = Arc::clone(&aggregator);
        let failures_ref = Arc::clone(&failures);
        let events = ctx.events.clone();
        let job = move || {
            let report = tx.run(transformer.as_ref(), &params);
            aggregator_ref.record(&report.outcome);
            if let Outcome::Failed { stage, reason } = &report.outcome {
                push_failure(
                    &failures_ref,
                    FailedFile {
                        path: report.relative_path.clone(),
                        stage: *stage,
                        reason: reason.clone(),
                    },
                );
            }
            emit(&events, RunEvent::from(&report));
        };
        if scheduler.submit(job).is_err() {
            aggregator.record_cancelled(1);
            break;
        }
    }

    scheduler.drain();
    aggregator.record_cancelled(scheduler.dropped());

    Ok(RunReport {
        mode,
        totals: aggregator.snapshot(),
        failures: take_failures(&failures),
        cancelled: ctx.cancel.is_cancelled(),
        peak_concurrency: scheduler.peak_concurrency(),
        ownership_error: None,
    })
}

impl ModeRunner for OverwriteMode {
    fn mode(&self) -> Mode {
        Mode::Overwrite
    }

    fn check(&self, config: &RunConfig) -> Result<(), RunError> {
        require_dir("images", &config.directories.images)
    }

    fn run(&self, ctx: &RunContext) -> Result<RunReport, RunError> {
        let dirs = &ctx.config.directories;
        self.check(&ctx.config)?;
        create_dir(&dirs.backup)?;

        let matcher = ExtensionMatcher::new(&ctx.config.filter.extensions)?;
        let discovery = discover(&dirs.images, matcher).excluding([&dirs.backup, &dirs.output]);
        dispatch(ctx, Mode::Overwrite, discovery, |relative| {
            Variant::overwrite(&dirs.backup, relative)
        })
    }

    fn ownership_roots(&self, config: &RunConfig) -> Vec<PathBuf> {
        vec![config.directories.backup.clone()]
    }
}

impl ModeRunner for CopyMode {
    fn mode(&self) -> Mode {
        Mode::Copy
    }

    fn check(&self, config: &RunConfig) -> Result<(), RunError> {
        require_dir("images", &config.directories.images)
    }

    fn run(&self, ctx: &RunContext) -> Result<RunReport, RunError> {
        let dirs = &ctx.config.directories;
        self.check(&ctx.config)?;
        create_dir(&dirs.output)?;

        let matcher = ExtensionMatcher::new(&ctx.config.filter.extensions)?;
        let discovery = discover(&dirs.images, matcher).excluding([&dirs.backup, &dirs.output]);
        dispatch(ctx, Mode::Copy, discovery, |relative| {
            Variant::copy(&dirs.output, relative)
        })
    }

    fn ownership_roots(&self, config: &RunConfig) -> Vec<PathBuf> {
        vec![config.directories.output.clone()]
    }
}

impl ModeRunner for RestoreMode {
    fn mode(&self) -> Mode {
        Mode::Restore
    }

    fn check(&self, config: &RunConfig) -> Result<(), RunError> {
        require_dir("images", &config.directories.images)?;
        require_dir("backup", &config.directories.backup)
    }

    /// Sequentially copy every backed-up file over its counterpart in the
    /// images tree. No filter, no transform, no scheduler.
    fn run(&self, ctx: &RunContext) -> Result<RunReport, RunError> {
        let dirs = &ctx.config.directories;
        self.check(&ctx.config)?;

        let matcher = ExtensionMatcher::new(&ctx.config.filter.extensions)?;
        let scan = scan_all(&dirs.backup, matcher);
        let aggregator = ResultAggregator::new();
        let mut failures = Vec::new();
        for e in &scan.errors {
            aggregator.record_failure();
            failures.push(walk_failure(&dirs.backup, e, &ctx.events));
        }
        let files = scan.paths;

        for (done, relative) in files.iter().enumerate() {
            if ctx.cancel.is_cancelled() {
                aggregator.record_cancelled((files.len() - done) as u64);
                break;
            }
            match restore_file(&dirs.backup, &dirs.images, relative) {
                RestoreOutcome::Restored {
                    previous_size,
                    restored_size,
                } => {
                    aggregator.record_restored();
                    emit(
                        &ctx.events,
                        RunEvent::Restored {
                            path: relative.clone(),
                            previous_size,
                            restored_size,
                        },
                    );
                }
                RestoreOutcome::Skipped => {
                    debug!(path = %relative.display(), "no destination, skipped");
                    emit(
                        &ctx.events,
                        RunEvent::Skipped {
                            path: relative.clone(),
                        },
                    );
                }
                RestoreOutcome::Failed { reason } => {
                    aggregator.record_failure();
                    emit(
                        &ctx.events,
                        RunEvent::Failed {
                            path: relative.clone(),
                            stage: Stage::Restore,
                            reason: reason.clone(),
                        },
                    );
                    failures.push(FailedFile {
                        path: relative.clone(),
                        stage: Stage::Restore,
                        reason,
                    });
                }
            }
        }

        Ok(RunReport {
            mode: Mode::Restore,
            totals: aggregator.snapshot(),
            failures,
            cancelled: ctx.cancel.is_cancelled(),
            peak_concurrency: usize::from(!files.is_empty()),
            ownership_error: None,
        })
    }

    fn ownership_roots(&self, _config: &RunConfig) -> Vec<PathBuf> {
        Vec::new()
    }
}
