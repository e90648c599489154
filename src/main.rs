use clap::{Parser, Subcommand};
use imgslim::config::{self, ConfigOverrides, Mode, Threshold};
use imgslim::fsops::FsError;
use imgslim::imaging::{Fit, OutputFormat, RustBackend, Transformer};
use imgslim::mode::{self, RunContext, RunError, RunReport};
use imgslim::output;
use imgslim::scheduler::CancelToken;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, mpsc};
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "imgslim")]
#[command(about = "Shrink a tree of images in place, into a copy, or restore the originals")]
#[command(long_about = "\
Shrink a tree of images in place, into a copy, or restore the originals

Modes:

  overwrite  Re-encode files under the images directory in place. Each original
             is first copied to the backup directory; a file that would come out
             larger is put back untouched. Modification times are preserved.
  copy       Write optimized versions to the output directory, mirroring the
             images tree. Sources are never modified.
  restore    Copy every backed-up original over its counterpart in the images
             directory. Backups without a counterpart are skipped.

Only files matching the extension list, at least MIN_SIZE kB large and modified
within MAX_AGE hours are touched.

Every option can come from imgslim.toml, an environment variable, or a flag;
flags and environment win over the file. Run 'imgslim gen-config' for a
documented imgslim.toml.")]
#[command(version)]
struct Cli {
    /// Config file (default: ./imgslim.toml when present)
    #[arg(long, env = "CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Debug-level logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Write the final report as JSON to this file
    #[arg(long, value_name = "PATH")]
    report: Option<PathBuf>,

    #[command(flatten)]
    overrides: OverrideArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(clap::Args)]
struct OverrideArgs {
    /// Operating mode
    #[arg(long, env = "MODE", value_enum)]
    mode: Option<Mode>,

    /// Images directory (read in every mode, written in overwrite and restore)
    #[arg(long, value_name = "DIR")]
    images: Option<PathBuf>,

    /// Backup directory for originals
    #[arg(long, value_name = "DIR")]
    backup: Option<PathBuf>,

    /// Output directory for copy mode
    #[arg(long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Comma-separated, case-sensitive extensions to match
    #[arg(long, env = "EXTENSIONS", value_delimiter = ',')]
    extensions: Option<Vec<String>>,

    /// Skip files smaller than this many kB, or `none`
    #[arg(long, env = "MIN_SIZE", value_name = "KB")]
    min_size: Option<Threshold>,

    /// Skip files modified more than this many hours ago, or `none`
    #[arg(long, env = "MAX_AGE", value_name = "HOURS")]
    max_age: Option<Threshold>,

    /// Encoder quality, 1-100
    #[arg(long, env = "QUALITY")]
    quality: Option<u32>,

    /// Maximum output width in pixels
    #[arg(long, env = "MAX_WIDTH")]
    max_width: Option<u32>,

    /// Maximum output height in pixels
    #[arg(long, env = "MAX_HEIGHT")]
    max_height: Option<u32>,

    /// How images are fitted into the bounding box
    #[arg(long, env = "FIT", value_enum)]
    fit: Option<Fit>,

    /// Force an output format instead of keeping each file's own
    #[arg(long, env = "FORMAT", value_enum)]
    format: Option<OutputFormat>,

    /// Files processed in parallel, 1-32 (default: number of cores)
    #[arg(long, env = "CONCURRENCY")]
    concurrency: Option<usize>,

    /// Only print the final summary (`--quiet=false` overrides the config file)
    #[arg(
        short,
        long,
        env = "QUIET",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        value_parser = clap::builder::BoolishValueParser::new()
    )]
    quiet: Option<bool>,

    /// `user[:group]` to chown the backup or output tree to afterwards
    #[arg(long, env = "OWNER")]
    owner: Option<String>,
}

impl From<OverrideArgs> for ConfigOverrides {
    fn from(args: OverrideArgs) -> Self {
        ConfigOverrides {
            mode: args.mode,
            images: args.images,
            backup: args.backup,
            output: args.output,
            extensions: args.extensions,
            min_size_kb: args.min_size,
            max_age_hours: args.max_age,
            quality: args.quality,
            max_width: args.max_width,
            max_height: args.max_height,
            fit: args.fit,
            format: args.format,
            concurrency: args.concurrency,
            quiet: args.quiet,
            owner: args.owner,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Validate the configuration and required directories without processing
    Check,
    /// Print a stock imgslim.toml with all options documented
    GenConfig,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            eprintln!("Error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

fn run(cli: Cli) -> Result<(), RunError> {
    if let Some(Command::GenConfig) = cli.command {
        print!("{}", config::stock_config_toml());
        return Ok(());
    }

    let config = config::build_config(cli.config.as_deref(), cli.overrides.into())?;

    if let Some(Command::Check) = cli.command {
        mode::check(&config)?;
        println!("==> Config is valid ({} mode)", config.mode);
        println!("    images: {}", config.directories.images.display());
        match config.mode {
            Mode::Overwrite | Mode::Restore => {
                println!("    backup: {}", config.directories.backup.display())
            }
            Mode::Copy => println!("    output: {}", config.directories.output.display()),
        }
        return Ok(());
    }

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!("\nInterrupt received, finishing files in progress...");
        handler_token.cancel();
    }) {
        warn!(error = %e, "could not install interrupt handler");
    }

    let quiet = config.report.quiet;
    let transformer: Arc<dyn Transformer> = Arc::new(RustBackend::new());
    let mut ctx = RunContext::new(config, transformer).with_cancel(cancel);

    let printer = if quiet {
        None
    } else {
        let (tx, rx) = mpsc::channel();
        ctx = ctx.with_events(tx);
        Some(std::thread::spawn(move || {
            for event in rx {
                if let Some(line) = output::format_run_event(&event) {
                    println!("{}", line);
                }
            }
        }))
    };

    let result = mode::run(&ctx);
    drop(ctx);
    if let Some(printer) = printer
        && printer.join().is_err()
    {
        warn!("progress printer thread panicked");
    }

    let report = result?;
    output::print_summary(&report);
    if let Some(path) = &cli.report {
        write_report(path, &report)?;
    }
    Ok(())
}

fn write_report(path: &Path, report: &RunReport) -> Result<(), RunError> {
    let json = serde_json::to_string_pretty(report)
        .map_err(|e| FsError::io("serialize_report", path, std::io::Error::other(e)))?;
    std::fs::write(path, json).map_err(|e| FsError::io("write_report", path, e))?;
    Ok(())
}

fn setup_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("imgslim=debug,warn")
        } else {
            EnvFilter::new("imgslim=warn")
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
