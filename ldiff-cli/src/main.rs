use anyhow::{Context, Result};
use clap::Parser;
use ldiff_core::manifest::ManifestSchema;
use ldiff_core::pipeline::{self, PipelineConfig};
use ldiff_core::report::{JobStatus, RunSummary};
use std::path::PathBuf;
use std::process;
use std::time::Duration;

const EXIT_OK: i32 = 0;
const EXIT_USAGE: i32 = 1;
const EXIT_FATAL: i32 = 2;
const EXIT_INCOMPLETE: i32 = 3;

#[derive(Parser, Debug)]
#[command(
    name = "ldiff",
    version,
    about = "Apply manifest-described binary patches, verify by MD5, publish the results"
)]
struct Cli {
    /// Binary manifest listing files and their patch segments
    manifest: PathBuf,
    /// Directory holding the files to be patched and the container directory
    asset_root: PathBuf,

    /// Pattern list, one `*` wildcard pattern per line
    #[arg(long, default_value = "list.txt")]
    list: PathBuf,
    /// Patch tool to run per entry
    #[arg(long, default_value = ldiff_core::patcher::DEFAULT_PATCHER)]
    patcher: PathBuf,
    /// Extra argument placed before the patcher's positional arguments (repeatable)
    #[arg(long = "patcher-arg", allow_hyphen_values = true)]
    patcher_args: Vec<String>,
    /// Flag appended after the output path
    #[arg(long, default_value = ldiff_core::patcher::DEFAULT_FORCE_FLAG, allow_hyphen_values = true)]
    force_flag: String,
    /// Staging directory for extracted diffs and patched candidates
    #[arg(long, default_value = "hdiff")]
    work_dir: PathBuf,
    /// Where verified files are published
    #[arg(long, default_value = "output")]
    output_dir: PathBuf,
    /// Container directory, relative to ASSET_ROOT
    #[arg(long, default_value = "ldiff")]
    container_dir: PathBuf,
    /// Concurrent entries (default: available parallelism)
    #[arg(long, short = 'j')]
    jobs: Option<usize>,
    /// Per-entry patcher timeout in seconds
    #[arg(long, default_value_t = 600, conflicts_with = "no_timeout")]
    timeout: u64,
    /// Let the patcher run for as long as it takes
    #[arg(long, default_value_t = false)]
    no_timeout: bool,
    /// Write the decoded manifest as JSON here
    #[arg(long, default_value = "manifest.json", conflicts_with = "no_dump")]
    dump: PathBuf,
    #[arg(long, default_value_t = false)]
    no_dump: bool,
    /// JSON file overriding the manifest's field numbers
    #[arg(long)]
    schema: Option<PathBuf>,
    /// Write a machine-readable run summary here
    #[arg(long)]
    summary_json: Option<PathBuf>,
    /// Log periodic progress
    #[arg(long, default_value_t = false)]
    progress: bool,
    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, conflicts_with = "quiet")]
    verbose: u8,
    /// Only warnings and errors
    #[arg(short, long, default_value_t = false)]
    quiet: bool,
}

impl Cli {
    fn log_filter(&self) -> &'static str {
        match (self.quiet, self.verbose) {
            (true, _) => "warn",
            (false, 0) => "info",
            (false, 1) => "debug",
            _ => "trace",
        }
    }

    fn into_config(self) -> Result<PipelineConfig> {
        let mut cfg = PipelineConfig::new(self.manifest, self.asset_root);
        cfg.pattern_list = self.list;
        cfg.container_subdir = self.container_dir;
        cfg.work_dir = self.work_dir;
        cfg.output_dir = self.output_dir;
        cfg.patcher = self.patcher;
        cfg.patcher_args = self.patcher_args.into_iter().map(Into::into).collect();
        cfg.force_flag = self.force_flag.into();
        cfg.timeout = (!self.no_timeout).then(|| Duration::from_secs(self.timeout));
        if let Some(jobs) = self.jobs {
            cfg.jobs = jobs.max(1);
        }
        cfg.dump_path = (!self.no_dump).then_some(self.dump);
        if let Some(path) = &self.schema {
            cfg.schema = ManifestSchema::load(path)
                .with_context(|| format!("load schema {}", path.display()))?;
        }
        cfg.progress = self.progress;
        Ok(cfg)
    }
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if e.use_stderr() => {
            let _ = e.print();
            process::exit(EXIT_USAGE);
        }
        // --help / --version
        Err(e) => e.exit(),
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cli.log_filter()))
        .format_timestamp(None)
        .format_target(false)
        .init();

    let summary_path = cli.summary_json.clone();
    let code = match execute(cli) {
        Ok(summary) => {
            print_summary(&summary);
            if let Some(path) = summary_path {
                if let Err(e) = summary.write_json(&path) {
                    log::warn!("could not write summary {}: {}", path.display(), e);
                }
            }
            if summary.all_ok() {
                EXIT_OK
            } else {
                EXIT_INCOMPLETE
            }
        }
        Err(e) => {
            log::error!("{e:#}");
            EXIT_FATAL
        }
    };
    process::exit(code);
}

fn execute(cli: Cli) -> Result<RunSummary> {
    let config = cli.into_config()?;
    log::debug!("{config:?}");
    let summary = pipeline::run(&config)?;
    Ok(summary)
}

fn print_summary(s: &RunSummary) {
    for job in &s.jobs {
        match &job.status {
            JobStatus::Published => {}
            JobStatus::Rejected { actual, expected } => {
                println!("REJECTED {} (md5 {} != {})", job.file_name, actual, expected)
            }
            JobStatus::Failed { kind, message, .. } => {
                println!("FAILED {} ({:?}): {}", job.file_name, kind, message)
            }
        }
    }
    println!(
        "{} entries, {} selected: {} published, {} rejected, {} failed",
        s.manifest_entries, s.selected, s.published, s.rejected, s.failed
    );
}
