//! Per-entry pipeline: extract -> patch -> verify -> publish.
//!
//! Each selected manifest entry becomes a [`PatchJob`] that moves through
//! `Selected -> Extracting -> Patching -> Verifying` and ends in exactly one
//! [`JobStatus`]. Jobs are independent; one failing never stops another.

use crate::container::ContainerStore;
use crate::error::{ExtractError, PatchError, Result};
use crate::manifest::{Manifest, ManifestEntry, ManifestSchema, PatchSegment};
use crate::path_safety::{normalize_name, safe_join, with_suffix};
use crate::patcher::{ExternalPatcher, PatchEngine, DEFAULT_FORCE_FLAG, DEFAULT_PATCHER};
use crate::pattern::PatternFilter;
use crate::progress::Progress;
use crate::publish::relocate;
use crate::report::{FailureKind, JobRecord, JobStatus, RunSummary, Stage};
use crate::verify::{verify_file, HashVerdict};
use rayon::prelude::*;
use std::collections::HashMap;
use std::ffi::OsString;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DIFF_SUFFIX: &str = ".hdiff";

/// Everything a run needs. `new` fills in the conventional defaults.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub manifest: PathBuf,
    pub asset_root: PathBuf,
    pub pattern_list: PathBuf,
    /// Relative to `asset_root`.
    pub container_subdir: PathBuf,
    pub work_dir: PathBuf,
    pub output_dir: PathBuf,
    pub patcher: PathBuf,
    pub patcher_args: Vec<OsString>,
    pub force_flag: OsString,
    pub timeout: Option<Duration>,
    pub jobs: usize,
    pub dump_path: Option<PathBuf>,
    pub schema: ManifestSchema,
    pub progress: bool,
}

impl PipelineConfig {
    pub fn new(manifest: impl Into<PathBuf>, asset_root: impl Into<PathBuf>) -> Self {
        Self {
            manifest: manifest.into(),
            asset_root: asset_root.into(),
            pattern_list: PathBuf::from("list.txt"),
            container_subdir: PathBuf::from("ldiff"),
            work_dir: PathBuf::from("hdiff"),
            output_dir: PathBuf::from("output"),
            patcher: PathBuf::from(DEFAULT_PATCHER),
            patcher_args: Vec::new(),
            force_flag: DEFAULT_FORCE_FLAG.into(),
            timeout: Some(Duration::from_secs(600)),
            jobs: default_jobs(),
            dump_path: Some(PathBuf::from("manifest.json")),
            schema: ManifestSchema::default(),
            progress: false,
        }
    }

    pub fn container_dir(&self) -> PathBuf {
        self.asset_root.join(&self.container_subdir)
    }

    pub fn layout(&self) -> Layout {
        Layout {
            asset_root: self.asset_root.clone(),
            work_dir: self.work_dir.clone(),
            output_dir: self.output_dir.clone(),
        }
    }

    pub fn external_patcher(&self) -> ExternalPatcher {
        ExternalPatcher::new(&self.patcher)
            .leading_args(self.patcher_args.iter().cloned())
            .force_flag(self.force_flag.clone())
            .timeout(self.timeout)
    }
}

pub fn default_jobs() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

/// Directory roots the per-entry paths hang off.
#[derive(Debug, Clone)]
pub struct Layout {
    pub asset_root: PathBuf,
    pub work_dir: PathBuf,
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPaths {
    /// Existing file in the asset tree.
    pub base: PathBuf,
    /// `<work>/<name>.hdiff`
    pub diff: PathBuf,
    /// `<work>/<name>`
    pub candidate: PathBuf,
    /// `<output>/<name>`
    pub publish: PathBuf,
}

impl Layout {
    pub fn job_paths(&self, file_name: &str) -> Result<JobPaths> {
        let candidate = safe_join(&self.work_dir, file_name)?;
        Ok(JobPaths {
            base: safe_join(&self.asset_root, file_name)?,
            diff: with_suffix(&candidate, DIFF_SUFFIX),
            candidate,
            publish: safe_join(&self.output_dir, file_name)?,
        })
    }
}

/// One selected entry on its way to a terminal status.
pub struct PatchJob<'m> {
    entry: &'m ManifestEntry,
    name: String,
    stage: Stage,
    segment: Option<&'m PatchSegment>,
    exit_code: Option<i32>,
}

impl<'m> PatchJob<'m> {
    pub fn new(entry: &'m ManifestEntry) -> Self {
        Self {
            entry,
            name: normalize_name(&entry.file_name),
            stage: Stage::Selected,
            segment: None,
            exit_code: None,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    fn advance(&mut self, stage: Stage) {
        log::debug!("[{}] {:?} -> {:?}", self.name, self.stage, stage);
        self.stage = stage;
    }

    /// Consumes the job, so a status can only be assigned once.
    fn finish(self, status: JobStatus) -> JobRecord {
        JobRecord {
            file_name: self.entry.file_name.clone(),
            container_id: self.segment.map(|s| s.container_id.clone()),
            exit_code: self.exit_code,
            status,
        }
    }

    fn fail(self, kind: FailureKind, err: impl Display) -> JobRecord {
        log::warn!("[{}] failed while {:?}: {}", self.name, self.stage, err);
        let stage = self.stage;
        self.finish(JobStatus::Failed { stage, kind, message: err.to_string() })
    }
}

/// Entries whose (normalized) file name matches the filter, in manifest order.
/// Entries without a file name are never selected.
pub fn select<'m>(manifest: &'m Manifest, filter: &PatternFilter) -> Vec<&'m ManifestEntry> {
    manifest
        .entries
        .iter()
        .filter(|e| !e.file_name.is_empty())
        .filter(|e| filter.matches(&normalize_name(&e.file_name)))
        .collect()
}

fn find_root(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

pub struct Orchestrator<E> {
    layout: Layout,
    store: ContainerStore,
    engine: E,
    pool: rayon::ThreadPool,
    progress: Progress,
}

impl<E: PatchEngine> Orchestrator<E> {
    /// `jobs` caps how many pipelines (and so patcher processes) run at once.
    pub fn new(layout: Layout, store: ContainerStore, engine: E, jobs: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(jobs.max(1))
            .thread_name(|i| format!("ldiff-worker-{i}"))
            .build()?;
        Ok(Self { layout, store, engine, pool, progress: Progress::new(false) })
    }

    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = progress;
        self
    }

    /// Partition entries so that no two groups touch the same staging or
    /// publish path. `x` stages its diff at `x.hdiff`, which is the candidate
    /// of an entry named `x.hdiff`; `a` and `./a` resolve to one file. Groups
    /// keep manifest order, as do the entries inside them.
    pub fn conflict_groups<'m>(&self, entries: &[&'m ManifestEntry]) -> Vec<Vec<&'m ManifestEntry>> {
        let mut parent: Vec<usize> = (0..entries.len()).collect();
        let mut owner: HashMap<PathBuf, usize> = HashMap::new();
        for (i, e) in entries.iter().enumerate() {
            // Unsafe names fail before any I/O and conflict with nothing.
            let Ok(paths) = self.layout.job_paths(&normalize_name(&e.file_name)) else {
                continue;
            };
            for path in [paths.diff, paths.candidate, paths.publish] {
                let key: PathBuf = path.components().collect();
                match owner.get(&key) {
                    Some(&j) => {
                        let (a, b) = (find_root(&mut parent, i), find_root(&mut parent, j));
                        if a != b {
                            parent[a.max(b)] = a.min(b);
                        }
                    }
                    None => {
                        owner.insert(key, i);
                    }
                }
            }
        }

        let mut groups: Vec<Vec<&'m ManifestEntry>> = Vec::new();
        let mut slot: HashMap<usize, usize> = HashMap::new();
        for (i, e) in entries.iter().enumerate() {
            let root = find_root(&mut parent, i);
            let gi = *slot.entry(root).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[gi].push(*e);
        }
        groups
    }

    /// Run every entry. Groups from [`Self::conflict_groups`] run in
    /// parallel; entries inside a group run one after another.
    pub fn run(&self, entries: &[&ManifestEntry]) -> Vec<JobRecord> {
        let groups = self.conflict_groups(entries);
        log::debug!("{} entries in {} independent groups", entries.len(), groups.len());

        self.progress.set_total(entries.len());
        self.progress.start();
        let records: Vec<JobRecord> = self.pool.install(|| {
            groups
                .par_iter()
                .flat_map_iter(|group| {
                    group.iter().map(|e| {
                        let name = normalize_name(&e.file_name);
                        self.progress.begin_job(&name);
                        let rec = self.run_job(e);
                        self.progress.finish_job(&name, rec.status.is_published());
                        rec
                    })
                })
                .collect()
        });
        self.progress.stop();
        records
    }

    /// Drive one entry to its terminal status.
    pub fn run_job(&self, entry: &ManifestEntry) -> JobRecord {
        let mut job = PatchJob::new(entry);
        log::info!("[{}] matched", job.name);

        let paths = match self.layout.job_paths(&job.name) {
            Ok(p) => p,
            Err(e) => return job.fail(FailureKind::UnsafePath, e),
        };
        if entry.patch_segments.is_empty() {
            let err = ExtractError::NoSegmentAvailable { file_name: entry.file_name.clone() };
            return job.fail(FailureKind::NoSegmentAvailable, err);
        }

        job.advance(Stage::Extracting);
        match self.store.extract_first(&job.name, &entry.patch_segments, &paths.diff) {
            Ok(seg) => job.segment = Some(seg),
            Err(e @ ExtractError::NoSegmentAvailable { .. }) => {
                return job.fail(FailureKind::NoSegmentAvailable, e)
            }
            Err(e) => return job.fail(FailureKind::ExtractionFailed, e),
        }

        job.advance(Stage::Patching);
        // Only bytes this run's patcher writes may be verified.
        if let Err(e) = std::fs::remove_file(&paths.candidate) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("[{}] could not clear stale {}: {}", job.name, paths.candidate.display(), e);
            }
        }
        match self.engine.apply(&paths.base, &paths.diff, &paths.candidate) {
            Ok(outcome) => {
                job.exit_code = outcome.exit_code;
                log::info!("[{}] patched (exit {:?})", job.name, outcome.exit_code);
            }
            Err(e @ PatchError::Timeout { .. }) => return job.fail(FailureKind::Timeout, e),
            Err(e) => return job.fail(FailureKind::PatchFailed, e),
        }

        job.advance(Stage::Verifying);
        let (verdict, digest) = match verify_file(&paths.candidate, &entry.expected_hash) {
            Ok(v) => v,
            Err(e) => return job.fail(FailureKind::ReadError, e),
        };
        if digest.size != entry.expected_size {
            log::debug!(
                "[{}] size {} differs from manifest size {}",
                job.name,
                digest.size,
                entry.expected_size
            );
        }
        match verdict {
            HashVerdict::Match => {
                log::info!("[{}] verified {}", job.name, digest.md5);
                match relocate(&paths.candidate, &paths.publish) {
                    Ok(()) => job.finish(JobStatus::Published),
                    Err(e) => job.fail(FailureKind::MoveError, e),
                }
            }
            HashVerdict::Mismatch { actual, expected } => {
                log::warn!(
                    "[{}] hash mismatch: got {}, manifest says {}; left at {}",
                    job.name,
                    actual,
                    expected,
                    paths.candidate.display()
                );
                job.finish(JobStatus::Rejected { actual, expected })
            }
        }
    }
}

/// Full run with the configured external patcher.
pub fn run(config: &PipelineConfig) -> Result<RunSummary> {
    run_with(config, config.external_patcher())
}

/// Full run with any patch engine.
///
/// The pattern list is loaded to completion before the manifest is read, so
/// no filtering decision can see a partial list.
pub fn run_with<E: PatchEngine>(config: &PipelineConfig, engine: E) -> Result<RunSummary> {
    let started = chrono::Utc::now();

    let filter = PatternFilter::load(&config.pattern_list)?;
    if filter.is_empty() {
        log::warn!("pattern list {} is empty; nothing will match", config.pattern_list.display());
    }

    let manifest = Manifest::load(&config.manifest, &config.schema)?;
    if let Some(dump) = &config.dump_path {
        write_dump(&manifest, dump);
    }

    let selected = select(&manifest, &filter);
    log::info!("{} of {} manifest entries selected", selected.len(), manifest.entries.len());

    let store = ContainerStore::open(&config.container_dir())?;
    let orchestrator = Orchestrator::new(config.layout(), store, engine, config.jobs)?
        .with_progress(Progress::new(config.progress));
    let jobs = orchestrator.run(&selected);

    Ok(RunSummary::new(started, manifest.entries.len(), jobs))
}

/// Best effort: a failed dump is logged and otherwise ignored.
fn write_dump(manifest: &Manifest, path: &Path) {
    match manifest.dump_json(path) {
        Ok(()) => log::info!("decoded manifest written to {}", path.display()),
        Err(e) => log::warn!("could not write manifest dump {}: {}", path.display(), e),
    }
}
