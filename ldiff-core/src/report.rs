use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Pipeline stage a job was in when it stopped.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Selected,
    Extracting,
    Patching,
    Verifying,
}

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    UnsafePath,
    NoSegmentAvailable,
    ExtractionFailed,
    PatchFailed,
    Timeout,
    ReadError,
    MoveError,
}

/// Terminal state of one job.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum JobStatus {
    Published,
    /// Hash mismatch; the candidate stays in the work directory.
    Rejected { actual: String, expected: String },
    Failed { stage: Stage, kind: FailureKind, message: String },
}

impl JobStatus {
    pub fn is_published(&self) -> bool {
        matches!(self, JobStatus::Published)
    }
}

#[derive(Serialize, Clone, Debug)]
pub struct JobRecord {
    pub file_name: String,
    pub container_id: Option<String>,
    pub exit_code: Option<i32>,
    #[serde(flatten)]
    pub status: JobStatus,
}

#[derive(Serialize, Clone, Debug)]
pub struct RunSummary {
    pub started_utc: DateTime<Utc>,
    pub finished_utc: DateTime<Utc>,
    pub manifest_entries: usize,
    pub selected: usize,
    pub published: usize,
    pub rejected: usize,
    pub failed: usize,
    pub jobs: Vec<JobRecord>,
}

impl RunSummary {
    pub fn new(started_utc: DateTime<Utc>, manifest_entries: usize, jobs: Vec<JobRecord>) -> Self {
        let mut published = 0;
        let mut rejected = 0;
        let mut failed = 0;
        for j in &jobs {
            match j.status {
                JobStatus::Published => published += 1,
                JobStatus::Rejected { .. } => rejected += 1,
                JobStatus::Failed { .. } => failed += 1,
            }
        }
        Self {
            started_utc,
            finished_utc: Utc::now(),
            manifest_entries,
            selected: jobs.len(),
            published,
            rejected,
            failed,
            jobs,
        }
    }

    /// Every selected entry was published (vacuously true when none were selected).
    pub fn all_ok(&self) -> bool {
        self.rejected == 0 && self.failed == 0
    }

    pub fn write_json(&self, path: &Path) -> std::io::Result<()> {
        let w = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(w, self)?;
        Ok(())
    }
}
