//! Core of `ldiff`: decode a binary patch manifest, select entries by
//! filename pattern, and drive each one through
//! extract -> patch -> verify -> publish.

pub mod container;
pub mod error;
pub mod manifest;
pub mod path_safety;
pub mod patcher;
pub mod pattern;
pub mod pipeline;
pub mod progress;
pub mod publish;
pub mod report;
pub mod verify;
pub mod wire;

pub use error::{Error, Result};
pub use manifest::{Manifest, ManifestEntry, ManifestSchema, PatchSegment};
pub use patcher::{ExternalPatcher, PatchEngine, PatchOutcome};
pub use pattern::PatternFilter;
pub use pipeline::{run, run_with, PipelineConfig};
pub use report::{JobRecord, JobStatus, RunSummary};
