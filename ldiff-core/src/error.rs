//! Error types for every stage of the patch pipeline.
//!
//! Each failure domain has its own enum so callers can tell a per-entry
//! problem (extraction, patching, verification, relocation) apart from a
//! fatal startup problem (pattern list, manifest, schema).

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias for the fatal, run-level error.
pub type Result<T> = std::result::Result<T, Error>;

/// Malformed manifest bytes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("truncated {what} at byte {pos}")]
    Truncated { what: &'static str, pos: usize },

    #[error("varint overflow at byte {pos}")]
    VarintOverflow { pos: usize },

    #[error("invalid field number 0 at byte {pos}")]
    ZeroField { pos: usize },

    #[error("wire type {wire_type} not supported at byte {pos}")]
    UnsupportedWireType { wire_type: u8, pos: usize },

    #[error("field {field} has wire type {found}, expected {expected} (byte {pos})")]
    WireTypeMismatch { field: u32, expected: &'static str, found: &'static str, pos: usize },

    #[error("field {field} is not valid UTF-8 (byte {pos})")]
    InvalidUtf8 { field: u32, pos: usize },

    #[error("field {field} value {value} is out of range (byte {pos})")]
    OutOfRange { field: u32, value: u64, pos: usize },
}

/// Pattern list could not be loaded or compiled.
#[derive(Error, Debug)]
pub enum PatternError {
    #[error("read pattern list {path:?}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("invalid pattern {pattern:?}: {source}")]
    Compile { pattern: String, source: globset::Error },
}

/// Patch payload could not be pulled out of a container.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("container {id:?} not found")]
    SegmentNotFound { id: String },

    #[error("no usable patch segment for {file_name:?}")]
    NoSegmentAvailable { file_name: String },

    #[error("container {id:?} is {len} bytes, segment needs [{offset}, {offset}+{size})")]
    ShortContainer { id: String, offset: u64, size: u64, len: u64 },

    #[error("{op} {path:?}: {source}")]
    Io { op: &'static str, path: PathBuf, source: io::Error },
}

/// External patcher could not be run to completion.
#[derive(Error, Debug)]
pub enum PatchError {
    #[error("spawn patcher {program:?}: {source}")]
    Spawn { program: PathBuf, source: io::Error },

    #[error("wait for patcher: {0}")]
    Wait(#[source] io::Error),

    #[error("patcher still running after {secs:.1}s, killed")]
    Timeout { secs: f64 },
}

/// Candidate file could not be hashed.
#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("read {path:?}: {source}")]
    Read { path: PathBuf, source: io::Error },
}

/// Verified file could not be moved into the publish directory.
#[derive(Error, Debug)]
pub enum MoveError {
    #[error("create directory {path:?}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },

    #[error("move {from:?} -> {to:?}: {source}")]
    Rename { from: PathBuf, to: PathBuf, source: io::Error },
}

/// Run-level error. Anything surfacing here aborts the whole run.
#[derive(Error, Debug)]
pub enum Error {
    #[error("decode manifest: {0}")]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Patch(#[from] PatchError),

    #[error(transparent)]
    Verify(#[from] VerifyError),

    #[error(transparent)]
    Move(#[from] MoveError),

    #[error("unsafe file name {name:?}: {reason}")]
    UnsafePath { name: String, reason: &'static str },

    #[error("read {path:?}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("parse schema {path:?}: {source}")]
    Schema { path: PathBuf, source: serde_json::Error },

    #[error("build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_error_names_position() {
        let err = Error::from(DecodeError::Truncated { what: "varint", pos: 17 });
        assert_eq!(err.to_string(), "decode manifest: truncated varint at byte 17");
    }

    #[test]
    fn short_container_mentions_range() {
        let err = ExtractError::ShortContainer { id: "X".into(), offset: 4, size: 10, len: 8 };
        let msg = err.to_string();
        assert!(msg.contains("\"X\""));
        assert!(msg.contains("[4, 4+10)"));
    }
}
