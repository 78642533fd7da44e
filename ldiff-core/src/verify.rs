use crate::error::VerifyError;
use md5::{Digest, Md5};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Read size for streaming hashes (64 KiB).
const BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDigest {
    /// Lowercase hex MD5.
    pub md5: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashVerdict {
    Match,
    Mismatch { actual: String, expected: String },
}

impl HashVerdict {
    pub fn is_match(&self) -> bool {
        matches!(self, HashVerdict::Match)
    }
}

/// Stream `path` through MD5 without holding it in memory.
pub fn md5_file(path: &Path) -> Result<FileDigest, VerifyError> {
    let read_err = |source| VerifyError::Read { path: path.to_path_buf(), source };
    let mut file = File::open(path).map_err(read_err)?;
    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut size = 0u64;
    loop {
        let n = file.read(&mut buffer).map_err(read_err)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        size += n as u64;
    }
    Ok(FileDigest { md5: format!("{:x}", hasher.finalize()), size })
}

/// Compare a file's MD5 against `expected` (hex, case-insensitive).
pub fn verify_file(path: &Path, expected: &str) -> Result<(HashVerdict, FileDigest), VerifyError> {
    let digest = md5_file(path)?;
    let verdict = if digest.md5.eq_ignore_ascii_case(expected.trim()) {
        HashVerdict::Match
    } else {
        HashVerdict::Mismatch { actual: digest.md5.clone(), expected: expected.to_string() }
    };
    Ok((verdict, digest))
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_MD5: &str = "d41d8cd98f00b204e9800998ecf8427e";

    #[test]
    fn empty_file_digest() {
        let td = tempfile::tempdir().unwrap();
        let p = td.path().join("empty");
        std::fs::write(&p, b"").unwrap();
        let d = md5_file(&p).unwrap();
        assert_eq!(d.md5, EMPTY_MD5);
        assert_eq!(d.size, 0);
    }

    #[test]
    fn multi_buffer_file_digest() {
        let td = tempfile::tempdir().unwrap();
        let p = td.path().join("big");
        let data: Vec<u8> = (0..=255u8).cycle().take(3 * BUFFER_SIZE + 17).collect();
        std::fs::write(&p, &data).unwrap();
        let d = md5_file(&p).unwrap();
        assert_eq!(d.md5, format!("{:x}", Md5::digest(&data)));
        assert_eq!(d.size, data.len() as u64);
    }

    #[test]
    fn comparison_ignores_case() {
        let td = tempfile::tempdir().unwrap();
        let p = td.path().join("hello");
        std::fs::write(&p, b"hello world").unwrap();
        let (v, _) = verify_file(&p, "5EB63BBBE01EEED093CB22BB8F5ACDC3").unwrap();
        assert!(v.is_match());
    }

    #[test]
    fn mismatch_carries_both_hashes() {
        let td = tempfile::tempdir().unwrap();
        let p = td.path().join("x");
        std::fs::write(&p, b"x").unwrap();
        let (v, _) = verify_file(&p, EMPTY_MD5).unwrap();
        match v {
            HashVerdict::Mismatch { actual, expected } => {
                assert_eq!(actual, "9dd4e461268c8034f5c8564e155c67a6");
                assert_eq!(expected, EMPTY_MD5);
            }
            HashVerdict::Match => panic!("expected mismatch"),
        }
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = md5_file(Path::new("/nonexistent/file")).unwrap_err();
        assert!(matches!(err, VerifyError::Read { .. }));
    }
}
