use crate::error::ExtractError;
use crate::manifest::PatchSegment;
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const BUF_SIZE: usize = 64 * 1024;

/// Read-only directory of patch containers, indexed by file name.
#[derive(Debug, Clone)]
pub struct ContainerStore {
    dir: PathBuf,
    ids: BTreeSet<String>,
}

impl ContainerStore {
    /// List `dir` once. A missing directory yields an empty store.
    ///
    /// Symlinks are followed, so a link to a regular file is a container.
    /// Entries that cannot be resolved (dangling links) are skipped.
    pub fn open(dir: &Path) -> Result<Self, ExtractError> {
        let mut ids = BTreeSet::new();
        if !dir.is_dir() {
            log::warn!("container directory {} does not exist", dir.display());
            return Ok(Self { dir: dir.to_path_buf(), ids });
        }
        for ent in walkdir::WalkDir::new(dir).min_depth(1).max_depth(1).follow_links(true) {
            let ent = match ent {
                Ok(ent) => ent,
                Err(e) if e.depth() > 0 => {
                    log::warn!("skipping container entry: {}", e);
                    continue;
                }
                Err(e) => {
                    return Err(ExtractError::Io {
                        op: "list",
                        path: dir.to_path_buf(),
                        source: e.into(),
                    })
                }
            };
            if !ent.file_type().is_file() {
                continue;
            }
            if let Some(name) = ent.file_name().to_str() {
                ids.insert(name.to_string());
            }
        }
        log::debug!("{} containers under {}", ids.len(), dir.display());
        Ok(Self { dir: dir.to_path_buf(), ids })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Copy `seg.size` bytes at `seg.offset` of the container into `dest`.
    ///
    /// `dest` only ever appears complete: bytes go to a temp file beside it
    /// which is renamed into place. Returns the number of bytes written.
    pub fn extract(&self, seg: &PatchSegment, dest: &Path) -> Result<u64, ExtractError> {
        if !self.contains(&seg.container_id) {
            return Err(ExtractError::SegmentNotFound { id: seg.container_id.clone() });
        }
        let src_path = self.dir.join(&seg.container_id);

        let mut src = File::open(&src_path).map_err(io_err("open", &src_path))?;
        let len = src.metadata().map_err(io_err("stat", &src_path))?.len();
        let end = seg.offset.checked_add(seg.size);
        if end.map_or(true, |e| e > len) {
            return Err(ExtractError::ShortContainer {
                id: seg.container_id.clone(),
                offset: seg.offset,
                size: seg.size,
                len,
            });
        }
        src.seek(SeekFrom::Start(seg.offset)).map_err(io_err("seek", &src_path))?;

        let parent = match dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(p) => p.to_path_buf(),
            None => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(io_err("create directory", &parent))?;
        let tmp = tempfile::NamedTempFile::new_in(&parent).map_err(io_err("create temp in", &parent))?;

        let mut writer = BufWriter::with_capacity(BUF_SIZE, tmp.as_file());
        let copied = io::copy(&mut (&mut src).take(seg.size), &mut writer)
            .map_err(io_err("copy into", dest))?;
        writer.flush().map_err(io_err("flush", dest))?;
        drop(writer);
        if copied != seg.size {
            // Container shrank between stat and read.
            return Err(ExtractError::ShortContainer {
                id: seg.container_id.clone(),
                offset: seg.offset,
                size: seg.size,
                len: seg.offset + copied,
            });
        }
        tmp.persist(dest).map_err(|e| ExtractError::Io {
            op: "persist",
            path: dest.to_path_buf(),
            source: e.error,
        })?;

        log::info!(
            "extracted {} bytes from {} at offset {} to {}",
            seg.size,
            src_path.display(),
            seg.offset,
            dest.display()
        );
        Ok(copied)
    }

    /// First-match-wins: extract the first segment whose container is present.
    /// Later segments are never tried once a present container is found, even
    /// if its extraction fails.
    pub fn extract_first<'s>(
        &self,
        file_name: &str,
        segments: &'s [PatchSegment],
        dest: &Path,
    ) -> Result<&'s PatchSegment, ExtractError> {
        for seg in segments {
            match self.extract(seg, dest) {
                Ok(_) => return Ok(seg),
                Err(ExtractError::SegmentNotFound { id }) => {
                    log::debug!("{}: container {:?} not present, trying next segment", file_name, id);
                }
                Err(e) => return Err(e),
            }
        }
        Err(ExtractError::NoSegmentAvailable { file_name: file_name.to_string() })
    }
}

fn io_err(op: &'static str, path: &Path) -> impl FnOnce(io::Error) -> ExtractError {
    let path = path.to_path_buf();
    move |source| ExtractError::Io { op, path, source }
}
