use crate::error::{Error, Result};
use std::path::{Component, Path, PathBuf};

/// Manifest names use `/`; tolerate `\` from Windows-built manifests.
pub fn normalize_name(name: &str) -> String {
    name.replace('\\', "/")
}

/// Ensure `rel` stays under `root`: non-empty, not absolute, no `..`.
/// Returns `root.join(rel)`.
pub fn safe_join(root: &Path, rel: &str) -> Result<PathBuf> {
    let unsafe_path = |reason| Error::UnsafePath { name: rel.to_string(), reason };
    if rel.is_empty() {
        return Err(unsafe_path("empty file name"));
    }
    let rel_path = Path::new(rel);
    if rel_path.is_absolute() || rel.starts_with('/') {
        return Err(unsafe_path("absolute paths are not allowed"));
    }
    for comp in rel_path.components() {
        match comp {
            Component::ParentDir => return Err(unsafe_path("parent traversal not allowed")),
            Component::RootDir | Component::Prefix(_) => {
                return Err(unsafe_path("absolute paths are not allowed"))
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }
    Ok(root.join(rel_path))
}

/// Append `suffix` to the final component, e.g. `a/b.bin` -> `a/b.bin.hdiff`.
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}
