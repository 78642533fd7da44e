use crate::error::MoveError;
use std::fs;
use std::path::Path;

/// Move a verified file to `dest`, creating parent directories.
/// An existing `dest` is replaced. No retry on failure.
pub fn relocate(src: &Path, dest: &Path) -> Result<(), MoveError> {
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|source| MoveError::CreateDir { path: parent.to_path_buf(), source })?;
    }
    fs::rename(src, dest).map_err(|source| MoveError::Rename {
        from: src.to_path_buf(),
        to: dest.to_path_buf(),
        source,
    })?;
    log::info!("published {}", dest.display());
    Ok(())
}
