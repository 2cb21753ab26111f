//! Move a file into another directory, keeping its base name

use crate::error::{FilesystemError, FsErrorKind};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Serializes the fallback path so moves from this process cannot race
static FALLBACK_MOVES: Mutex<()> = Mutex::new(());

/// Move `source` into `dest_dir` and return the new path
///
/// No copy fallback across filesystems and no overwrite of an existing
/// entry with the same name. The new name is claimed with a hard link,
/// which fails atomically if the name is taken, and the old name is then
/// removed.
pub fn move_file(source: &Path, dest_dir: &Path) -> Result<PathBuf, FilesystemError> {
    let source_meta =
        fs::symlink_metadata(source).map_err(|e| FilesystemError::from_io(e, source))?;
    if source_meta.is_dir() {
        return Err(FilesystemError::new(FsErrorKind::NotAFile, source));
    }

    let dest_meta = fs::metadata(dest_dir).map_err(|e| FilesystemError::from_io(e, dest_dir))?;
    if !dest_meta.is_dir() {
        return Err(FilesystemError::new(FsErrorKind::NotADirectory, dest_dir));
    }

    let Some(base_name) = source.file_name() else {
        return Err(FilesystemError::new(FsErrorKind::InvalidPath, source));
    };
    let target = dest_dir.join(base_name);

    if same_directory(source, dest_dir) {
        return Ok(source.to_path_buf());
    }

    match fs::hard_link(source, &target) {
        Ok(()) => {
            if let Err(e) = fs::remove_file(source) {
                // Undo the link so the file keeps a single name
                let _ = fs::remove_file(&target);
                return Err(FilesystemError::from_io(e, source));
            }
        }
        Err(e) => {
            let err = FilesystemError::from_io(e, source);
            match err.kind {
                FsErrorKind::AlreadyExists => {
                    return Err(FilesystemError::new(FsErrorKind::AlreadyExists, &target))
                }
                FsErrorKind::NotFound | FsErrorKind::CrossDevice => return Err(err),
                _ => {
                    log::debug!("hard link refused ({}), renaming under lock", err);
                    rename_no_clobber(source, &target)?;
                }
            }
        }
    }

    log::info!("moved {} -> {}", source.display(), target.display());
    Ok(target)
}

/// For filesystems without hard links
fn rename_no_clobber(source: &Path, target: &Path) -> Result<(), FilesystemError> {
    let _guard = match FALLBACK_MOVES.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if fs::symlink_metadata(target).is_ok() {
        return Err(FilesystemError::new(FsErrorKind::AlreadyExists, target));
    }
    fs::rename(source, target).map_err(|e| FilesystemError::from_io(e, source))
}

/// Whether `source` already lives directly in `dir`, however either is spelled
fn same_directory(source: &Path, dir: &Path) -> bool {
    let Some(parent) = source.parent() else {
        return false;
    };
    match (parent.canonicalize(), dir.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
