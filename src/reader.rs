//! Directory listing
//!
//! One level only. Each entry carries `is_directory` so the UI can ask for
//! a nested listing when the user expands a folder.

use crate::error::{FilesystemError, FsErrorKind};
use serde::{Deserialize, Serialize, Serializer};
use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

/// One child of a listed directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryEntry {
    /// Base name
    pub name: String,
    /// Listed directory joined with `name`
    #[serde(serialize_with = "serialize_lossy")]
    pub path: PathBuf,
    pub is_directory: bool,
}

/// List the immediate children of `dir`
///
/// Directories come first, then files, each sorted by name. Symlinks are
/// followed for classification; a dangling link counts as a file.
pub fn read_directory(dir: &Path) -> Result<Vec<DirectoryEntry>, FilesystemError> {
    let meta = fs::metadata(dir).map_err(|e| FilesystemError::from_io(e, dir))?;
    if !meta.is_dir() {
        return Err(FilesystemError::new(FsErrorKind::NotADirectory, dir));
    }

    let mut entries = Vec::new();
    for item in fs::read_dir(dir).map_err(|e| FilesystemError::from_io(e, dir))? {
        let item = item.map_err(|e| FilesystemError::from_io(e, dir))?;
        let name = item.file_name().to_string_lossy().into_owned();
        let path = item.path();
        let is_directory = fs::metadata(&path).map(|m| m.is_dir()).unwrap_or(false);

        entries.push(DirectoryEntry {
            name,
            path,
            is_directory,
        });
    }

    entries.sort_by(compare_entries);
    log::trace!("listed {} entries in {}", entries.len(), dir.display());
    Ok(entries)
}

fn serialize_lossy<S: Serializer>(path: &Path, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&path.to_string_lossy())
}

fn compare_entries(a: &DirectoryEntry, b: &DirectoryEntry) -> Ordering {
    b.is_directory
        .cmp(&a.is_directory)
        .then_with(|| a.name.cmp(&b.name))
}
