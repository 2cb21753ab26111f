//! Path confinement for bridge calls
//!
//! With no roots configured every absolute path is allowed. Once roots
//! exist, a path must canonicalize to somewhere inside one of them.

use crate::error::{FilesystemError, FsErrorKind};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

#[derive(Debug, Default)]
pub struct PathPolicy {
    roots: RwLock<Vec<PathBuf>>,
}

impl PathPolicy {
    /// A policy that allows any absolute path
    pub fn unrestricted() -> Self {
        Self::default()
    }

    /// Confine to `roots`. Roots that do not exist yet are kept verbatim.
    pub fn with_roots<I, P>(roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let roots = roots
            .into_iter()
            .map(|r| canonical_or_verbatim(r.as_ref()))
            .collect();
        Self {
            roots: RwLock::new(roots),
        }
    }

    pub fn is_restricted(&self) -> bool {
        !self.read_roots().is_empty()
    }

    /// Add a root at runtime. No effect on an unrestricted policy.
    pub fn grant(&self, path: &Path) {
        let mut roots = match self.roots.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if roots.is_empty() {
            return;
        }
        let root = canonical_or_verbatim(path);
        if !roots.iter().any(|r| r == &root) {
            log::info!("granted access to {}", root.display());
            roots.push(root);
        }
    }

    /// Check a caller-supplied path
    ///
    /// The path must be absolute. When restricted, it must exist and
    /// resolve inside a root (symlinks and `..` are resolved first).
    pub fn check(&self, path: &Path) -> Result<(), FilesystemError> {
        if !path.is_absolute() {
            return Err(FilesystemError::new(FsErrorKind::InvalidPath, path));
        }

        let roots = self.read_roots();
        if roots.is_empty() {
            return Ok(());
        }

        let resolved = path
            .canonicalize()
            .map_err(|e| FilesystemError::from_io(e, path))?;
        if roots.iter().any(|root| resolved.starts_with(root)) {
            Ok(())
        } else {
            log::warn!("rejected path outside roots: {}", path.display());
            Err(FilesystemError::new(FsErrorKind::OutsideRoots, path))
        }
    }

    fn read_roots(&self) -> std::sync::RwLockReadGuard<'_, Vec<PathBuf>> {
        match self.roots.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn canonical_or_verbatim(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_unrestricted_rejects_relative_paths() {
        let policy = PathPolicy::unrestricted();
        let err = policy.check(Path::new("relative/dir")).unwrap_err();
        assert_eq!(err.kind, FsErrorKind::InvalidPath);
    }

    #[test]
    fn test_unrestricted_allows_missing_absolute_paths() {
        // Existence is the reader's job, not the policy's
        let policy = PathPolicy::unrestricted();
        assert!(policy.check(Path::new("/does/not/exist")).is_ok());
    }

    #[test]
    fn test_restricted_allows_paths_inside_root() {
        let root = TempDir::new().unwrap();
        let inner = root.path().join("inner");
        std::fs::create_dir(&inner).unwrap();

        let policy = PathPolicy::with_roots([root.path()]);
        assert!(policy.is_restricted());
        assert!(policy.check(root.path()).is_ok());
        assert!(policy.check(&inner).is_ok());
    }

    #[test]
    fn test_restricted_rejects_escape_via_dotdot() {
        let root = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let inner = root.path().join("inner");
        std::fs::create_dir(&inner).unwrap();

        let policy = PathPolicy::with_roots([&inner]);
        let escape = inner.join("..");
        let err = policy.check(&escape).unwrap_err();
        assert_eq!(err.kind, FsErrorKind::OutsideRoots);

        let err = policy.check(outside.path()).unwrap_err();
        assert_eq!(err.kind, FsErrorKind::OutsideRoots);
    }

    #[test]
    fn test_grant_extends_restricted_policy() {
        let root = TempDir::new().unwrap();
        let picked = TempDir::new().unwrap();

        let policy = PathPolicy::with_roots([root.path()]);
        assert!(policy.check(picked.path()).is_err());

        policy.grant(picked.path());
        assert!(policy.check(picked.path()).is_ok());
    }

    #[test]
    fn test_grant_keeps_unrestricted_policy_open() {
        let policy = PathPolicy::unrestricted();
        policy.grant(Path::new("/tmp"));
        assert!(!policy.is_restricted());
    }
}
