//! Upload Registry
//!
//! Tracks destinations with an upload in progress, so two sessions never
//! write the same file, and enforces the concurrent upload limit.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::AppError;

/// Shared set of active upload destinations
#[derive(Clone)]
pub struct UploadRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    active: Mutex<HashSet<PathBuf>>,

    /// Maximum concurrent uploads (0 = unlimited)
    max_concurrent: usize,
}

/// Held for the lifetime of one upload; releases the destination on drop
#[derive(Debug)]
pub struct UploadClaim {
    registry: Arc<RegistryInner>,
    path: PathBuf,
}

impl std::fmt::Debug for RegistryInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryInner")
            .field("max_concurrent", &self.max_concurrent)
            .finish_non_exhaustive()
    }
}

impl UploadRegistry {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                active: Mutex::new(HashSet::new()),
                max_concurrent,
            }),
        }
    }

    /// Claim `path` for a new upload
    pub fn claim(&self, path: &Path) -> Result<UploadClaim, AppError> {
        let mut active = self.inner.active.lock();

        if active.contains(path) {
            return Err(AppError::Conflict(path.display().to_string()));
        }
        if self.inner.max_concurrent > 0 && active.len() >= self.inner.max_concurrent {
            return Err(AppError::Busy(self.inner.max_concurrent));
        }

        active.insert(path.to_path_buf());
        tracing::debug!(destination = %path.display(), active = active.len(), "Upload claimed");

        Ok(UploadClaim {
            registry: Arc::clone(&self.inner),
            path: path.to_path_buf(),
        })
    }

    pub fn active_count(&self) -> usize {
        self.inner.active.lock().len()
    }
}

impl Drop for UploadClaim {
    fn drop(&mut self) {
        self.registry.active.lock().remove(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_and_release() {
        let registry = UploadRegistry::new(0);
        let claim = registry.claim(Path::new("/srv/a.bin")).unwrap();
        assert_eq!(registry.active_count(), 1);

        let dup = registry.claim(Path::new("/srv/a.bin"));
        assert!(matches!(dup, Err(AppError::Conflict(_))));

        drop(claim);
        assert_eq!(registry.active_count(), 0);
        assert!(registry.claim(Path::new("/srv/a.bin")).is_ok());
    }

    #[test]
    fn test_concurrent_limit() {
        let registry = UploadRegistry::new(2);
        let _a = registry.claim(Path::new("a")).unwrap();
        let b = registry.claim(Path::new("b")).unwrap();
        assert!(matches!(registry.claim(Path::new("c")), Err(AppError::Busy(2))));

        drop(b);
        assert!(registry.claim(Path::new("c")).is_ok());
    }
}
