//! Dedup lookups against harvested data

use std::path::PathBuf;

/// Answers whether an entity has already been harvested
pub trait DataStorage: Send + Sync {
    /// Whether something exists at the canonical `path`
    fn exists(&self, path: &str) -> bool;
}

/// Looks for canonical paths under a local data root
#[derive(Debug, Clone)]
pub struct DiskStorage {
    root: PathBuf,
}

impl DiskStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl DataStorage for DiskStorage {
    fn exists(&self, path: &str) -> bool {
        self.root.join(path).exists()
    }
}
