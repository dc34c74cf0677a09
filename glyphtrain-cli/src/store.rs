//! File-backed model store.

use glyphtrain_core::{ModelStore, TrainerError};
use std::path::{Path, PathBuf};

/// Writes exported weights to a single file, replacing it atomically.
pub struct FileModelStore {
    path: PathBuf,
}

impl FileModelStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ModelStore for FileModelStore {
    fn save(&self, weights: &[u8]) -> Result<(), TrainerError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, weights)?;
        std::fs::rename(&tmp, &self.path)?;
        tracing::debug!(path = %self.path.display(), bytes = weights.len(), "Model saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_creates_parent_and_replaces() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("models").join("latest.json");
        let store = FileModelStore::new(&path);

        store.save(b"first").unwrap();
        store.save(b"second").unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_save_into_file_parent_fails() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();
        let store = FileModelStore::new(blocker.join("model.json"));

        let err = store.save(b"weights").unwrap_err();
        assert!(matches!(err, TrainerError::Persistence(_)));
    }
}
