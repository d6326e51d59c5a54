//! File system paths for persisted session data.

use crate::{CoreError, CoreResult};
use std::path::PathBuf;

/// Manages file system paths for the session engine.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Base directory for config and persisted session files (~/.mikasa)
    base_dir: PathBuf,
}

impl Paths {
    /// Create a new Paths instance rooted at `~/.mikasa`.
    pub fn new() -> CoreResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| CoreError::Path("Could not determine home directory".to_string()))?;

        Ok(Self {
            base_dir: home.join(".mikasa"),
        })
    }

    /// Create a new Paths instance with a custom base directory.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the base directory (~/.mikasa).
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Get the config file path (~/.mikasa/config.json).
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Get the client-persisted store file (~/.mikasa/local-storage.json).
    pub fn local_store_file(&self) -> PathBuf {
        self.base_dir.join("local-storage.json")
    }

    /// Get the cookie jar file (~/.mikasa/cookies.json).
    pub fn cookie_store_file(&self) -> PathBuf {
        self.base_dir.join("cookies.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_paths_with_base_dir() {
        let base = PathBuf::from("/tmp/test-mikasa");
        let paths = Paths::with_base_dir(base.clone());

        assert_eq!(paths.base_dir(), &base);
        assert_eq!(paths.config_file(), base.join("config.json"));
        assert_eq!(paths.local_store_file(), base.join("local-storage.json"));
        assert_eq!(paths.cookie_store_file(), base.join("cookies.json"));
    }

    #[test]
    fn test_paths_default() {
        let paths = Paths::new().unwrap();
        let home = dirs::home_dir().unwrap();

        assert_eq!(paths.base_dir(), &home.join(".mikasa"));
    }

    #[test]
    fn test_ensure_dirs_idempotent() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("mikasa");
        let paths = Paths::with_base_dir(base.clone());

        assert!(!base.exists());

        paths.ensure_dirs().unwrap();
        paths.ensure_dirs().unwrap();

        assert!(base.is_dir());
    }
}
