//! Test environment abstraction for isolated testing.
//!
//! Provides `TestEnvironment` to manage:
//! - An isolated project root
//! - A private temp base for farms (so sweeps never see the real temp dir)
//! - A profile directory for overlay files
//!
//! # Usage
//!
//! ```ignore
//! use shade_config::testing::TestEnvironment;
//!
//! #[test]
//! fn test_something() {
//!     let env = TestEnvironment::new().unwrap();
//!     env.create_file("src/index.ts", b"export {}").unwrap();
//!     let config = env.config();
//! }
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

use crate::Config;

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Isolated test environment with unique paths
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Project root for the test
    pub project_root: PathBuf,
    /// Private temp base where farms are created
    pub temp_base: PathBuf,
    /// Profile directory holding overlay files
    pub profile_dir: PathBuf,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create a new isolated test environment
    pub fn new() -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        // Canonical so that paths compare equal to what the farm engine resolves
        let root = temp_dir.path().canonicalize()?;

        let project_root = root.join("project");
        let temp_base = root.join("tmp");
        let profile_dir = root.join("profile");

        std::fs::create_dir_all(&project_root)?;
        std::fs::create_dir_all(&temp_base)?;
        std::fs::create_dir_all(&profile_dir)?;

        Ok(Self {
            _temp_dir: temp_dir,
            project_root,
            temp_base,
            profile_dir,
            test_id,
        })
    }

    /// Create a test file under the project root
    pub fn create_file(&self, relative_path: &str, content: &[u8]) -> anyhow::Result<PathBuf> {
        write_under(&self.project_root, relative_path, content)
    }

    /// Create a test directory under the project root
    pub fn create_dir(&self, relative_path: &str) -> anyhow::Result<PathBuf> {
        let path = self.project_root.join(relative_path);
        std::fs::create_dir_all(&path)?;
        Ok(path)
    }

    /// Create an overlay file under the profile directory
    pub fn create_profile_file(
        &self,
        relative_path: &str,
        content: &[u8],
    ) -> anyhow::Result<PathBuf> {
        write_under(&self.profile_dir, relative_path, content)
    }

    /// Default config pointed at this environment's temp base
    pub fn config(&self) -> Config {
        let mut cfg = Config::default();
        cfg.farm.temp_base = Some(self.temp_base.clone());
        cfg.farm.global_gitignore = Some(self.temp_base.join("no-global-gitignore"));
        cfg.sync.settle_ms = 50;
        cfg
    }
}

fn write_under(root: &Path, relative_path: &str, content: &[u8]) -> anyhow::Result<PathBuf> {
    let path = root.join(relative_path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, content)?;
    Ok(path)
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new().expect("Failed to create test environment")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_creates_directories() {
        let env = TestEnvironment::new().unwrap();
        assert!(env.project_root.exists());
        assert!(env.temp_base.exists());
        assert!(env.profile_dir.exists());
        assert!(env.project_root.is_absolute());
    }

    #[test]
    fn test_environment_ids_are_unique() {
        let env1 = TestEnvironment::new().unwrap();
        let env2 = TestEnvironment::new().unwrap();
        assert_ne!(env1.test_id, env2.test_id);
        assert_ne!(env1.project_root, env2.project_root);
    }

    #[test]
    fn test_create_file() {
        let env = TestEnvironment::new().unwrap();
        let path = env.create_file("src/index.ts", b"export {}").unwrap();
        assert!(path.exists());
        assert_eq!(std::fs::read(&path).unwrap(), b"export {}");
    }

    #[test]
    fn test_config_uses_private_temp_base() {
        let env = TestEnvironment::new().unwrap();
        let cfg = env.config();
        assert_eq!(cfg.farm.temp_base(), env.temp_base);
    }
}
