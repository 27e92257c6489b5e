//! # shade-farm
//!
//! Symlink-farm overlay engine for shade.
//!
//! Handles:
//! - Ignore stack loading (global excludes, `.git/info/exclude`, nested `.gitignore`)
//! - Include/exclude disposition of project paths
//! - Plan building (pure) and plan execution into an isolated temp directory
//! - Farm lifecycle: marker file, crash-safe removal, orphan sweep
//! - Live sync of edits made inside the farm back into the project
//!
//! Nothing in this crate writes to the terminal; callers get typed results.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub mod executor;
pub mod farm;
pub mod ignore_stack;
pub mod matcher;
pub mod plan;
pub mod profile;
pub mod session;
pub mod sync;

pub use executor::execute_plan;
pub use farm::{
    clean_farm_dir, cleanup_farm, create_farm, inject_files, sweep_orphans, Farm, FarmOptions,
    InjectReport, SweepPolicy, SweepReport, FARM_PREFIX, MARKER_FILE, REMOVING_SUFFIX,
};
pub use ignore_stack::IgnoreStack;
pub use matcher::{Disposition, PatternMatcher};
pub use plan::{PlanBuilder, SymlinkPlan, TraversalState};
pub use profile::Profile;
pub use session::{FarmSession, SessionReport};
pub use sync::{start_sync, SyncFailure, SyncHandle, SyncOp, SyncOptions};

#[derive(Error, Debug)]
pub enum FarmError {
    #[error("Expected an absolute path, got: {}", path.display())]
    RelativePath { path: PathBuf },

    #[error("Too many entries: the tree exceeds the limit of {limit} entries")]
    TooManyEntries { limit: usize },

    #[error("{} is not inside {}", path.display(), source_dir.display())]
    OutsideSource { path: PathBuf, source_dir: PathBuf },

    #[error("Invalid glob pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("Failed to load ignore rules from {}: {source}", path.display())]
    Gitignore {
        path: PathBuf,
        #[source]
        source: ignore::Error,
    },

    #[error("Invalid profile manifest {}: {source}", path.display())]
    ProfileManifest {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Not a farm directory: {}", path.display())]
    NotAFarm { path: PathBuf },

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Config error: {0}")]
    Config(#[from] shade_config::ConfigError),
}

pub type Result<T> = std::result::Result<T, FarmError>;

/// Attach the offending path to an `io::Error`.
pub(crate) trait IoContext<T> {
    fn at(self, path: &Path) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn at(self, path: &Path) -> Result<T> {
        self.map_err(|source| FarmError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Fail with [`FarmError::RelativePath`] unless `path` is absolute.
pub(crate) fn require_absolute(path: &Path) -> Result<()> {
    if path.is_absolute() {
        Ok(())
    } else {
        Err(FarmError::RelativePath {
            path: path.to_path_buf(),
        })
    }
}

/// Directory name that is never traversed, linked or synced.
pub(crate) const GIT_DIR: &str = ".git";

/// Whether any proper ancestor of `rel` inside `root` is a symlink.
pub(crate) fn has_symlinked_ancestor(root: &Path, rel: &Path) -> bool {
    rel.ancestors()
        .skip(1)
        .filter(|a| !a.as_os_str().is_empty())
        .any(|a| {
            std::fs::symlink_metadata(root.join(a))
                .map(|m| m.file_type().is_symlink())
                .unwrap_or(false)
        })
}
