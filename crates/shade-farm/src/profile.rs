//! Overlay profiles.
//!
//! A profile is a directory of files (agent instructions, skills, commands)
//! laid out the way they should appear inside the project. Each file is
//! injected into the farm as a symlink. An optional `profile.toml` at the
//! profile root adds include/exclude patterns for the farm:
//!
//! ```toml
//! include = [".opencode/skill/review/**"]
//! exclude = [".opencode/skill/**"]
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use shade_config::path::to_slash;
use shade_config::{log_farm_debug, SyncConfig};
use tracing::field::display;
use walkdir::WalkDir;

use crate::sync::compile_junk;
use crate::{require_absolute, FarmError, IoContext, Result, GIT_DIR};

/// Optional manifest at the profile root
pub const PROFILE_MANIFEST: &str = "profile.toml";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProfileManifest {
    include: Vec<String>,
    exclude: Vec<String>,
}

/// A loaded overlay profile
#[derive(Debug, Clone)]
pub struct Profile {
    root: PathBuf,
    /// Relative paths of overlay files, sorted
    files: Vec<PathBuf>,
    include: Vec<String>,
    exclude: Vec<String>,
}

impl Profile {
    /// Collect the overlay files under `root`.
    ///
    /// Symlinks are not followed; a link to a file is an overlay file like any other.
    pub fn load(root: &Path) -> Result<Self> {
        require_absolute(root)?;
        let junk = compile_junk(&SyncConfig::default().junk_patterns)?;

        let mut files = Vec::new();
        let walker = WalkDir::new(root)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !(e.file_type().is_dir() && e.file_name() == GIT_DIR));
        for entry in walker {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(root).to_path_buf();
                FarmError::Io {
                    path,
                    source: e.into(),
                }
            })?;
            if entry.file_type().is_dir() {
                continue;
            }
            if entry.file_type().is_symlink() && entry.path().is_dir() {
                log_farm_debug!(
                    "Skipping directory link in profile",
                    path = display(entry.path().display())
                );
                continue;
            }
            if junk.is_match(Path::new(entry.file_name())) {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(root) else {
                continue;
            };
            if rel == Path::new(PROFILE_MANIFEST) {
                continue;
            }
            files.push(rel.to_path_buf());
        }

        let manifest = read_manifest(&root.join(PROFILE_MANIFEST))?;
        log_farm_debug!(
            "Profile loaded",
            root = display(root.display()),
            files = files.len()
        );

        Ok(Self {
            root: root.to_path_buf(),
            files,
            include: manifest.include,
            exclude: manifest.exclude,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Overlay files relative to the profile root
    pub fn relative_paths(&self) -> Vec<PathBuf> {
        self.files.clone()
    }

    /// Overlay files as absolute paths, ready for injection
    pub fn absolute_paths(&self) -> Vec<PathBuf> {
        self.files.iter().map(|rel| self.root.join(rel)).collect()
    }

    /// Slash-separated slots the farm must leave free for the overlay files
    pub fn overlay_slots(&self) -> Vec<String> {
        self.files.iter().map(|rel| to_slash(rel)).collect()
    }

    /// Include patterns from `profile.toml`
    pub fn include(&self) -> &[String] {
        &self.include
    }

    /// Exclude patterns from `profile.toml`
    pub fn exclude(&self) -> &[String] {
        &self.exclude
    }
}

fn read_manifest(path: &Path) -> Result<ProfileManifest> {
    if !path.is_file() {
        return Ok(ProfileManifest::default());
    }
    let contents = fs::read_to_string(path).at(path)?;
    toml::from_str(&contents).map_err(|source| FarmError::ProfileManifest {
        path: path.to_path_buf(),
        source,
    })
}
