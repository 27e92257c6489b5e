//! Path helpers shared by the farm engine and the CLI.
//!
//! Relative paths that are matched against globs or gitignore rules are always
//! rendered with forward slashes and without a trailing slash.

use anyhow::{Context, Result};
use std::path::{Component, Path, PathBuf};

/// Render a relative path with `/` separators and no trailing slash.
///
/// # Example
/// ```
/// use std::path::Path;
/// use shade_config::path::to_slash;
///
/// assert_eq!(to_slash(Path::new("src/lib.rs")), "src/lib.rs");
/// assert_eq!(to_slash(Path::new("./src/")), "src");
/// ```
pub fn to_slash(path: &Path) -> String {
    let mut out = String::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => {
                if !out.is_empty() {
                    out.push('/');
                }
                out.push_str(&part.to_string_lossy());
            }
            Component::ParentDir => {
                if !out.is_empty() {
                    out.push('/');
                }
                out.push_str("..");
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    out
}

/// Join a slash-separated relative prefix with one more name.
pub fn join_slash(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

/// Normalize path, falling back to the original if canonicalization fails.
///
/// This is useful when the path might not exist and that's acceptable.
pub fn normalize_or_original(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Position of `dir` inside `root`, as a slash-separated relative path.
///
/// Raw paths are compared first; if `dir` is not lexically under `root` the
/// canonical forms are compared, which covers a `root` reached through a
/// symlink. Returns `None` when `dir` is not inside `root` at all.
pub fn relative_prefix(root: &Path, dir: &Path) -> Option<String> {
    if let Ok(relative) = dir.strip_prefix(root) {
        return Some(to_slash(relative));
    }
    let canonical_root = root.canonicalize().ok()?;
    let canonical_dir = dir.canonicalize().ok()?;
    canonical_dir
        .strip_prefix(&canonical_root)
        .ok()
        .map(to_slash)
}

/// Check if `path` is lexically inside `dir` (no `..` escapes, no filesystem access).
pub fn is_within(path: &Path, dir: &Path) -> bool {
    match path.strip_prefix(dir) {
        Ok(rest) => rest
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir)),
        Err(_) => false,
    }
}

/// Resolve a user-supplied directory to an absolute, canonical path.
pub fn resolve_dir(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    let canonical = path
        .canonicalize()
        .with_context(|| format!("Cannot resolve directory: {}", path.display()))?;
    if !canonical.is_dir() {
        anyhow::bail!("Not a directory: {}", path.display());
    }
    Ok(canonical)
}
