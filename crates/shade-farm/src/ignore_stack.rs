//! Layered gitignore rules for a project.
//!
//! Layers are added in git's precedence order: the global excludes file, then
//! `.git/info/exclude`, then the root `.gitignore`, then nested `.gitignore`
//! files as the walk discovers them. Lookups consult the newest layer first and
//! stop at the first layer with an opinion, so a later `!pattern` re-includes
//! what an earlier layer ignored.
//!
//! Every pattern is rewritten at load time to be relative to the project root,
//! which is what confines a nested file's rules to its own subdirectory.

use std::fs;
use std::path::{Path, PathBuf};

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use ignore::Match;
use shade_config::log_plan_debug;
use tracing::field::display;

use crate::{FarmError, IoContext, Result};

/// Name of the per-directory ignore file
pub const GITIGNORE_FILE: &str = ".gitignore";

#[derive(Debug, Clone)]
struct IgnoreLayer {
    /// Slash-separated directory the rules apply under ("" = whole project)
    scope: String,
    matcher: Gitignore,
}

/// Ordered set of gitignore layers, all rooted at the project root
#[derive(Debug, Clone)]
pub struct IgnoreStack {
    root: PathBuf,
    layers: Vec<IgnoreLayer>,
}

impl IgnoreStack {
    /// An empty stack that ignores nothing
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            layers: Vec::new(),
        }
    }

    /// Load the project-wide layers for `root`.
    ///
    /// `global_override` replaces git's `core.excludesFile` lookup; a path that
    /// does not exist disables the global layer.
    pub fn load(root: &Path, global_override: Option<&Path>) -> Result<Self> {
        let mut stack = Self::new(root);

        let global = match global_override {
            Some(path) => Some(path.to_path_buf()),
            None => ignore::gitignore::gitconfig_excludes_path(),
        };
        if let Some(global) = global {
            stack.push_file("", &global)?;
        }

        stack.push_file("", &root.join(".git").join("info").join("exclude"))?;
        stack.push_file("", &root.join(GITIGNORE_FILE))?;

        Ok(stack)
    }

    /// Project root all layers are relative to
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of loaded layers
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Load `dir/.gitignore` scoped to `scope`, if present.
    ///
    /// The root file is loaded by [`IgnoreStack::load`], so an empty scope is a no-op.
    pub fn push_nested(&mut self, dir: &Path, scope: &str) -> Result<bool> {
        if scope.is_empty() {
            return Ok(false);
        }
        self.push_file(scope, &dir.join(GITIGNORE_FILE))
    }

    /// Add the rules in `file`, scoped to `scope`. Missing files are skipped.
    pub fn push_file(&mut self, scope: &str, file: &Path) -> Result<bool> {
        // Also covers `.git` being a file (worktrees) and directories named .gitignore
        if !file.is_file() {
            return Ok(false);
        }
        let bytes = fs::read(file).at(file)?;
        let contents = String::from_utf8_lossy(&bytes);
        self.push_lines(scope, file, contents.lines())
    }

    /// Add rules from raw gitignore lines, scoped to `scope`.
    pub fn push_lines<'a>(
        &mut self,
        scope: &str,
        origin: &Path,
        lines: impl IntoIterator<Item = &'a str>,
    ) -> Result<bool> {
        let mut builder = GitignoreBuilder::new(&self.root);
        let mut added = 0usize;
        for line in lines {
            let Some(pattern) = scope_pattern(scope, line) else {
                continue;
            };
            match builder.add_line(Some(origin.to_path_buf()), &pattern) {
                Ok(_) => added += 1,
                // git silently skips malformed patterns; so do we
                Err(e) => log_plan_debug!(
                    "Skipping invalid ignore pattern",
                    pattern = display(&pattern),
                    error = display(&e)
                ),
            }
        }
        if added == 0 {
            return Ok(false);
        }

        let matcher = builder.build().map_err(|source| FarmError::Gitignore {
            path: origin.to_path_buf(),
            source,
        })?;
        log_plan_debug!(
            "Loaded ignore layer",
            origin = display(origin.display()),
            scope = display(scope),
            patterns = added
        );
        self.layers.push(IgnoreLayer {
            scope: scope.to_string(),
            matcher,
        });
        Ok(true)
    }

    /// Whether `rel` (slash-separated, relative to the root) is ignored.
    ///
    /// Only `rel` itself is tested; use [`IgnoreStack::is_ignored_path_or_parents`]
    /// when ancestors have not already been checked.
    pub fn is_ignored(&self, rel: &str, is_dir: bool) -> bool {
        if rel.is_empty() {
            return false;
        }
        for layer in self.layers.iter().rev() {
            if !in_scope(&layer.scope, rel) {
                continue;
            }
            match layer.matcher.matched(Path::new(rel), is_dir) {
                Match::Ignore(_) => return true,
                Match::Whitelist(_) => return false,
                Match::None => {}
            }
        }
        false
    }

    /// Whether `rel` or any of its parent directories is ignored
    pub fn is_ignored_path_or_parents(&self, rel: &str, is_dir: bool) -> bool {
        let mut end = 0;
        while let Some(pos) = rel[end..].find('/') {
            let parent = &rel[..end + pos];
            if self.is_ignored(parent, true) {
                return true;
            }
            end += pos + 1;
        }
        self.is_ignored(rel, is_dir)
    }
}

fn in_scope(scope: &str, rel: &str) -> bool {
    scope.is_empty()
        || rel
            .strip_prefix(scope)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Rewrite one gitignore line so it is relative to the project root.
///
/// Returns `None` for blank lines and comments.
fn scope_pattern(scope: &str, line: &str) -> Option<String> {
    let line = line.trim_end_matches('\r');
    if line.trim().is_empty() || line.starts_with('#') {
        return None;
    }
    if scope.is_empty() {
        return Some(line.to_string());
    }

    let (negated, body) = match line.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, line),
    };
    let scope = globset::escape(scope);

    let rewritten = if let Some(anchored) = body.strip_prefix('/') {
        format!("/{scope}/{anchored}")
    } else if body.trim_end_matches('/').contains('/') {
        // A slash anywhere but the end anchors the pattern to its own directory
        format!("/{scope}/{body}")
    } else {
        format!("/{scope}/**/{body}")
    };

    Some(if negated {
        format!("!{rewritten}")
    } else {
        rewritten
    })
}
