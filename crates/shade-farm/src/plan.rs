//! Symlink plan building.
//!
//! The builder walks the source tree once, depth first, and decides for every
//! entry whether it becomes a whole-directory symlink, a file symlink, a real
//! directory that is expanded further, or nothing at all. It reads the tree but
//! never writes to it; [`crate::execute_plan`] turns the plan into a farm.
//!
//! The source tree can change between building and executing a plan. The plan
//! is a snapshot and no locking is attempted.

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::{Path, PathBuf};

use shade_config::path::{join_slash, relative_prefix};
use shade_config::{log_plan_debug, log_plan_trace};
use tracing::field::display;

use crate::ignore_stack::IgnoreStack;
use crate::matcher::{Disposition, PatternMatcher};
use crate::{require_absolute, FarmError, IoContext, Result, GIT_DIR};

/// What to create for one directory level, keyed by entry name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymlinkPlan {
    /// Directories linked as a whole
    pub whole_dirs: BTreeSet<OsString>,
    /// Files (and source-tree symlinks) linked individually
    pub files: BTreeSet<OsString>,
    /// Directories recreated as real directories, with the plan for their contents
    pub partial_dirs: BTreeMap<OsString, SymlinkPlan>,
}

impl SymlinkPlan {
    pub fn is_empty(&self) -> bool {
        self.whole_dirs.is_empty() && self.files.is_empty() && self.partial_dirs.is_empty()
    }

    /// Number of entries at this level and below
    pub fn len(&self) -> usize {
        self.whole_dirs.len()
            + self.files.len()
            + self
                .partial_dirs
                .values()
                .map(|nested| 1 + nested.len())
                .sum::<usize>()
    }

    pub fn contains(&self, name: impl AsRef<OsStr>) -> bool {
        let name = name.as_ref();
        self.whole_dirs.contains(name)
            || self.files.contains(name)
            || self.partial_dirs.contains_key(name)
    }

    /// Drop `name` from whichever bucket holds it.
    pub fn remove(&mut self, name: impl AsRef<OsStr>) -> bool {
        let name = name.as_ref();
        self.whole_dirs.remove(name)
            || self.files.remove(name)
            || self.partial_dirs.remove(name).is_some()
    }

    /// Every relative path the plan links, depth first.
    ///
    /// Partial directories are not listed; only their contents are.
    pub fn link_paths(&self) -> Vec<PathBuf> {
        let mut out = Vec::new();
        self.collect_links(Path::new(""), &mut out);
        out
    }

    fn collect_links(&self, prefix: &Path, out: &mut Vec<PathBuf>) {
        for name in self.whole_dirs.iter().chain(&self.files) {
            out.push(prefix.join(name));
        }
        for (name, nested) in &self.partial_dirs {
            nested.collect_links(&prefix.join(name), out);
        }
    }
}

/// Entry counter shared by the whole walk
#[derive(Debug, Clone)]
pub struct TraversalState {
    entries: usize,
    max_entries: usize,
}

impl TraversalState {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: 0,
            max_entries,
        }
    }

    pub fn entries(&self) -> usize {
        self.entries
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Count one planned entry, failing as soon as the limit is exceeded.
    pub fn count(&mut self) -> Result<()> {
        self.entries += 1;
        if self.entries > self.max_entries {
            return Err(FarmError::TooManyEntries {
                limit: self.max_entries,
            });
        }
        Ok(())
    }
}

/// Builds a [`SymlinkPlan`] for a source directory
#[derive(Debug)]
pub struct PlanBuilder<'a> {
    project_root: PathBuf,
    matcher: &'a PatternMatcher,
    ignore: Option<IgnoreStack>,
}

impl<'a> PlanBuilder<'a> {
    /// `project_root` anchors every path handed to the matcher and the ignore stack.
    pub fn new(project_root: impl Into<PathBuf>, matcher: &'a PatternMatcher) -> Self {
        Self {
            project_root: project_root.into(),
            matcher,
            ignore: None,
        }
    }

    /// Apply gitignore rules; nested `.gitignore` files are added as the walk finds them.
    pub fn with_ignore(mut self, ignore: IgnoreStack) -> Self {
        self.ignore = Some(ignore);
        self
    }

    /// The ignore stack including every nested layer loaded so far
    pub fn ignore_stack(&self) -> Option<&IgnoreStack> {
        self.ignore.as_ref()
    }

    pub fn into_ignore_stack(self) -> Option<IgnoreStack> {
        self.ignore
    }

    pub fn build(&mut self, source_dir: &Path, state: &mut TraversalState) -> Result<SymlinkPlan> {
        require_absolute(source_dir)?;
        require_absolute(&self.project_root)?;

        let prefix = match relative_prefix(&self.project_root, source_dir) {
            Some(prefix) => prefix,
            None => {
                log_plan_debug!(
                    "Source is outside the project root, matching from the source itself",
                    source = display(source_dir.display()),
                    project_root = display(self.project_root.display())
                );
                String::new()
            }
        };

        let plan = self.build_dir(source_dir, &prefix, state)?;
        log_plan_debug!(
            "Plan built",
            source = display(source_dir.display()),
            entries = state.entries()
        );
        Ok(plan)
    }

    fn build_dir(
        &mut self,
        dir: &Path,
        rel_dir: &str,
        state: &mut TraversalState,
    ) -> Result<SymlinkPlan> {
        if let Some(ignore) = self.ignore.as_mut() {
            ignore.push_nested(dir, rel_dir)?;
        }

        let mut plan = SymlinkPlan::default();
        for entry in fs::read_dir(dir).at(dir)? {
            let entry = entry.at(dir)?;
            let name = entry.file_name();
            // file_type() does not follow symlinks; a source symlink is linked, not entered
            let is_dir = entry.file_type().at(&entry.path())?.is_dir();

            if is_dir && name == GIT_DIR {
                continue;
            }

            let rel = join_slash(rel_dir, &name.to_string_lossy());

            if self
                .ignore
                .as_ref()
                .is_some_and(|ignore| ignore.is_ignored(&rel, is_dir))
            {
                if is_dir {
                    log_plan_trace!("Ignored directory linked whole", path = display(&rel));
                    state.count()?;
                    plan.whole_dirs.insert(name);
                } else {
                    log_plan_trace!("Ignored file skipped", path = display(&rel));
                }
                continue;
            }

            match self.matcher.disposition_for(&rel, is_dir) {
                Disposition::Excluded => {
                    log_plan_trace!("Excluded", path = display(&rel));
                }
                Disposition::Included if is_dir => {
                    state.count()?;
                    plan.whole_dirs.insert(name);
                }
                Disposition::Included => {
                    state.count()?;
                    plan.files.insert(name);
                }
                Disposition::Partial { .. } if !is_dir => {
                    state.count()?;
                    plan.files.insert(name);
                }
                Disposition::Partial { inner_patterns } => {
                    log_plan_trace!(
                        "Expanding partial directory",
                        path = display(&rel),
                        patterns = inner_patterns.len()
                    );
                    state.count()?;
                    let nested = self.build_dir(&entry.path(), &rel, state)?;
                    plan.partial_dirs.insert(name, nested);
                }
            }
        }
        Ok(plan)
    }
}
