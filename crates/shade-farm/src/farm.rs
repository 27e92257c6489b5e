//! Farm lifecycle: creation, overlay injection, crash-safe removal and the
//! orphan sweep.
//!
//! A farm is a directory `<temp_base>/shade-farm-<32 hex>` holding a marker
//! file and a filtered mirror of the source tree built from symlinks.
//! Removal renames the directory to `<name>-removing` before deleting it, so a
//! process killed half way leaves a name the next sweep recognises.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use shade_config::path::is_within;
use shade_config::{log_farm_debug, log_farm_info, log_farm_warn};
use shade_config::{log_sweep_debug, log_sweep_warn, Config, SweepConfig};
use tracing::field::display;
use uuid::Uuid;

use crate::executor::{create_link, execute_plan};
use crate::ignore_stack::IgnoreStack;
use crate::matcher::PatternMatcher;
use crate::plan::{PlanBuilder, TraversalState};
use crate::{has_symlinked_ancestor, require_absolute, FarmError, IoContext, Result};

/// Name prefix of every farm directory
pub const FARM_PREFIX: &str = "shade-farm-";

/// Appended to a farm directory name while it is being deleted
pub const REMOVING_SUFFIX: &str = "-removing";

/// Sentinel written at the root of every farm
pub const MARKER_FILE: &str = ".shade-farm";

const MARKER_VERSION: u32 = 1;

/// Contents of [`MARKER_FILE`]
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FarmMarker {
    version: u32,
    pid: u32,
    source_dir: PathBuf,
    created_at: u64,
}

impl FarmMarker {
    fn read(farm_dir: &Path) -> Option<Self> {
        let contents = fs::read(farm_dir.join(MARKER_FILE)).ok()?;
        serde_json::from_slice(&contents).ok()
    }
}

/// Inputs for [`create_farm`]
#[derive(Debug, Clone)]
pub struct FarmOptions {
    /// Root that patterns and ignore rules are relative to (defaults to the source)
    pub project_root: Option<PathBuf>,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    /// Relative paths kept free for overlay files (see [`PatternMatcher::with_reserved`])
    pub reserved: Vec<String>,
    pub max_entries: usize,
    /// Directory the farm is created in
    pub temp_base: PathBuf,
    pub respect_gitignore: bool,
    /// Replaces git's global excludes lookup
    pub global_gitignore: Option<PathBuf>,
}

impl FarmOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            project_root: None,
            include: config.patterns.include.clone(),
            exclude: config.patterns.exclude.clone(),
            reserved: Vec::new(),
            max_entries: config.farm.max_entries,
            temp_base: config.farm.temp_base(),
            respect_gitignore: config.farm.respect_gitignore,
            global_gitignore: config.farm.global_gitignore.clone(),
        }
    }
}

impl Default for FarmOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Result of injecting overlay files
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InjectReport {
    /// Farm-relative paths that now link to an overlay file
    pub injected: Vec<PathBuf>,
    /// Farm-relative paths left alone because they would land on or inside a project link
    pub skipped: Vec<PathBuf>,
}

/// A live farm
#[derive(Debug)]
pub struct Farm {
    path: PathBuf,
    source_dir: PathBuf,
    symlink_roots: BTreeSet<PathBuf>,
    matcher: PatternMatcher,
    ignore: Option<IgnoreStack>,
}

impl Farm {
    /// Absolute path of the farm directory
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    /// Relative paths created as symlinks into the source tree
    pub fn symlink_roots(&self) -> &BTreeSet<PathBuf> {
        &self.symlink_roots
    }

    pub fn matcher(&self) -> &PatternMatcher {
        &self.matcher
    }

    /// Ignore rules used to build the farm, nested layers included
    pub fn ignore_stack(&self) -> Option<&IgnoreStack> {
        self.ignore.as_ref()
    }

    /// Whether `rel` is a source link or lies inside one
    pub fn is_linked(&self, rel: &Path) -> bool {
        rel.ancestors()
            .filter(|a| !a.as_os_str().is_empty())
            .any(|a| self.symlink_roots.contains(a))
    }

    /// Inject overlay files from `overlay_root`, never writing through a source link.
    pub fn inject(&self, overlay_root: &Path, paths: &[PathBuf]) -> Result<InjectReport> {
        let mut report = InjectReport::default();
        let mut allowed = Vec::with_capacity(paths.len());
        for path in paths {
            let rel = overlay_relative(path, overlay_root)?;
            if self.is_linked(&rel) {
                log_farm_warn!(
                    "Overlay file collides with a project link, skipping",
                    path = display(rel.display())
                );
                report.skipped.push(rel);
            } else {
                allowed.push(path.clone());
            }
        }
        let inner = inject_files(&self.path, overlay_root, &allowed)?;
        report.injected.extend(inner.injected);
        report.skipped.extend(inner.skipped);
        Ok(report)
    }

    /// Remove the farm. See [`cleanup_farm`].
    pub fn cleanup(self) -> Result<()> {
        cleanup_farm(&self.path)
    }
}

/// Build a farm for `source_dir` under `options.temp_base`.
///
/// On failure the half-built directory is removed before the error is returned.
pub fn create_farm(source_dir: &Path, options: &FarmOptions) -> Result<Farm> {
    require_absolute(source_dir)?;
    require_absolute(&options.temp_base)?;
    let project_root = options
        .project_root
        .clone()
        .unwrap_or_else(|| source_dir.to_path_buf());
    require_absolute(&project_root)?;

    let matcher =
        PatternMatcher::new(&options.include, &options.exclude)?.with_reserved(&options.reserved);

    fs::create_dir_all(&options.temp_base).at(&options.temp_base)?;
    let path = options
        .temp_base
        .join(format!("{FARM_PREFIX}{}", Uuid::new_v4().simple()));
    fs::create_dir(&path).at(&path)?;

    match populate(&path, source_dir, &project_root, matcher, options) {
        Ok(farm) => {
            log_farm_info!(
                "Farm created",
                path = display(farm.path.display()),
                links = farm.symlink_roots.len()
            );
            Ok(farm)
        }
        Err(e) => {
            if let Err(cleanup_err) = fs::remove_dir_all(&path) {
                log_farm_debug!(
                    "Failed to remove half-built farm",
                    path = display(path.display()),
                    error = display(&cleanup_err)
                );
            }
            Err(e)
        }
    }
}

fn populate(
    path: &Path,
    source_dir: &Path,
    project_root: &Path,
    matcher: PatternMatcher,
    options: &FarmOptions,
) -> Result<Farm> {
    write_marker(path, source_dir)?;

    let ignore = if options.respect_gitignore {
        Some(IgnoreStack::load(
            project_root,
            options.global_gitignore.as_deref(),
        )?)
    } else {
        None
    };

    let mut builder = PlanBuilder::new(project_root, &matcher);
    if let Some(ignore) = ignore {
        builder = builder.with_ignore(ignore);
    }
    let mut state = TraversalState::new(options.max_entries);
    let mut plan = builder.build(source_dir, &mut state)?;
    let ignore = builder.into_ignore_stack();

    // The marker owns its name at the farm root
    if plan.remove(MARKER_FILE) {
        log_farm_debug!("Source entry shadowed by the farm marker", name = MARKER_FILE);
    }

    let mut symlink_roots = BTreeSet::new();
    execute_plan(&plan, source_dir, path, Path::new(""), &mut symlink_roots)?;

    Ok(Farm {
        path: path.to_path_buf(),
        source_dir: source_dir.to_path_buf(),
        symlink_roots,
        matcher,
        ignore,
    })
}

fn write_marker(farm_dir: &Path, source_dir: &Path) -> Result<()> {
    let marker = FarmMarker {
        version: MARKER_VERSION,
        pid: std::process::id(),
        source_dir: source_dir.to_path_buf(),
        created_at: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0),
    };
    let path = farm_dir.join(MARKER_FILE);
    let contents = serde_json::to_vec_pretty(&marker)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
        .at(&path)?;
    fs::write(&path, contents).at(&path)
}

fn overlay_relative(path: &Path, source_dir: &Path) -> Result<PathBuf> {
    require_absolute(path)?;
    let outside = || FarmError::OutsideSource {
        path: path.to_path_buf(),
        source_dir: source_dir.to_path_buf(),
    };
    if !is_within(path, source_dir) {
        return Err(outside());
    }
    match path.strip_prefix(source_dir) {
        Ok(rel) if !rel.as_os_str().is_empty() => Ok(rel.to_path_buf()),
        _ => Err(outside()),
    }
}

/// Link each absolute path in `paths` into the farm at its position relative
/// to `source_dir`.
///
/// A path outside `source_dir` is a caller bug and fails the whole call. A
/// destination that already exists is left as is. A destination below a
/// symlink in the farm is skipped, since creating it would write into the
/// linked tree.
pub fn inject_files(farm_dir: &Path, source_dir: &Path, paths: &[PathBuf]) -> Result<InjectReport> {
    require_absolute(farm_dir)?;
    require_absolute(source_dir)?;

    let mut report = InjectReport::default();
    for path in paths {
        let rel = overlay_relative(path, source_dir)?;
        if has_symlinked_ancestor(farm_dir, &rel) {
            log_farm_warn!(
                "Overlay file would land inside a linked directory, skipping",
                path = display(rel.display())
            );
            report.skipped.push(rel);
            continue;
        }

        let dest = farm_dir.join(&rel);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).at(parent)?;
        }
        match create_link(path, &dest, path.is_dir()) {
            Ok(()) => {
                log_farm_debug!("Injected overlay file", path = display(rel.display()));
                report.injected.push(rel);
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                log_farm_debug!("Overlay destination exists", path = display(rel.display()));
            }
            Err(e) => return Err(e).at(&dest),
        }
    }
    Ok(report)
}

/// `<dir>-removing`
fn removing_path(dir: &Path) -> PathBuf {
    let mut name = dir.as_os_str().to_owned();
    name.push(REMOVING_SUFFIX);
    PathBuf::from(name)
}

/// Remove a farm: rename it to its `-removing` name, then delete that.
///
/// A farm that is already gone counts as removed, so calling this twice is fine.
pub fn cleanup_farm(farm_dir: &Path) -> Result<()> {
    require_absolute(farm_dir)?;
    let removing = removing_path(farm_dir);
    match fs::rename(farm_dir, &removing) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            log_farm_debug!("Farm already removed", path = display(farm_dir.display()));
            return Ok(());
        }
        Err(e) => return Err(e).at(farm_dir),
    }
    remove_tree(&removing)?;
    log_farm_debug!("Farm removed", path = display(farm_dir.display()));
    Ok(())
}

/// Remove a farm directory named by a user.
///
/// Refuses anything that does not carry [`FARM_PREFIX`] and either a marker
/// file or the [`REMOVING_SUFFIX`] of an interrupted removal.
pub fn clean_farm_dir(dir: &Path) -> Result<()> {
    require_absolute(dir)?;
    let name = dir.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    let is_dir = fs::symlink_metadata(dir).is_ok_and(|m| m.is_dir());
    if !is_dir || !name.starts_with(FARM_PREFIX) {
        return Err(FarmError::NotAFarm {
            path: dir.to_path_buf(),
        });
    }
    if name.ends_with(REMOVING_SUFFIX) {
        return remove_tree(dir);
    }
    if !dir.join(MARKER_FILE).is_file() {
        return Err(FarmError::NotAFarm {
            path: dir.to_path_buf(),
        });
    }
    log_farm_info!("Removing farm", path = display(dir.display()));
    cleanup_farm(dir)
}

/// Delete a directory tree without following symlinks; a missing tree is fine.
fn remove_tree(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).at(dir),
    }
}

/// Age thresholds for [`sweep_orphans`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepPolicy {
    /// `-removing` directories older than this are deleted
    pub removing_max_age: Duration,
    /// Farms older than this, with no live owner, are removed
    pub farm_max_age: Duration,
    /// Farms older than this are removed even if their pid is running
    pub owner_max_age: Duration,
    /// Report what would be removed without touching anything
    pub dry_run: bool,
}

impl SweepPolicy {
    pub fn from_config(config: &SweepConfig) -> Self {
        Self {
            removing_max_age: config.removing_max_age(),
            farm_max_age: config.farm_max_age(),
            owner_max_age: config.owner_max_age(),
            dry_run: false,
        }
    }
}

impl Default for SweepPolicy {
    fn default() -> Self {
        Self::from_config(&SweepConfig::default())
    }
}

/// What a sweep did
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    /// Interrupted removals that were finished
    pub finished: Vec<PathBuf>,
    /// Abandoned farms that were removed
    pub removed: Vec<PathBuf>,
    /// Farm directories left alone (too young, owner alive, or not ours)
    pub kept: Vec<PathBuf>,
    /// Entries that could not be removed
    pub failed: Vec<(PathBuf, String)>,
}

impl SweepReport {
    pub fn reclaimed(&self) -> usize {
        self.finished.len() + self.removed.len()
    }
}

/// Reclaim farms under `temp_base` left behind by crashed or killed processes.
///
/// Only directories named with [`FARM_PREFIX`] are considered. A farm whose
/// marker is unreadable is reclaimed only if its name is one this crate
/// generates. A recorded pid protects a farm until `owner_max_age`, after
/// which the pid is assumed to have been reused. Failures on individual
/// entries are collected in the report.
pub fn sweep_orphans(temp_base: &Path, policy: &SweepPolicy) -> Result<SweepReport> {
    require_absolute(temp_base)?;
    let mut report = SweepReport::default();

    let entries = match fs::read_dir(temp_base) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(report),
        Err(e) => return Err(e).at(temp_base),
    };

    let now = SystemTime::now();
    for entry in entries {
        let entry = entry.at(temp_base)?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with(FARM_PREFIX) {
            continue;
        }
        let path = entry.path();
        let metadata = match fs::symlink_metadata(&path) {
            Ok(m) if m.is_dir() => m,
            _ => continue,
        };
        let age = metadata
            .modified()
            .ok()
            .and_then(|mtime| now.duration_since(mtime).ok())
            .unwrap_or(Duration::ZERO);

        if name.ends_with(REMOVING_SUFFIX) {
            if age < policy.removing_max_age {
                report.kept.push(path);
                continue;
            }
            log_sweep_debug!("Finishing interrupted removal", path = display(path.display()));
            if policy.dry_run {
                report.finished.push(path);
            } else {
                match remove_tree(&path) {
                    Ok(()) => report.finished.push(path),
                    Err(e) => record_failure(&mut report, path, e),
                }
            }
            continue;
        }

        if age < policy.farm_max_age {
            report.kept.push(path);
            continue;
        }
        match FarmMarker::read(&path) {
            Some(marker) if age < policy.owner_max_age && owner_alive(marker.pid) => {
                report.kept.push(path);
                continue;
            }
            Some(marker) => log_sweep_debug!(
                "Removing abandoned farm",
                path = display(path.display()),
                pid = marker.pid
            ),
            None if is_farm_name(name) => {
                log_sweep_debug!("Removing unmarked farm", path = display(path.display()))
            }
            None => {
                log_sweep_debug!("No farm marker, leaving alone", path = display(path.display()));
                report.kept.push(path);
                continue;
            }
        }

        if policy.dry_run {
            report.removed.push(path);
        } else {
            match cleanup_farm(&path) {
                Ok(()) => report.removed.push(path),
                Err(e) => record_failure(&mut report, path, e),
            }
        }
    }

    Ok(report)
}

/// Whether `name` is exactly a generated farm name: the prefix and 32 hex digits
fn is_farm_name(name: &str) -> bool {
    name.strip_prefix(FARM_PREFIX)
        .is_some_and(|id| id.len() == 32 && id.bytes().all(|b| b.is_ascii_hexdigit()))
}

fn record_failure(report: &mut SweepReport, path: PathBuf, error: FarmError) {
    log_sweep_warn!(
        "Failed to remove orphaned farm",
        path = display(path.display()),
        error = display(&error)
    );
    report.failed.push((path, error.to_string()));
}

/// Whether the process that created a farm still runs
fn owner_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    if pid == std::process::id() {
        return true;
    }
    #[cfg(unix)]
    {
        let Ok(pid) = i32::try_from(pid) else {
            return false;
        };
        // SAFETY: signal 0 only checks for existence and permission
        let rc = unsafe { libc::kill(pid, 0) };
        rc == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }
    #[cfg(not(unix))]
    {
        false
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use filetime::{set_file_mtime, FileTime};
    use tempfile::tempdir;

    fn options(temp_base: &Path) -> FarmOptions {
        FarmOptions {
            temp_base: temp_base.to_path_buf(),
            global_gitignore: Some(temp_base.join("no-global")),
            ..FarmOptions::default()
        }
    }

    fn age(path: &Path, secs: i64) {
        let then = FileTime::from_unix_time(FileTime::now().unix_seconds() - secs, 0);
        set_file_mtime(path, then).unwrap();
    }

    fn fake_farm(temp_base: &Path, name: &str, pid: u32) -> PathBuf {
        let dir = temp_base.join(name);
        fs::create_dir_all(&dir).unwrap();
        let marker = FarmMarker {
            version: MARKER_VERSION,
            pid,
            source_dir: PathBuf::from("/project"),
            created_at: 0,
        };
        fs::write(dir.join(MARKER_FILE), serde_json::to_vec(&marker).unwrap()).unwrap();
        dir
    }

    #[test]
    fn test_create_farm_writes_marker_and_links() {
        let temp = tempdir().unwrap();
        let source = temp.path().join("project");
        let base = temp.path().join("tmp");
        fs::create_dir_all(source.join("src")).unwrap();
        fs::write(source.join("src/main.rs"), "fn main() {}").unwrap();

        let farm = create_farm(&source, &options(&base)).unwrap();
        let name = farm.path().file_name().unwrap().to_str().unwrap().to_string();
        assert!(name.starts_with(FARM_PREFIX));
        let suffix = &name[FARM_PREFIX.len()..];
        assert_eq!(suffix.len(), 32);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));

        let marker = FarmMarker::read(farm.path()).unwrap();
        assert_eq!(marker.pid, std::process::id());
        assert_eq!(marker.source_dir, source);
        assert!(farm.symlink_roots().contains(Path::new("src")));
        assert_eq!(
            fs::read_to_string(farm.path().join("src/main.rs")).unwrap(),
            "fn main() {}"
        );
    }

    #[test]
    fn test_failed_creation_leaves_nothing_behind() {
        let temp = tempdir().unwrap();
        let source = temp.path().join("project");
        let base = temp.path().join("tmp");
        fs::create_dir_all(&source).unwrap();
        for i in 0..5 {
            fs::write(source.join(format!("f{i}")), "x").unwrap();
        }

        let opts = FarmOptions {
            max_entries: 2,
            ..options(&base)
        };
        let err = create_farm(&source, &opts).unwrap_err();
        assert!(matches!(err, FarmError::TooManyEntries { limit: 2 }));
        assert_eq!(fs::read_dir(&base).unwrap().count(), 0);
    }

    #[test]
    fn test_relative_paths_are_rejected() {
        let err = create_farm(Path::new("project"), &FarmOptions::default()).unwrap_err();
        assert!(matches!(err, FarmError::RelativePath { .. }));
        assert!(matches!(
            cleanup_farm(Path::new("farm")),
            Err(FarmError::RelativePath { .. })
        ));
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let temp = tempdir().unwrap();
        let source = temp.path().join("project");
        let base = temp.path().join("tmp");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("keep.txt"), "keep").unwrap();

        let farm = create_farm(&source, &options(&base)).unwrap();
        let path = farm.path().to_path_buf();
        cleanup_farm(&path).unwrap();
        cleanup_farm(&path).unwrap();
        assert!(!path.exists());
        assert!(!removing_path(&path).exists());
        // Links were removed, not their targets
        assert_eq!(fs::read_to_string(source.join("keep.txt")).unwrap(), "keep");
    }

    #[test]
    fn test_sweep_finishes_interrupted_removal() {
        let temp = tempdir().unwrap();
        let base = temp.path();
        let farm = fake_farm(base, "shade-farm-0123456789abcdef0123456789abcdef", 0);
        // Simulate a kill between rename and delete
        let removing = removing_path(&farm);
        fs::rename(&farm, &removing).unwrap();

        let policy = SweepPolicy::default();
        let report = sweep_orphans(base, &policy).unwrap();
        assert!(removing.exists(), "fresh removals are left alone");
        assert_eq!(report.kept, vec![removing.clone()]);

        age(&removing, 2 * 60 * 60);
        let report = sweep_orphans(base, &policy).unwrap();
        assert_eq!(report.finished, vec![removing.clone()]);
        assert!(!removing.exists());
    }

    fn farm_name(id: u8) -> String {
        format!("{FARM_PREFIX}{}", format!("{id:02x}").repeat(16))
    }

    #[test]
    fn test_sweep_removes_only_old_unowned_farms() {
        let temp = tempdir().unwrap();
        let base = temp.path();
        let dead_pid = i32::MAX as u32;
        let old = fake_farm(base, &farm_name(1), dead_pid);
        let young = fake_farm(base, &farm_name(2), dead_pid);
        let live = fake_farm(base, &farm_name(3), std::process::id());
        let unrelated = base.join("other-dir");
        fs::create_dir_all(&unrelated).unwrap();
        for dir in [&old, &live, &unrelated] {
            age(dir, 3 * 24 * 60 * 60);
        }

        let report = sweep_orphans(base, &SweepPolicy::default()).unwrap();
        assert_eq!(report.removed, vec![old.clone()]);
        assert!(!old.exists());
        assert!(young.exists());
        assert!(live.exists());
        assert!(unrelated.exists());
        assert!(report.failed.is_empty());
    }

    #[test]
    fn test_sweep_reclaims_unmarked_farms_by_name() {
        let temp = tempdir().unwrap();
        let base = temp.path();
        // Killed before the marker was written
        let unmarked = base.join(farm_name(4));
        fs::create_dir_all(unmarked.join("src")).unwrap();
        let fresh = base.join(farm_name(5));
        fs::create_dir_all(&fresh).unwrap();
        let foreign = base.join(format!("{FARM_PREFIX}foreign"));
        fs::create_dir_all(&foreign).unwrap();
        let short = base.join(format!("{FARM_PREFIX}{}", "ab".repeat(15)));
        fs::create_dir_all(&short).unwrap();
        for dir in [&unmarked, &foreign, &short] {
            age(dir, 3 * 24 * 60 * 60);
        }

        let report = sweep_orphans(base, &SweepPolicy::default()).unwrap();
        assert_eq!(report.removed, vec![unmarked.clone()]);
        assert!(!unmarked.exists());
        assert!(fresh.exists());
        assert!(foreign.exists());
        assert!(short.exists());
    }

    #[test]
    fn test_sweep_stops_trusting_old_pids() {
        let temp = tempdir().unwrap();
        let base = temp.path();
        // The pid is running, but after this long it belongs to someone else
        let stale = fake_farm(base, &farm_name(6), std::process::id());
        age(&stale, 8 * 24 * 60 * 60);
        let recent = fake_farm(base, &farm_name(7), std::process::id());
        age(&recent, 2 * 24 * 60 * 60);

        let report = sweep_orphans(base, &SweepPolicy::default()).unwrap();
        assert_eq!(report.removed, vec![stale.clone()]);
        assert!(!stale.exists());
        assert!(recent.exists());
    }

    #[test]
    fn test_sweep_dry_run_touches_nothing() {
        let temp = tempdir().unwrap();
        let base = temp.path();
        let old = fake_farm(base, &farm_name(8), i32::MAX as u32);
        age(&old, 3 * 24 * 60 * 60);

        let policy = SweepPolicy {
            dry_run: true,
            ..SweepPolicy::default()
        };
        let report = sweep_orphans(base, &policy).unwrap();
        assert_eq!(report.removed, vec![old.clone()]);
        assert!(old.exists());
    }

    #[test]
    fn test_sweep_of_missing_base_is_empty() {
        let temp = tempdir().unwrap();
        let report = sweep_orphans(&temp.path().join("absent"), &SweepPolicy::default()).unwrap();
        assert_eq!(report.reclaimed(), 0);
    }

    #[test]
    fn test_inject_files() {
        let temp = tempdir().unwrap();
        let farm = temp.path().join("farm");
        let profile = temp.path().join("profile");
        fs::create_dir_all(&farm).unwrap();
        fs::create_dir_all(profile.join(".opencode/agent")).unwrap();
        let agent = profile.join(".opencode/agent/review.md");
        fs::write(&agent, "review").unwrap();

        let report = inject_files(&farm, &profile, &[agent.clone()]).unwrap();
        assert_eq!(report.injected, vec![PathBuf::from(".opencode/agent/review.md")]);
        assert_eq!(fs::read_link(farm.join(".opencode/agent/review.md")).unwrap(), agent);

        // Second injection is a no-op
        let report = inject_files(&farm, &profile, &[agent.clone()]).unwrap();
        assert!(report.injected.is_empty());
        assert!(report.skipped.is_empty());

        let outside = temp.path().join("elsewhere.md");
        let err = inject_files(&farm, &profile, &[outside]).unwrap_err();
        assert!(matches!(err, FarmError::OutsideSource { .. }));

        let sneaky = profile.join("../escape.md");
        let err = inject_files(&farm, &profile, &[sneaky]).unwrap_err();
        assert!(matches!(err, FarmError::OutsideSource { .. }));
    }

    #[test]
    fn test_inject_never_writes_through_a_link() {
        let temp = tempdir().unwrap();
        let source = temp.path().join("project");
        let profile = temp.path().join("profile");
        let base = temp.path().join("tmp");
        fs::create_dir_all(source.join(".opencode")).unwrap();
        fs::write(source.join(".opencode/config.json"), "{}").unwrap();
        fs::create_dir_all(profile.join(".opencode")).unwrap();
        let overlay = profile.join(".opencode/AGENTS.md");
        fs::write(&overlay, "agents").unwrap();

        let farm = create_farm(&source, &options(&base)).unwrap();
        let report = farm.inject(&profile, &[overlay]).unwrap();
        assert_eq!(report.skipped, vec![PathBuf::from(".opencode/AGENTS.md")]);
        assert!(!source.join(".opencode/AGENTS.md").exists());
    }

    #[test]
    fn test_clean_farm_dir_refuses_other_directories() {
        let temp = tempdir().unwrap();
        let base = temp.path();

        let plain = base.join("project");
        fs::create_dir_all(&plain).unwrap();
        let err = clean_farm_dir(&plain).unwrap_err();
        assert!(matches!(err, FarmError::NotAFarm { .. }));

        let unmarked = base.join(format!("{FARM_PREFIX}unmarked"));
        fs::create_dir_all(&unmarked).unwrap();
        assert!(matches!(
            clean_farm_dir(&unmarked).unwrap_err(),
            FarmError::NotAFarm { .. }
        ));
        assert!(unmarked.exists());

        let farm = fake_farm(base, &format!("{FARM_PREFIX}live"), 1);
        clean_farm_dir(&farm).unwrap();
        assert!(!farm.exists());

        let half = base.join(format!("{FARM_PREFIX}half{REMOVING_SUFFIX}"));
        fs::create_dir_all(half.join("nested")).unwrap();
        clean_farm_dir(&half).unwrap();
        assert!(!half.exists());
    }
}
