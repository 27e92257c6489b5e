//! Live sync of edits made inside a farm back into the project.
//!
//! A background thread receives `notify` events for the farm, waits for each
//! path to settle, then looks at what is on disk and mirrors it:
//!
//! - regular files are copied into the project and remembered as ours;
//! - new directories are created in the project, their contents copied;
//! - a vanished file is deleted from the project only if we copied it;
//! - a vanished directory is removed from the project only if empty.
//!
//! Symlinks, and anything below one, already live in the project and are never
//! touched. Failures are collected on the [`SyncHandle`], never raised.

use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{self as channel, Receiver, Sender};
use globset::{GlobSet, GlobSetBuilder};
use notify::event::{AccessKind, AccessMode, ModifyKind, RemoveKind};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use shade_config::path::{normalize_or_original, to_slash};
use shade_config::{log_sync_debug, log_sync_info, log_sync_warn, SyncConfig};
use tracing::field::{debug, display};
use walkdir::WalkDir;

use crate::farm::MARKER_FILE;
use crate::ignore_stack::IgnoreStack;
use crate::matcher::{Disposition, PatternMatcher};
use crate::{has_symlinked_ancestor, require_absolute, FarmError, IoContext, Result, GIT_DIR};

/// Idle wait when nothing is pending
const IDLE_WAIT: Duration = Duration::from_secs(3600);

/// Filters and timing for [`start_sync`]
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Quiet period before a changed path is mirrored
    pub settle: Duration,
    /// File-name globs that are never synced
    pub junk_patterns: Vec<String>,
    /// Project ignore rules; ignored paths are never synced
    pub ignore: Option<IgnoreStack>,
    /// Farm patterns; paths they exclude are never synced
    pub matcher: Option<PatternMatcher>,
    /// Farm-relative paths that are links into the project
    pub link_roots: Vec<PathBuf>,
}

impl SyncOptions {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            settle: config.settle(),
            junk_patterns: config.junk_patterns.clone(),
            ignore: None,
            matcher: None,
            link_roots: Vec::new(),
        }
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

/// Kind of operation that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOp {
    Copy,
    Remove,
    CreateDir,
    RemoveDir,
    /// The watcher itself reported an error
    Watch,
}

/// One failed sync operation
#[derive(Debug, Clone)]
pub struct SyncFailure {
    pub op: SyncOp,
    /// Project-relative path, or the farm root for watcher errors
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug, Default)]
struct Shared {
    failures: Mutex<Vec<SyncFailure>>,
    synced: Mutex<HashSet<PathBuf>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn fail(&self, op: SyncOp, path: &Path, error: impl std::fmt::Display) {
        log_sync_warn!(
            "Sync operation failed",
            op = debug(op),
            path = display(path.display()),
            error = display(&error)
        );
        lock(&self.failures).push(SyncFailure {
            op,
            path: path.to_path_buf(),
            error: error.to_string(),
        });
    }
}

/// Handle to a running watcher
pub struct SyncHandle {
    watcher: Option<RecommendedWatcher>,
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
    shared: Arc<Shared>,
}

impl SyncHandle {
    /// Stop watching. Pending changes are flushed before this returns.
    pub fn close(&mut self) {
        // Releases the OS watches and disconnects the event channel
        drop(self.watcher.take());
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                self.shared
                    .fail(SyncOp::Watch, Path::new(""), "sync thread panicked");
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.thread.is_none()
    }

    /// Failures recorded so far
    pub fn failures(&self) -> Vec<SyncFailure> {
        lock(&self.shared.failures).clone()
    }

    /// Number of project paths currently owned by the watcher
    pub fn synced_count(&self) -> usize {
        lock(&self.shared.synced).len()
    }

    /// Project-relative paths currently owned by the watcher, sorted
    pub fn synced_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<_> = lock(&self.shared.synced).iter().cloned().collect();
        paths.sort();
        paths
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for SyncHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncHandle")
            .field("closed", &self.is_closed())
            .field("synced", &self.synced_count())
            .finish()
    }
}

/// Watch `farm_dir` and mirror edits into `project_dir`.
///
/// `excluded_overlay_paths` are farm-relative paths of injected files; they
/// and anything below them are never synced.
pub fn start_sync(
    farm_dir: &Path,
    project_dir: &Path,
    excluded_overlay_paths: impl IntoIterator<Item = PathBuf>,
    options: SyncOptions,
) -> Result<SyncHandle> {
    require_absolute(farm_dir)?;
    require_absolute(project_dir)?;

    let junk = compile_junk(&options.junk_patterns)?;
    let shared = Arc::new(Shared::default());
    let syncer = Syncer {
        farm_roots: farm_roots(farm_dir),
        farm: farm_dir.to_path_buf(),
        project: project_dir.to_path_buf(),
        overlay: excluded_overlay_paths.into_iter().collect(),
        links: RefCell::new(options.link_roots.into_iter().collect()),
        junk,
        ignore: options.ignore,
        matcher: options.matcher,
        shared: Arc::clone(&shared),
    };

    let (event_tx, event_rx) = channel::unbounded();
    let (stop_tx, stop_rx) = channel::bounded(1);

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| {
            let _ = event_tx.send(res);
        },
        notify::Config::default(),
    )?;
    watcher.watch(farm_dir, RecursiveMode::Recursive)?;

    let settle = options.settle;
    let thread = thread::Builder::new()
        .name("shade-sync".to_string())
        .spawn(move || syncer.run(event_rx, stop_rx, settle))
        .at(farm_dir)?;

    log_sync_info!(
        "Live sync started",
        farm = display(farm_dir.display()),
        project = display(project_dir.display())
    );

    Ok(SyncHandle {
        watcher: Some(watcher),
        stop_tx: Some(stop_tx),
        thread: Some(thread),
        shared,
    })
}

pub(crate) fn compile_junk(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = globset::Glob::new(pattern).map_err(|source| FarmError::InvalidPattern {
            pattern: pattern.clone(),
            source,
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|source| FarmError::InvalidPattern {
        pattern: patterns.join(", "),
        source,
    })
}

/// The farm path as given plus its canonical form (event paths may use either)
fn farm_roots(farm_dir: &Path) -> Vec<PathBuf> {
    let canonical = normalize_or_original(farm_dir);
    if canonical == farm_dir {
        vec![farm_dir.to_path_buf()]
    } else {
        vec![farm_dir.to_path_buf(), canonical]
    }
}

/// Whether an event can change what the farm holds
fn is_relevant(kind: &EventKind) -> bool {
    match kind {
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => true,
        EventKind::Access(_) | EventKind::Other => false,
        // Our own reads and copies would otherwise feed back in
        EventKind::Modify(ModifyKind::Metadata(_)) => false,
        _ => true,
    }
}

/// What the watcher said a removed path was
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Removed {
    File,
    Dir,
}

fn removed_kind(kind: &EventKind) -> Option<Removed> {
    match kind {
        EventKind::Remove(RemoveKind::File) => Some(Removed::File),
        EventKind::Remove(RemoveKind::Folder) => Some(Removed::Dir),
        _ => None,
    }
}

/// A changed path waiting to settle
struct Pending {
    seen: Instant,
    removed: Option<Removed>,
}

/// What a settled farm path turned out to be
enum Found {
    Link,
    UnderLink,
    File,
    Dir,
    Gone,
}

struct Syncer {
    farm: PathBuf,
    farm_roots: Vec<PathBuf>,
    project: PathBuf,
    overlay: HashSet<PathBuf>,
    /// Link roots known from the farm plus links seen since; never synced
    links: RefCell<HashSet<PathBuf>>,
    junk: GlobSet,
    ignore: Option<IgnoreStack>,
    matcher: Option<PatternMatcher>,
    shared: Arc<Shared>,
}

impl Syncer {
    fn run(
        self,
        event_rx: Receiver<notify::Result<Event>>,
        stop_rx: Receiver<()>,
        settle: Duration,
    ) {
        let mut pending: HashMap<PathBuf, Pending> = HashMap::new();

        loop {
            let now = Instant::now();
            let timeout = pending
                .values()
                .map(|p| p.seen)
                .min()
                .map(|oldest| (oldest + settle).saturating_duration_since(now))
                .unwrap_or(IDLE_WAIT);

            channel::select! {
                recv(stop_rx) -> _ => {
                    for res in event_rx.try_iter() {
                        self.note(res, &mut pending);
                    }
                    self.flush(&mut pending, None);
                    break;
                }
                recv(event_rx) -> msg => {
                    let Ok(res) = msg else {
                        self.flush(&mut pending, None);
                        break;
                    };
                    self.note(res, &mut pending);
                }
                recv(channel::after(timeout)) -> _ => {}
            }

            let cutoff = Instant::now().checked_sub(settle);
            self.flush(&mut pending, Some(cutoff.unwrap_or_else(Instant::now)));
        }

        log_sync_debug!("Live sync stopped", farm = display(self.farm.display()));
    }

    fn note(&self, res: notify::Result<Event>, pending: &mut HashMap<PathBuf, Pending>) {
        match res {
            Ok(event) => {
                if !is_relevant(&event.kind) {
                    return;
                }
                let seen = Instant::now();
                let removed = removed_kind(&event.kind);
                for path in &event.paths {
                    if let Some(rel) = self.relative(path) {
                        pending.insert(rel, Pending { seen, removed });
                    }
                }
            }
            Err(e) => {
                let path = e.paths.first().cloned().unwrap_or_else(|| self.farm.clone());
                self.shared.fail(SyncOp::Watch, &path, e);
            }
        }
    }

    /// Apply every pending path last touched at or before `cutoff` (all if `None`).
    fn flush(&self, pending: &mut HashMap<PathBuf, Pending>, cutoff: Option<Instant>) {
        let mut due: Vec<(PathBuf, Option<Removed>)> = Vec::new();
        pending.retain(|rel, p| {
            if cutoff.map_or(true, |cutoff| p.seen <= cutoff) {
                due.push((rel.clone(), p.removed));
                false
            } else {
                true
            }
        });
        // Children before parents, so emptied directories can go
        due.sort_by_key(|(rel, _)| Reverse(rel.components().count()));
        for (rel, removed) in due {
            self.apply(&rel, removed);
        }
    }

    fn relative(&self, path: &Path) -> Option<PathBuf> {
        self.farm_roots
            .iter()
            .find_map(|root| path.strip_prefix(root).ok())
            .filter(|rel| !rel.as_os_str().is_empty())
            .map(Path::to_path_buf)
    }

    fn inspect(&self, rel: &Path) -> io::Result<Found> {
        let path = self.farm.join(rel);
        match fs::symlink_metadata(&path) {
            Ok(m) if m.file_type().is_symlink() => Ok(Found::Link),
            Ok(_) if has_symlinked_ancestor(&self.farm, rel) => Ok(Found::UnderLink),
            Ok(m) if m.is_dir() => Ok(Found::Dir),
            Ok(_) => Ok(Found::File),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Found::Gone),
            Err(e) => Err(e),
        }
    }

    /// Whether `rel` is, or lies below, a link the farm holds or held
    fn is_known_link(&self, rel: &Path) -> bool {
        let links = self.links.borrow();
        rel.ancestors()
            .filter(|a| !a.as_os_str().is_empty())
            .any(|a| links.contains(a))
    }

    fn apply(&self, rel: &Path, removed: Option<Removed>) {
        let found = match self.inspect(rel) {
            Ok(found) => found,
            Err(e) => {
                self.shared.fail(SyncOp::Copy, rel, e);
                return;
            }
        };
        let is_dir = match found {
            Found::Link => {
                self.links.borrow_mut().insert(rel.to_path_buf());
                return;
            }
            Found::UnderLink => return,
            Found::Dir | Found::File => {
                // Something real now sits where a link used to be
                self.links.borrow_mut().remove(rel);
                matches!(found, Found::Dir)
            }
            // A vanished link leaves the project alone, whatever it pointed at
            Found::Gone if self.is_known_link(rel) => return,
            Found::Gone => match removed {
                Some(Removed::Dir) => true,
                Some(Removed::File) => false,
                None => self.project.join(rel).is_dir(),
            },
        };
        if self.is_skipped(rel, is_dir) {
            log_sync_debug!("Not synced", path = display(rel.display()));
            return;
        }

        match found {
            Found::File => self.copy_file(rel),
            Found::Dir => self.sync_dir(rel),
            Found::Gone => self.remove(rel, is_dir),
            Found::Link | Found::UnderLink => {}
        }
    }

    fn is_skipped(&self, rel: &Path, is_dir: bool) -> bool {
        if rel.components().next().is_some_and(|c| c.as_os_str() == GIT_DIR) {
            return true;
        }
        if rel == Path::new(MARKER_FILE) {
            return true;
        }
        if rel.ancestors().any(|a| self.overlay.contains(a)) {
            return true;
        }
        if rel
            .file_name()
            .is_some_and(|name| self.junk.is_match(Path::new(name)))
        {
            return true;
        }

        let slash = to_slash(rel);
        if self
            .ignore
            .as_ref()
            .is_some_and(|ignore| ignore.is_ignored_path_or_parents(&slash, is_dir))
        {
            return true;
        }
        if let Some(matcher) = &self.matcher {
            let mut end = 0;
            while let Some(pos) = slash[end..].find('/') {
                if matcher.disposition_for(&slash[..end + pos], true) == Disposition::Excluded {
                    return true;
                }
                end += pos + 1;
            }
            if matcher.disposition_for(&slash, is_dir) == Disposition::Excluded {
                return true;
            }
        }
        false
    }

    fn copy_file(&self, rel: &Path) {
        let src = self.farm.join(rel);
        let dest = self.project.join(rel);
        if let Some(parent) = dest.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                self.shared.fail(SyncOp::CreateDir, rel, e);
                return;
            }
        }
        match fs::copy(&src, &dest) {
            Ok(bytes) => {
                log_sync_debug!("Synced file", path = display(rel.display()), bytes = bytes);
                lock(&self.shared.synced).insert(rel.to_path_buf());
            }
            // Gone again before we got to it; the removal event follows
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => self.shared.fail(SyncOp::Copy, rel, e),
        }
    }

    fn create_dir(&self, rel: &Path) -> bool {
        match fs::create_dir(self.project.join(rel)) {
            Ok(()) => {
                lock(&self.shared.synced).insert(rel.to_path_buf());
                true
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => true,
            Err(e) => {
                self.shared.fail(SyncOp::CreateDir, rel, e);
                false
            }
        }
    }

    /// Create the directory, then bring over whatever was moved or written into it.
    fn sync_dir(&self, rel: &Path) {
        if let Some(parent) = self.project.join(rel).parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                self.shared.fail(SyncOp::CreateDir, rel, e);
                return;
            }
        }
        if !self.create_dir(rel) {
            return;
        }

        let root = self.farm.join(rel);
        let walker = WalkDir::new(&root)
            .min_depth(1)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                let Ok(child) = entry.path().strip_prefix(&self.farm) else {
                    return false;
                };
                !entry.path_is_symlink() && !self.is_skipped(child, entry.file_type().is_dir())
            });
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    self.shared.fail(SyncOp::Copy, rel, e);
                    continue;
                }
            };
            let Ok(child) = entry.path().strip_prefix(&self.farm) else {
                continue;
            };
            if entry.file_type().is_dir() {
                self.create_dir(child);
            } else {
                self.copy_file(child);
            }
        }
    }

    fn remove(&self, rel: &Path, is_dir: bool) {
        let dest = self.project.join(rel);
        if is_dir {
            self.remove_dir(rel);
            return;
        }

        if dest.is_dir() || !lock(&self.shared.synced).remove(rel) {
            log_sync_debug!("Not ours, left in place", path = display(rel.display()));
            return;
        }
        match fs::remove_file(&dest) {
            Ok(()) => log_sync_debug!("Removed file", path = display(rel.display())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                self.shared.fail(SyncOp::Remove, rel, e);
                return;
            }
        }

        // Directories we created and that are gone from the farm go too
        for parent in rel.ancestors().skip(1) {
            if parent.as_os_str().is_empty()
                || !lock(&self.shared.synced).contains(parent)
                || self.farm.join(parent).exists()
            {
                break;
            }
            if !self.remove_dir(parent) {
                break;
            }
        }
    }

    /// Remove an empty project directory. Returns whether it is gone.
    fn remove_dir(&self, rel: &Path) -> bool {
        match fs::remove_dir(self.project.join(rel)) {
            Ok(()) => {
                lock(&self.shared.synced).remove(rel);
                log_sync_debug!("Removed directory", path = display(rel.display()));
                true
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                lock(&self.shared.synced).remove(rel);
                true
            }
            Err(e) if e.kind() == io::ErrorKind::DirectoryNotEmpty => false,
            Err(e) => {
                self.shared.fail(SyncOp::RemoveDir, rel, e);
                false
            }
        }
    }
}
