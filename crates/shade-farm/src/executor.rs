//! Plan execution: turn a [`SymlinkPlan`] into links and real directories.

#[cfg(unix)]
use std::os::unix::fs::symlink;
#[cfg(windows)]
use std::os::windows::fs::{symlink_dir, symlink_file};
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::plan::SymlinkPlan;
use crate::{require_absolute, IoContext, Result};

/// Materialise `plan` under `target_root`, linking back into `source_root`.
///
/// Whole directories and files become symlinks to their absolute source path.
/// Partial directories become real directories and are filled recursively.
/// Every relative path that ends up a symlink is added to `created`, prefixed
/// with `rel_so_far`.
pub fn execute_plan(
    plan: &SymlinkPlan,
    source_root: &Path,
    target_root: &Path,
    rel_so_far: &Path,
    created: &mut BTreeSet<PathBuf>,
) -> Result<()> {
    require_absolute(source_root)?;
    require_absolute(target_root)?;

    for name in &plan.whole_dirs {
        let target = target_root.join(name);
        create_link(&source_root.join(name), &target, true).at(&target)?;
        created.insert(rel_so_far.join(name));
    }

    for name in &plan.files {
        let target = target_root.join(name);
        create_link(&source_root.join(name), &target, false).at(&target)?;
        created.insert(rel_so_far.join(name));
    }

    for (name, nested) in &plan.partial_dirs {
        let target = target_root.join(name);
        match fs::create_dir(&target) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && target.is_dir() => {}
            Err(e) => return Err(e).at(&target),
        }
        execute_plan(
            nested,
            &source_root.join(name),
            &target,
            &rel_so_far.join(name),
            created,
        )?;
    }

    Ok(())
}

/// Create `link` pointing at `original`.
///
/// `is_dir` only matters on Windows, where file and directory links differ.
#[cfg_attr(unix, allow(unused_variables))]
pub(crate) fn create_link(original: &Path, link: &Path, is_dir: bool) -> io::Result<()> {
    #[cfg(unix)]
    {
        symlink(original, link)
    }
    #[cfg(windows)]
    {
        if is_dir {
            symlink_dir(original, link)
        } else {
            symlink_file(original, link)
        }
    }
}
