//! One farm from open to close: sweep, create, inject, sync, clean up.

use std::path::{Path, PathBuf};

use shade_config::path::relative_prefix;
use shade_config::{log_farm_info, log_farm_warn, log_sweep_debug, log_sweep_warn, Config};
use tracing::field::display;

use crate::farm::{create_farm, sweep_orphans, Farm, FarmOptions, InjectReport, SweepPolicy};
use crate::profile::Profile;
use crate::sync::{start_sync, SyncFailure, SyncHandle, SyncOptions};
use crate::{require_absolute, Result};

/// Summary returned by [`FarmSession::close`]
#[derive(Debug, Clone, Default)]
pub struct SessionReport {
    /// Project paths the watcher owned at close
    pub synced: usize,
    pub failures: Vec<SyncFailure>,
    /// Overlay files that were not injected because a project link was in the way
    pub skipped_injections: Vec<PathBuf>,
}

/// A farm for a project, with its overlay and live sync
#[derive(Debug)]
pub struct FarmSession {
    project_dir: PathBuf,
    farm: Option<Farm>,
    sync: Option<SyncHandle>,
    injected: InjectReport,
}

impl FarmSession {
    /// Create a farm for `project_dir`, overlay `profile` and start syncing.
    pub fn open(project_dir: &Path, profile: Option<&Profile>, config: &Config) -> Result<Self> {
        require_absolute(project_dir)?;

        let temp_base = config.farm.temp_base();
        if config.sweep.enabled {
            match sweep_orphans(&temp_base, &SweepPolicy::from_config(&config.sweep)) {
                Ok(report) => log_sweep_debug!(
                    "Swept temp base",
                    reclaimed = report.reclaimed(),
                    failed = report.failed.len()
                ),
                Err(e) => log_sweep_warn!("Orphan sweep failed", error = display(&e)),
            }
        }

        let mut options = FarmOptions::from_config(config);
        options.project_root = Some(project_dir.to_path_buf());
        if let Some(profile) = profile {
            options.include.extend(profile.include().iter().cloned());
            options.exclude.extend(profile.exclude().iter().cloned());
            options.reserved = profile.overlay_slots();
        }

        let farm = create_farm(project_dir, &options)?;
        let mut session = Self {
            project_dir: project_dir.to_path_buf(),
            farm: None,
            sync: None,
            injected: InjectReport::default(),
        };
        // From here on, dropping `session` removes the farm
        let farm = session.farm.insert(farm);

        if let Some(profile) = profile {
            session.injected = farm.inject(profile.root(), &profile.absolute_paths())?;
        }

        if config.sync.enabled {
            let options = SyncOptions {
                ignore: farm.ignore_stack().cloned(),
                matcher: Some(farm.matcher().clone()),
                link_roots: farm.symlink_roots().iter().cloned().collect(),
                ..SyncOptions::from_config(&config.sync)
            };
            let overlay = profile.map(Profile::relative_paths).unwrap_or_default();
            session.sync = Some(start_sync(farm.path(), project_dir, overlay, options)?);
        }

        log_farm_info!(
            "Session opened",
            project = display(project_dir.display()),
            farm = display(session.farm_dir().display()),
            injected = session.injected.injected.len()
        );
        Ok(session)
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    /// The farm directory; empty once the session is closed
    pub fn farm_dir(&self) -> &Path {
        self.farm.as_ref().map_or(Path::new(""), Farm::path)
    }

    pub fn farm(&self) -> Option<&Farm> {
        self.farm.as_ref()
    }

    pub fn injected(&self) -> &InjectReport {
        &self.injected
    }

    /// Map a directory inside the project to the same place in the farm.
    pub fn farm_path_for(&self, dir: &Path) -> Option<PathBuf> {
        let farm = self.farm.as_ref()?;
        let rel = relative_prefix(&self.project_dir, dir)?;
        if rel.is_empty() {
            Some(farm.path().to_path_buf())
        } else {
            Some(farm.path().join(rel))
        }
    }

    /// Stop syncing and remove the farm.
    pub fn close(mut self) -> Result<SessionReport> {
        let mut report = SessionReport {
            skipped_injections: std::mem::take(&mut self.injected.skipped),
            ..SessionReport::default()
        };
        if let Some(mut sync) = self.sync.take() {
            sync.close();
            report.synced = sync.synced_count();
            report.failures = sync.failures();
        }
        if let Some(farm) = self.farm.take() {
            farm.cleanup()?;
        }
        Ok(report)
    }
}

impl Drop for FarmSession {
    fn drop(&mut self) {
        if let Some(mut sync) = self.sync.take() {
            sync.close();
        }
        if let Some(farm) = self.farm.take() {
            let path = farm.path().to_path_buf();
            if let Err(e) = farm.cleanup() {
                log_farm_warn!(
                    "Failed to remove farm",
                    path = display(path.display()),
                    error = display(&e)
                );
            }
        }
    }
}
