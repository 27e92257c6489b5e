//! `shade run`: open a session, run the command inside the farm, clean up.

use std::path::{Path, PathBuf};
use std::process::ExitStatus;

use anyhow::{Context, Result};
use clap::Args;
use shade_config::path::resolve_dir;
use shade_config::{log_cli_debug, log_cli_info, Config};
use shade_farm::{FarmSession, Profile, SessionReport};
use tokio::process::Command;
use tracing::field::display;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Overlay profile directory injected into the farm
    #[arg(long, value_name = "DIR")]
    profile: Option<PathBuf>,

    /// Do not copy new files from the farm back into the project
    #[arg(long)]
    no_sync: bool,

    /// Command and arguments to run
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    command: Vec<String>,
}

/// Run the command and return the exit code to propagate.
pub async fn run(project: &Path, config: &Config, args: RunArgs) -> Result<i32> {
    let Some((program, rest)) = args.command.split_first() else {
        anyhow::bail!("No command specified");
    };

    let mut config = config.clone();
    if args.no_sync {
        config.sync.enabled = false;
    }

    let profile = match &args.profile {
        Some(dir) => {
            let dir = resolve_dir(dir)?;
            Some(
                Profile::load(&dir)
                    .with_context(|| format!("Failed to load profile {}", dir.display()))?,
            )
        }
        None => None,
    };

    let session = FarmSession::open(project, profile.as_ref(), &config)
        .with_context(|| format!("Failed to create a farm for {}", project.display()))?;
    for skipped in &session.injected().skipped {
        eprintln!(
            "shade: overlay file {} collides with a project path, not injected",
            skipped.display()
        );
    }

    let cwd = working_dir(&session);
    log_cli_info!(
        "Spawning command",
        program = display(program),
        cwd = display(cwd.display())
    );

    let spawned = Command::new(program)
        .args(rest)
        .current_dir(&cwd)
        .env("SHADE_FARM", session.farm_dir())
        .env("SHADE_PROJECT", project)
        .spawn()
        .with_context(|| format!("Failed to execute: {program}"));
    let status = match spawned {
        Ok(mut child) => wait_for(&mut child).await,
        Err(e) => Err(e),
    };

    // Close before reporting a spawn or wait error so the farm never outlives the run
    let report = session.close().context("Failed to remove the farm")?;
    let status = status?;
    print_summary(&report);
    Ok(exit_code(status))
}

/// The farm directory matching the caller's cwd, or the farm root.
fn working_dir(session: &FarmSession) -> PathBuf {
    let root = session.farm_dir().to_path_buf();
    let Ok(cwd) = std::env::current_dir() else {
        return root;
    };
    match session.farm_path_for(&cwd) {
        Some(dir) if dir.is_dir() => dir,
        _ => root,
    }
}

/// Wait for the child. The terminal delivers Ctrl-C to the child as well, so
/// an interrupt here only means waiting for it to exit.
async fn wait_for(child: &mut tokio::process::Child) -> Result<ExitStatus> {
    loop {
        tokio::select! {
            status = child.wait() => return status.context("Failed to wait for the command"),
            _ = tokio::signal::ctrl_c() => {
                log_cli_debug!("Interrupt received, waiting for the command to exit");
            }
        }
    }
}

fn print_summary(report: &SessionReport) {
    if report.synced > 0 {
        eprintln!("shade: synced {} path(s) back to the project", report.synced);
    }
    for failure in &report.failures {
        eprintln!(
            "shade: sync {:?} failed for {}: {}",
            failure.op,
            failure.path.display(),
            failure.error
        );
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_exit_code_from_signal() {
        use std::os::unix::process::ExitStatusExt;
        assert_eq!(exit_code(ExitStatus::from_raw(3 << 8)), 3);
        assert_eq!(exit_code(ExitStatus::from_raw(libc::SIGKILL)), 128 + 9);
    }
}
