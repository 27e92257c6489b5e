//! `shade sweep`: reclaim farms left behind by crashed or killed runs.

use anyhow::{Context, Result};
use clap::Args;
use shade_config::Config;
use shade_farm::{sweep_orphans, SweepPolicy, SweepReport};

#[derive(Args, Debug)]
pub struct SweepArgs {
    /// Report what would be removed without removing anything
    #[arg(long)]
    dry_run: bool,

    /// Treat unfinished removals as stale after this many seconds
    #[arg(long, value_name = "SECS")]
    removing_max_age: Option<u64>,

    /// Treat unowned farms as stale after this many seconds
    #[arg(long, value_name = "SECS")]
    farm_max_age: Option<u64>,

    /// Stop trusting a farm's recorded pid after this many seconds
    #[arg(long, value_name = "SECS")]
    owner_max_age: Option<u64>,
}

pub fn run(config: &Config, args: SweepArgs) -> Result<()> {
    let mut sweep = config.sweep.clone();
    if let Some(secs) = args.removing_max_age {
        sweep.removing_max_age_secs = secs;
    }
    if let Some(secs) = args.farm_max_age {
        sweep.farm_max_age_secs = secs;
    }
    if let Some(secs) = args.owner_max_age {
        sweep.owner_max_age_secs = secs;
    }
    let policy = SweepPolicy {
        dry_run: args.dry_run,
        ..SweepPolicy::from_config(&sweep)
    };

    let temp_base = config.farm.temp_base();
    let report = sweep_orphans(&temp_base, &policy)
        .with_context(|| format!("Failed to sweep {}", temp_base.display()))?;

    print!("{}", summarize(&report, args.dry_run));
    if !report.failed.is_empty() {
        anyhow::bail!("{} farm(s) could not be removed", report.failed.len());
    }
    Ok(())
}

fn summarize(report: &SweepReport, dry_run: bool) -> String {
    let verb = if dry_run { "Would remove" } else { "Removed" };
    let mut out = String::new();
    for path in report.finished.iter().chain(&report.removed) {
        out.push_str(&format!("{verb} {}\n", path.display()));
    }
    for (path, error) in &report.failed {
        out.push_str(&format!("Failed {}: {error}\n", path.display()));
    }
    out.push_str(&format!(
        "{verb} {} farm(s), kept {}\n",
        report.reclaimed(),
        report.kept.len()
    ));
    out
}
