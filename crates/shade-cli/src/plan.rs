//! `shade plan`: show what a farm would contain.

use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use shade_config::Config;
use shade_farm::{IgnoreStack, PatternMatcher, PlanBuilder, SymlinkPlan, TraversalState};

#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Extra include pattern (repeatable)
    #[arg(long = "include", value_name = "PATTERN")]
    include: Vec<String>,

    /// Extra exclude pattern (repeatable)
    #[arg(long = "exclude", value_name = "PATTERN")]
    exclude: Vec<String>,
}

pub fn run(project: &Path, config: &Config, args: PlanArgs) -> Result<()> {
    let mut include = config.patterns.include.clone();
    include.extend(args.include);
    let mut exclude = config.patterns.exclude.clone();
    exclude.extend(args.exclude);

    let matcher = PatternMatcher::new(&include, &exclude)?;
    let mut builder = PlanBuilder::new(project, &matcher);
    if config.farm.respect_gitignore {
        let ignore = IgnoreStack::load(project, config.farm.global_gitignore.as_deref())
            .context("Failed to load ignore rules")?;
        builder = builder.with_ignore(ignore);
    }

    let mut state = TraversalState::new(config.farm.max_entries);
    let plan = builder
        .build(project, &mut state)
        .with_context(|| format!("Failed to plan {}", project.display()))?;

    print!("{}", render(&plan));
    println!(
        "{} entries ({} links) from {}",
        state.entries(),
        plan.link_paths().len(),
        project.display()
    );
    Ok(())
}

/// One line per entry; whole-directory links end in `/ ->`, real directories in `/`.
fn render(plan: &SymlinkPlan) -> String {
    let mut out = String::new();
    render_level(plan, 0, &mut out);
    out
}

fn render_level(plan: &SymlinkPlan, depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    for (name, nested) in &plan.partial_dirs {
        let _ = writeln!(out, "{indent}{}/", name.to_string_lossy());
        render_level(nested, depth + 1, out);
    }
    for name in &plan.whole_dirs {
        let _ = writeln!(out, "{indent}{}/ ->", name.to_string_lossy());
    }
    for name in &plan.files {
        let _ = writeln!(out, "{indent}{} ->", name.to_string_lossy());
    }
}
