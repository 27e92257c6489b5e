//! # shade CLI
//!
//! Runs a command inside a symlink farm of the current project, with an
//! overlay profile on top and edits synced back.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use shade_config::logging::{init_logging, LogLevel};
use shade_config::path::resolve_dir;
use shade_config::Config;
use shade_farm::clean_farm_dir;

mod plan;
mod run;
pub mod sweep;

/// shade - run tools in a filtered, overlaid view of your project
#[derive(Parser)]
#[command(name = "shade")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Project directory (defaults to the current directory)
    #[arg(long, global = true, value_name = "DIR")]
    project: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command inside a farm of the project
    Run(run::RunArgs),

    /// Print the symlink plan without creating anything
    Plan(plan::PlanArgs),

    /// Remove farms left behind by crashed or killed runs
    Sweep(sweep::SweepArgs),

    /// Remove a single farm directory
    Clean {
        #[arg(value_name = "FARM_DIR")]
        farm_dir: PathBuf,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file locations
    Path,
}

fn main() -> Result<()> {
    #[cfg(unix)]
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }

    let cli = Cli::parse();
    init_logging(LogLevel::from_verbosity(cli.verbose));

    let project = match &cli.project {
        Some(dir) => resolve_dir(dir)?,
        None => resolve_dir(std::env::current_dir().context("Cannot read current directory")?)?,
    };

    match cli.command {
        Commands::Run(args) => {
            let config = load_config(&project)?;
            let rt = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            let code = rt.block_on(run::run(&project, &config, args))?;
            drop(rt);
            std::process::exit(code);
        }
        Commands::Plan(args) => plan::run(&project, &load_config(&project)?, args),
        Commands::Sweep(args) => sweep::run(&load_config(&project)?, args),
        Commands::Clean { farm_dir } => {
            let farm_dir = std::path::absolute(&farm_dir)
                .with_context(|| format!("Cannot resolve {}", farm_dir.display()))?;
            clean_farm_dir(&farm_dir)
                .with_context(|| format!("Failed to clean {}", farm_dir.display()))?;
            println!("Removed {}", farm_dir.display());
            Ok(())
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                print!("{}", load_config(&project)?.to_toml());
                Ok(())
            }
            ConfigCommands::Path => {
                match Config::global_config_path() {
                    Some(path) => println!("Global:  {}", path.display()),
                    None => println!("Global:  (no home directory)"),
                }
                println!(
                    "Project: {}",
                    Config::project_config_path(&project).display()
                );
                Ok(())
            }
        },
    }
}

fn load_config(project: &Path) -> Result<Config> {
    Config::load_for(project)
        .with_context(|| format!("Failed to load configuration for {}", project.display()))
}
