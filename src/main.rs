use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{debug, info};

use taskwave::config::OrchestratorConfig;
use taskwave::demo::{render_result, DemoRunner, Scenario};
use taskwave::state::JsonFileCompletionStore;
use taskwave::Result;

/// Taskwave - dependency-aware task orchestration
#[derive(Parser, Debug)]
#[command(name = "taskwave")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    TASKWAVE_DEBUG=1     Enable debug logging (alternative to --debug)\n    RUST_LOG             Override the log filter")]
pub struct Cli {
    /// Enable debug logging
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    /// Config file (defaults to ~/.taskwave/taskwave.toml)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run the demo scenarios
    Demo {
        /// Which scenario to run
        #[arg(long, value_enum, default_value = "all")]
        scenario: Scenario,

        /// Persist completed task ids to this JSON file
        #[arg(long)]
        state_file: Option<PathBuf>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Inspect or create the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write the default configuration
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    taskwave::log::init_with_debug(cli.debug);
    debug!("taskwave starting (debug={})", taskwave::log::is_debug());

    match cli.command {
        Command::Demo {
            scenario,
            state_file,
            json,
        } => run_demo(cli.config, scenario, state_file, json),
        Command::Config { action } => run_config(cli.config, action),
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<OrchestratorConfig> {
    match path {
        Some(path) => OrchestratorConfig::load_from(path),
        None => OrchestratorConfig::load(),
    }
}

fn run_demo(
    config_path: Option<PathBuf>,
    scenario: Scenario,
    state_file: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let config = load_config(config_path.as_ref())?;
    let mut runner = DemoRunner::new(config);
    if let Some(path) = state_file {
        info!("Using completion state file {}", path.display());
        runner = runner.with_store(Arc::new(JsonFileCompletionStore::open(path)?));
    }

    let reports = runner.run(scenario)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    for report in &reports {
        println!("=== {} ===", report.name);
        for line in &report.log {
            println!("{}", line);
        }
        println!("{}", render_result(&report.result));
        println!();
    }
    Ok(())
}

fn run_config(config_path: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(config_path.as_ref())?;
            print!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => OrchestratorConfig::config_path()?,
            };
            if path.exists() && !force {
                println!("Config already exists at {} (use --force to overwrite)", path.display());
                return Ok(());
            }
            OrchestratorConfig::default().save_to(&path)?;
            println!("Wrote default config to {}", path.display());
        }
    }
    Ok(())
}
