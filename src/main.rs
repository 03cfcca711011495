use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use loom::config::Config;
use loom::host::TmuxHost;
use loom::model::ProjectSpec;
use loom::report::Outcome;
use loom::{Error, OperationSummary, Orchestrator, Result, StartOptions};

/// Loom - declarative per-project workspace orchestrator
#[derive(Parser, Debug)]
#[command(name = "loom")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    LOOM_DEBUG=1    Enable debug logging (alternative to --debug)\n    RUST_LOG        Override the log filter")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.loom/loom.log)
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Spawn a project's resources onto their tags
    Start {
        /// Project name (file under the projects directory)
        project: String,

        /// Use an alternate layout from the project file
        #[arg(long)]
        layout: Option<String>,
    },

    /// Tear down a running project
    Stop {
        /// Project name
        project: String,
    },

    /// Show persisted project state (all projects when omitted)
    Status {
        /// Project name
        project: Option<String>,
    },

    /// Reattach to a project's entities after a restart (all when omitted)
    Resume {
        /// Project name
        project: Option<String>,
    },

    /// List defined projects
    List,

    /// Write a default config file and create loom's directories
    Init,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = loom::log::init(cli.debug);
    info!(command = ?cli.command, "loom starting");

    let config = Config::load()?;
    match cli.command {
        Command::List => run_list(&config, cli.json),
        Command::Init => run_init(&config),
        command => {
            config.ensure_dirs()?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run(command, &config, cli.json))
        }
    }
}

async fn run(command: Command, config: &Config, json: bool) -> Result<()> {
    let needs_host = !matches!(command, Command::Status { .. });
    if needs_host && !TmuxHost::is_available() {
        return Err(Error::Tmux("tmux not found on PATH".to_string()));
    }
    let orchestrator = Orchestrator::from_config(config)?;
    match command {
        Command::Start { project, layout } => {
            let spec = ProjectSpec::load(&config.project_path(&project)?)?;
            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupted, cancelling start");
                    eprintln!("Interrupted; finishing in-flight resources and tearing down...");
                    on_interrupt.cancel();
                }
            });
            let summary = orchestrator
                .start_with(&spec, &StartOptions { layout }, cancel)
                .await?;
            print_summaries(&[summary], json)
        }
        Command::Stop { project } => {
            let summary = orchestrator.stop(&project).await?;
            print_summaries(&[summary], json)
        }
        Command::Status { project: Some(project) } => {
            let summary = orchestrator.status(&project).await?;
            print_summaries(&[summary], json)
        }
        Command::Status { project: None } => {
            let summaries = orchestrator.status_all().await?;
            if summaries.is_empty() && !json {
                println!("No projects running");
                return Ok(());
            }
            print_summaries(&summaries, json)
        }
        Command::Resume { project: Some(project) } => {
            let summary = orchestrator.resume(&project).await?;
            print_summaries(&[summary], json)
        }
        Command::Resume { project: None } => {
            let mut summaries = Vec::new();
            for (name, result) in orchestrator.resume_all().await? {
                match result {
                    Ok(summary) => summaries.push(summary),
                    Err(e) => eprintln!("{}: {}", name, e),
                }
            }
            if summaries.is_empty() && !json {
                println!("Nothing to resume");
                return Ok(());
            }
            print_summaries(&summaries, json)
        }
        Command::List | Command::Init => Ok(()),
    }
}

fn run_list(config: &Config, json: bool) -> Result<()> {
    let names = ProjectSpec::list(&config.projects_dir()?)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&names)?);
    } else if names.is_empty() {
        println!("No projects defined in {}", config.projects_dir()?.display());
    } else {
        for name in names {
            println!("{}", name);
        }
    }
    Ok(())
}

fn run_init(config: &Config) -> Result<()> {
    let path = Config::config_path()?;
    if path.exists() {
        println!("Config already exists at {}", path.display());
    } else {
        config.save()?;
        println!("Wrote {}", path.display());
    }
    config.ensure_dirs()?;
    println!("Projects directory: {}", config.projects_dir()?.display());
    Ok(())
}

fn print_summaries(summaries: &[OperationSummary], json: bool) -> Result<()> {
    if json {
        let out = if summaries.len() == 1 {
            serde_json::to_string_pretty(&summaries[0])?
        } else {
            serde_json::to_string_pretty(summaries)?
        };
        println!("{}", out);
        return Ok(());
    }

    for summary in summaries {
        println!(
            "{} [{}] {} ok, {} failed",
            summary.project,
            summary.status,
            summary.succeeded(),
            summary.failed()
        );
        for resource in &summary.resources {
            println!("  {:<16} {}", resource.resource_id, describe(&resource.outcome));
        }
        for warning in &summary.warnings {
            println!("  ! {}", warning);
        }
    }
    Ok(())
}

fn describe(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Live { tag, entity, reused } => {
            let how = if *reused { "reused" } else { "live" };
            format!("{} on tag {} ({})", how, tag, entity)
        }
        Outcome::Pending => "pending".to_string(),
        Outcome::Stopped { forced: true } => "stopped (force-killed)".to_string(),
        Outcome::Stopped { forced: false } => "stopped".to_string(),
        Outcome::Orphaned => "orphaned".to_string(),
        Outcome::Failed { reason } => format!("failed: {}", reason),
    }
}
