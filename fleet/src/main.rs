//! `fleet` command line.
//!
//! Runs one agent of a fleet against a shared repository and backlog, and offers the
//! reviewer/operator side of the status surface (`status`, `approve`, `reject`, `clean`).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};

use fleet::core::approval::ApprovalResponse;
use fleet::core::naming::validate_id;
use fleet::core::types::{Agent, AgentStatus, Mode};
use fleet::exit_codes;
use fleet::io::approval::FileApprovalChannel;
use fleet::io::backlog::BdBacklog;
use fleet::io::checks::ProjectChecks;
use fleet::io::config::{CONFIG_PATH, FleetConfig, FleetPaths, load_config, write_config};
use fleet::io::executor::CommandExecutor;
use fleet::io::status::{StateSnapshot, StatusPublisher, list_snapshots, read_snapshot};
use fleet::io::vcs::GitVcs;
use fleet::lifecycle::{Collaborators, Controller, InteractiveOutcome, TaskOutcome};
use fleet::logging;
use fleet::workspace::WorkspaceManager;

#[derive(Parser)]
#[command(
    name = "fleet",
    version,
    about = "Per-agent task lifecycle engine for a fleet of coding agents"
)]
struct Cli {
    /// Repository root (the main checkout shared by all agents).
    #[arg(long, global = true, default_value = ".")]
    repo: PathBuf,
    /// Config file. Defaults to `<repo>/.fleet/config.toml`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write the default config file.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Run one agent: loop over the backlog (autonomous) or finish one task (interactive).
    Run {
        #[arg(long, env = "FLEET_AGENT_ID")]
        agent_id: String,
        #[arg(long, value_enum, default_value_t = ModeArg::Autonomous)]
        mode: ModeArg,
    },
    /// Print the published state of one or all agents.
    Status {
        #[arg(long)]
        agent_id: Option<String>,
    },
    /// Approve the change an agent is waiting on.
    Approve { agent_id: String },
    /// Reject the change an agent is waiting on, with feedback for the revision.
    Reject {
        agent_id: String,
        #[arg(long)]
        feedback: String,
    },
    /// Force-remove an agent's leftover workspace and task branches.
    Clean {
        #[arg(long, env = "FLEET_AGENT_ID")]
        agent_id: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    Autonomous,
    Interactive,
}

impl From<ModeArg> for Mode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Autonomous => Mode::Autonomous,
            ModeArg::Interactive => Mode::Interactive,
        }
    }
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| cli.repo.join(CONFIG_PATH));
    match cli.command {
        Command::Init { force } => cmd_init(&config_path, force),
        Command::Run { agent_id, mode } => cmd_run(&cli.repo, &config_path, &agent_id, mode.into()),
        Command::Status { agent_id } => cmd_status(&cli.repo, &config_path, agent_id.as_deref()),
        Command::Approve { agent_id } => cmd_respond(
            &cli.repo,
            &config_path,
            &agent_id,
            &ApprovalResponse::Approved,
        ),
        Command::Reject { agent_id, feedback } => cmd_respond(
            &cli.repo,
            &config_path,
            &agent_id,
            &ApprovalResponse::Rejected { feedback },
        ),
        Command::Clean { agent_id } => cmd_clean(&cli.repo, &config_path, &agent_id),
    }
}

fn cmd_init(config_path: &Path, force: bool) -> Result<i32> {
    if config_path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }
    write_config(config_path, &FleetConfig::default())?;
    println!("wrote {}", config_path.display());
    Ok(exit_codes::OK)
}

fn resolve(repo: &Path, config_path: &Path) -> Result<(FleetConfig, FleetPaths)> {
    let cfg = load_config(config_path)?;
    let repo = repo
        .canonicalize()
        .with_context(|| format!("resolve repo root {}", repo.display()))?;
    let paths = FleetPaths::resolve(&repo, &cfg);
    Ok((cfg, paths))
}

fn cmd_run(repo: &Path, config_path: &Path, agent_id: &str, mode: Mode) -> Result<i32> {
    validate_id("agent", agent_id)?;
    let (cfg, paths) = resolve(repo, config_path)?;

    let backlog = BdBacklog::new(cfg.backlog.command.clone(), &paths.repo_root);
    let vcs = GitVcs::new(&paths.repo_root, &cfg.vcs.remote, &cfg.vcs.baseline);
    let executor = CommandExecutor::new(cfg.agent.command.clone(), cfg.agent.resume_args.clone());
    let checks = ProjectChecks;
    let approvals =
        FileApprovalChannel::new(StatusPublisher::new(paths.agent_dir(agent_id)).approval_dir());
    let deps = Collaborators {
        backlog: &backlog,
        vcs: &vcs,
        executor: &executor,
        checks: &checks,
        approvals: &approvals,
    };
    let mut controller = Controller::new(Agent::new(agent_id, mode), cfg, paths, deps)?;

    match mode {
        Mode::Autonomous => {
            let outcome = controller.run_autonomous();
            println!(
                "{agent_id}: {} closed, {} blocked",
                outcome.closed(),
                outcome.blocked()
            );
            Ok(exit_codes::OK)
        }
        Mode::Interactive => match controller.run_interactive() {
            InteractiveOutcome::NoWork => {
                println!("{agent_id}: no ready tasks");
                Ok(exit_codes::NO_WORK)
            }
            InteractiveOutcome::Finished(TaskOutcome::Closed { task_id }) => {
                println!("{agent_id}: closed {task_id}");
                Ok(exit_codes::OK)
            }
            InteractiveOutcome::Finished(TaskOutcome::Blocked { task_id, failure }) => {
                println!("{agent_id}: blocked {task_id}: {failure}");
                Ok(exit_codes::BLOCKED)
            }
        },
    }
}

fn cmd_status(repo: &Path, config_path: &Path, agent_id: Option<&str>) -> Result<i32> {
    let (_, paths) = resolve(repo, config_path)?;
    let snapshots = match agent_id {
        Some(id) => {
            validate_id("agent", id)?;
            match read_snapshot(&paths.agent_dir(id))? {
                Some(snapshot) => vec![snapshot],
                None => bail!("agent {id} has not published any status"),
            }
        }
        None => list_snapshots(&paths.status_root)?,
    };
    if snapshots.is_empty() {
        println!("no agents under {}", paths.status_root.display());
    }
    for snapshot in &snapshots {
        println!("{}", format_snapshot(snapshot));
        if snapshot.status == AgentStatus::NeedsApproval {
            let channel = FileApprovalChannel::new(
                StatusPublisher::new(paths.agent_dir(&snapshot.agent_id)).approval_dir(),
            );
            if let Some(request) = channel.pending_request()? {
                println!(
                    "  awaiting approval: {} ({}) round {}: {}",
                    request.task_id, request.task_type, request.round, request.title
                );
            }
        }
    }
    Ok(exit_codes::OK)
}

fn format_snapshot(snapshot: &StateSnapshot) -> String {
    format!(
        "{}\t{}\t{}\t{}\t{}",
        snapshot.agent_id,
        snapshot.status.as_str(),
        snapshot.task_id.as_deref().unwrap_or("-"),
        snapshot.mode.as_str(),
        snapshot.updated_at
    )
}

fn cmd_respond(
    repo: &Path,
    config_path: &Path,
    agent_id: &str,
    response: &ApprovalResponse,
) -> Result<i32> {
    validate_id("agent", agent_id)?;
    let (_, paths) = resolve(repo, config_path)?;
    let channel =
        FileApprovalChannel::new(StatusPublisher::new(paths.agent_dir(agent_id)).approval_dir());
    let Some(request) = channel.pending_request()? else {
        bail!("agent {agent_id} is not awaiting approval");
    };
    channel.respond(response)?;
    let verb = match response {
        ApprovalResponse::Approved => "approved",
        ApprovalResponse::Rejected { .. } => "rejected",
    };
    println!("{verb} {} for {agent_id}", request.task_id);
    Ok(exit_codes::OK)
}

fn cmd_clean(repo: &Path, config_path: &Path, agent_id: &str) -> Result<i32> {
    validate_id("agent", agent_id)?;
    let (cfg, paths) = resolve(repo, config_path)?;
    let vcs = GitVcs::new(&paths.repo_root, &cfg.vcs.remote, &cfg.vcs.baseline);
    WorkspaceManager::new(&vcs, paths.worktree_root.clone(), agent_id).recover()?;
    println!("cleaned workspace of {agent_id}");
    Ok(exit_codes::OK)
}
