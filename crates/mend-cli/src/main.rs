mod cmd_inspect;
mod cmd_list;
mod cmd_refresh;
mod cmd_show;
mod cmd_sweep;
mod cmd_workflow;
mod context;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mend", version, about = "Agent-driven issue remediation")]
struct Cli {
    /// Issue database location (defaults to the per-user data dir)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// JSON fixture file served as the issue source (offline mode)
    #[arg(long, global = true)]
    fixtures: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Pull the latest issues from the source into the local store
    Refresh,
    /// List stored issues and their workflow phases
    List {
        /// Maximum number of issues to show
        #[arg(long, default_value_t = 50)]
        limit: u32,
        /// Skip this many issues first
        #[arg(long, default_value_t = 0)]
        offset: u32,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one issue in full
    Show {
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run an analysis session and wait for the fix proposal
    Analyze {
        id: String,
        /// Repository checkout the analysis session reads
        #[arg(long, default_value = ".")]
        checkout: PathBuf,
    },
    /// Re-run analysis for a failed issue
    Retry {
        id: String,
        /// Repository checkout the analysis session reads
        #[arg(long, default_value = ".")]
        checkout: PathBuf,
    },
    /// Approve the current proposal, unlocking `fix`
    Approve { id: String },
    /// Run a fix session for the approved proposal and wait for it
    Fix {
        id: String,
        /// Repository checkout worktrees are created from
        #[arg(long, default_value = ".")]
        checkout: PathBuf,
    },
    /// Reset an issue back to pending, discarding session state
    Reset { id: String },
    /// Show the recorded agent conversation for an issue
    Conversation {
        id: String,
        /// Only messages from this phase (analyzing or fixing)
        #[arg(long)]
        phase: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the stored fix proposal for an issue
    Proposal { id: String },
    /// Mark issues stranded mid-session by a previous process as failed
    Sweep,
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let db = cli.db.as_deref();
    let fixtures = cli.fixtures.as_deref();

    match cli.cmd {
        Command::Refresh => cmd_refresh::execute(db, fixtures),
        Command::List {
            limit,
            offset,
            json,
        } => cmd_list::execute(db, limit, offset, json),
        Command::Show { id, json } => cmd_show::execute(db, &id, json),
        Command::Analyze { id, checkout } => cmd_workflow::analyze(db, fixtures, &id, &checkout),
        Command::Retry { id, checkout } => cmd_workflow::analyze(db, fixtures, &id, &checkout),
        Command::Approve { id } => cmd_workflow::approve(db, &id),
        Command::Fix { id, checkout } => cmd_workflow::fix(db, fixtures, &id, &checkout),
        Command::Reset { id } => cmd_workflow::reset(db, &id),
        Command::Conversation { id, phase, json } => {
            cmd_inspect::conversation(db, &id, phase.as_deref(), json)
        }
        Command::Proposal { id } => cmd_inspect::proposal(db, &id),
        Command::Sweep => cmd_sweep::execute(db),
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}
