//! Command-line surface.
//!
//! Four subcommands around one daemon: `run` executes it inline, `start`
//! detaches it into the background, `stop` and `status` act as clients of
//! the IPC endpoint. Handlers return the process exit code; errors bubble
//! to `main`.

use std::ffi::OsString;
use std::path::Path;

use clap::{ArgAction, Args, Parser, Subcommand};

mod commands;

#[derive(Parser, Debug)]
#[command(
    name = "fsmonitor--daemon",
    version,
    about = "Filesystem monitor daemon for git worktrees",
    arg_required_else_help = true
)]
pub struct Cli {
    /// Use <N> IPC worker threads.
    #[arg(long, global = true, value_name = "N")]
    pub ipc_threads: Option<u64>,

    /// Max seconds to wait for background daemon startup.
    #[arg(long, global = true, value_name = "SECONDS")]
    pub start_timeout: Option<u64>,

    /// Debug output (repeat for more).
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the daemon in the background.
    Start,

    /// Run the daemon in the foreground.
    Run(RunArgs),

    /// Stop the daemon watching this worktree.
    Stop,

    /// Report whether a daemon is watching this worktree.
    Status,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Detach into a new session before serving (internal; set by `start`).
    #[arg(long, hide = true, default_value_t = false)]
    pub detach: bool,
}

pub fn parse_from<I, T>(args: I) -> Cli
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    Cli::parse_from(args)
}

/// Dispatch a parsed invocation; returns the process exit code.
pub fn run(cli: Cli) -> crate::Result<u8> {
    let repo = crate::repo::discover(Path::new("."))?;
    let config = crate::config::Config::resolve(&repo.gitdir, cli.ipc_threads, cli.start_timeout)?;

    match cli.command {
        Commands::Start => commands::start::run(&repo, &config),
        Commands::Run(args) => commands::run::run(&repo, config, args.detach),
        Commands::Stop => commands::stop::run(&repo),
        Commands::Status => commands::status::run(&repo),
    }
}
