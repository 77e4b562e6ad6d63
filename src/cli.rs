use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "review-gate",
    about = "Answer coding-agent requests for human input over shared files",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a window: wait for agent requests and answer them from the terminal
    Watch {
        /// Workspace root this window serves (defaults to the current directory)
        #[arg(long)]
        workspace: Option<PathBuf>,

        /// Behave as a background window: let focused windows take shared requests first
        #[arg(long)]
        unfocused: bool,
    },

    /// Run a window with the panel already open
    Open {
        /// Workspace root this window serves (defaults to the current directory)
        #[arg(long)]
        workspace: Option<PathBuf>,
    },

    /// Print the workspace hash used in scoped file names
    Hash {
        /// Workspace path to hash
        path: String,
    },

    /// Report whether the agent heartbeat is fresh
    Status,

    /// Show resolved configuration
    Config {
        /// Emit machine-readable JSON output
        #[arg(long)]
        json: bool,
    },
}
