//! CLI command definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// agentherd - orchestrator for fleets of long-running coding agents
#[derive(Parser)]
#[command(
    name = "agentherd",
    about = "Supervise concurrent coding-agent sessions: plain tasks, adversarial loops, ralph loops, and executable plans",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Run a single task to completion
    Run {
        /// Task description passed to the agent
        task: String,
    },

    /// Run a ralph loop until the promise string appears in output
    Ralph {
        /// Task description
        task: String,

        /// Completion promise the agent must print
        #[arg(short, long)]
        promise: String,

        /// Iteration cap (config default when omitted)
        #[arg(short, long)]
        max_iterations: Option<u32>,
    },

    /// Run an adversarial implement/review loop
    Adversarial {
        /// Task description
        task: String,

        /// Round cap (config default when omitted)
        #[arg(short, long)]
        max_rounds: Option<u32>,
    },

    /// Plan a task and execute the plan (auto-approves in headless mode)
    Plan {
        /// Task description
        task: String,
    },
}
