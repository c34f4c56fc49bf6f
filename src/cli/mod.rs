//! Command-line interface.

pub mod commands;

use clap::{Parser, Subcommand};
use uuid::Uuid;

#[derive(Parser)]
#[command(
    name = "foreman",
    version,
    about = "Autonomous multi-agent task orchestrator"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the orchestrator server
    Serve {
        /// Override the configured port
        #[arg(long)]
        port: Option<u16>,
    },
    /// Write a default .foreman/config.yaml
    Init,
    /// Manage registered repositories
    Repo {
        #[command(subcommand)]
        command: RepoCommands,
    },
    /// Manage tasks
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },
}

#[derive(Subcommand)]
pub enum RepoCommands {
    /// Register a repository as a task target
    Add {
        /// Path to the repository root
        path: String,
        /// Display name (defaults to the directory name)
        #[arg(long)]
        name: Option<String>,
    },
    /// List registered repositories
    List,
}

#[derive(Subcommand)]
pub enum TaskCommands {
    /// Submit a new task
    Submit {
        /// Repository id
        #[arg(long)]
        repo: Uuid,
        /// The engineering request
        request: String,
    },
    /// List tasks
    List {
        /// Filter by repository id
        #[arg(long)]
        repo: Option<Uuid>,
    },
    /// Show one task with its agent runs
    Show { id: Uuid },
}
