use anyhow::Result;
use clap::Parser;

use foreman::cli::{commands, Cli, Commands, RepoCommands, TaskCommands};
use foreman::infrastructure::config::ConfigLoader;
use foreman::infrastructure::logging::Logging;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ConfigLoader::load()?;
    let _logging = Logging::init(&config.logging)?;

    match cli.command {
        Commands::Serve { port } => commands::serve(config, port).await,
        Commands::Init => commands::init(),
        Commands::Repo { command } => match command {
            RepoCommands::Add { path, name } => commands::repo_add(config, path, name).await,
            RepoCommands::List => commands::repo_list(config).await,
        },
        Commands::Task { command } => match command {
            TaskCommands::Submit { repo, request } => {
                commands::task_submit(config, repo, request).await
            }
            TaskCommands::List { repo } => commands::task_list(config, repo).await,
            TaskCommands::Show { id } => commands::task_show(config, id).await,
        },
    }
}
