//! CLI command implementations and server bootstrap.

use anyhow::{anyhow, Context, Result};
use comfy_table::{presets::UTF8_FULL, Table};
use console::style;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::api::{router, AppState};
use crate::domain::models::{Config, Repository, Task};
use crate::domain::ports::task_repository::TaskFilter;
use crate::domain::ports::{
    Clock, RepoRepository, RunRepository, SystemClock, TaskRepository,
};
use crate::infrastructure::database::{
    DatabaseConnection, EventRepositoryImpl, RepoRepositoryImpl, RunRepositoryImpl,
    TaskRepositoryImpl,
};
use crate::infrastructure::generative::HttpGenerativeClient;
use crate::services::tools::ToolRegistry;
use crate::services::{
    AgentRuntime, EventBus, LeaseSweeper, RealityVerifier, Scheduler, TaskEngine,
};

/// Open (and migrate) the configured database.
async fn open_database(config: &Config) -> Result<DatabaseConnection> {
    if let Some(parent) = Path::new(&config.database.path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("cannot create {}", parent.display()))?;
        }
    }
    let db = DatabaseConnection::new(&format!("sqlite:{}", config.database.path)).await?;
    db.migrate().await?;
    Ok(db)
}

/// Boot the full orchestrator: store, bus, scheduler, sweeper, HTTP API.
pub async fn serve(config: Config, port_override: Option<u16>) -> Result<()> {
    let db = open_database(&config).await?;
    let pool = db.pool().clone();

    let tasks: Arc<dyn TaskRepository> = Arc::new(TaskRepositoryImpl::new(pool.clone()));
    let runs: Arc<dyn RunRepository> = Arc::new(RunRepositoryImpl::new(pool.clone()));
    let repos: Arc<dyn RepoRepository> = Arc::new(RepoRepositoryImpl::new(pool.clone()));
    let events = Arc::new(EventRepositoryImpl::new(pool));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let bus = Arc::new(EventBus::new(events, clock.clone()));
    let registry = Arc::new(ToolRegistry::standard());
    let verifier = Arc::new(RealityVerifier::new(
        registry,
        runs.clone(),
        bus.clone(),
        clock.clone(),
        config.timeouts.clone(),
    ));
    let client = Arc::new(HttpGenerativeClient::new(&config.agent, &config.retry)?);
    let runtime = Arc::new(AgentRuntime::new(
        client,
        verifier,
        config.agent.clone(),
        config.timeouts.clone(),
        config.thresholds.clone(),
    ));

    let shared_config = Arc::new(config.clone());
    let engine = Arc::new(TaskEngine::new(
        tasks.clone(),
        runs.clone(),
        repos.clone(),
        bus.clone(),
        runtime,
        clock.clone(),
        shared_config,
    ));

    let shutdown = CancellationToken::new();
    let scheduler = Scheduler::new(
        tasks.clone(),
        engine,
        bus.clone(),
        clock.clone(),
        config.workers.slots,
        shutdown.clone(),
    );
    let sweeper = LeaseSweeper::new(
        tasks.clone(),
        bus.clone(),
        clock.clone(),
        config.lease.clone(),
        shutdown.clone(),
    );

    // Orphans from a dead process are failed before the API opens.
    sweeper.reconcile_startup().await?;

    {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.run().await });
    }
    tokio::spawn(sweeper.run());

    let state = AppState {
        tasks,
        runs,
        repos,
        bus,
        scheduler,
        clock,
    };

    let port = port_override.unwrap_or(config.server.port);
    let addr = format!("{}:{port}", config.server.host);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;
    info!(%addr, workers = config.workers.slots, "foreman listening");

    let serve_shutdown = shutdown.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            serve_shutdown.cancel();
        })
        .await?;

    Ok(())
}

/// Write a commented default config.
pub fn init() -> Result<()> {
    std::fs::create_dir_all(".foreman")?;
    let path = Path::new(".foreman/config.yaml");
    if path.exists() {
        return Err(anyhow!("{} already exists", path.display()));
    }

    let yaml = serde_yaml::to_string(&Config::default())?;
    let content = format!(
        "# Foreman configuration. Environment variables (FOREMAN_*) override\n\
         # these values; .foreman/local.yaml overrides this file.\n{yaml}"
    );
    std::fs::write(path, content)?;
    println!("wrote {}", path.display());
    Ok(())
}

pub async fn repo_add(config: Config, path: String, name: Option<String>) -> Result<()> {
    let canonical = std::fs::canonicalize(&path)
        .with_context(|| format!("repository path {path} does not exist"))?;
    if !canonical.is_dir() {
        return Err(anyhow!("{path} is not a directory"));
    }

    let db = open_database(&config).await?;
    let repos = RepoRepositoryImpl::new(db.pool().clone());
    let canonical_str = canonical.to_string_lossy().into_owned();

    if repos.get_by_path(&canonical_str).await?.is_some() {
        return Err(anyhow!("{canonical_str} is already registered"));
    }

    let name = name.unwrap_or_else(|| {
        canonical
            .file_name()
            .map_or_else(|| "repository".to_string(), |n| n.to_string_lossy().into_owned())
    });

    let mut repo = Repository::new(canonical_str, name, SystemClock.now());
    let (project_type, framework) = crate::services::repo_scan::detect_project(&canonical);
    repo.project_type = project_type;
    repo.framework = framework;

    repos.insert(&repo).await?;
    println!(
        "{} {} ({})",
        style("registered").green(),
        repo.name,
        repo.id
    );
    Ok(())
}

pub async fn repo_list(config: Config) -> Result<()> {
    let db = open_database(&config).await?;
    let repos = RepoRepositoryImpl::new(db.pool().clone());

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(["ID", "Name", "Type", "Framework", "Path"]);
    for repo in repos.list().await? {
        table.add_row([
            repo.id.to_string(),
            repo.name,
            repo.project_type.unwrap_or_default(),
            repo.framework.unwrap_or_default(),
            repo.path,
        ]);
    }
    println!("{table}");
    Ok(())
}

pub async fn task_submit(config: Config, repo_id: Uuid, request: String) -> Result<()> {
    let db = open_database(&config).await?;
    let repos = RepoRepositoryImpl::new(db.pool().clone());
    let tasks = TaskRepositoryImpl::new(db.pool().clone());

    if repos.get(repo_id).await?.is_none() {
        return Err(anyhow!("repository {repo_id} is not registered"));
    }

    let task = Task::new(repo_id, request, SystemClock.now());
    task.validate().map_err(|e| anyhow!(e))?;
    tasks.insert(&task).await?;

    println!("{} task {}", style("submitted").green(), task.id);
    Ok(())
}

pub async fn task_list(config: Config, repo_id: Option<Uuid>) -> Result<()> {
    let db = open_database(&config).await?;
    let tasks = TaskRepositoryImpl::new(db.pool().clone());

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(["ID", "Title", "Status", "Step", "Retries", "Updated"]);
    let filter = TaskFilter {
        repo_id,
        ..TaskFilter::default()
    };
    for task in tasks.list(filter).await? {
        table.add_row([
            task.id.to_string(),
            task.title.clone(),
            task.status.to_string(),
            format!("{}/{}", task.current_step, task.step_count()),
            task.retry_count.to_string(),
            task.updated_at.to_rfc3339(),
        ]);
    }
    println!("{table}");
    Ok(())
}

pub async fn task_show(config: Config, id: Uuid) -> Result<()> {
    let db = open_database(&config).await?;
    let tasks = TaskRepositoryImpl::new(db.pool().clone());
    let runs = RunRepositoryImpl::new(db.pool().clone());

    let Some(task) = tasks.get(id).await? else {
        return Err(anyhow!("task {id} not found"));
    };

    println!("{} {}", style("Task").bold(), task.id);
    println!("  title:   {}", task.title);
    println!("  status:  {}", task.status);
    println!("  request: {}", task.user_request);
    if let Some(kind) = task.error_kind {
        println!(
            "  error:   {} ({})",
            task.error_message.as_deref().unwrap_or(""),
            kind
        );
    }
    if let Some(plan) = &task.plan {
        println!("  plan:    {} step(s): {}", plan.steps.len(), plan.summary);
    }

    let runs = runs.list_runs(id).await?;
    if !runs.is_empty() {
        println!("\n{}", style("Agent runs").bold());
        for run in runs {
            println!(
                "  [{}] step {} {} — {} ({} tool call(s), confidence {:.2})",
                run.created_at.format("%H:%M:%S"),
                run.step_index,
                run.role,
                run.title,
                run.invocations.len(),
                run.confidence,
            );
        }
    }
    Ok(())
}
