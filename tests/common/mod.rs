//! Shared test harness: in-memory store, scripted generative client, and a
//! scratch target repository.

use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

use foreman::domain::models::{Config, Repository, Task};
use foreman::domain::ports::generative::{AgentReply, ToolRequest};
use foreman::domain::ports::{
    Clock, ManualClock, RepoRepository, RunRepository, TaskRepository,
};
use foreman::infrastructure::database::{
    DatabaseConnection, EventRepositoryImpl, RepoRepositoryImpl, RunRepositoryImpl,
    TaskRepositoryImpl,
};
use foreman::infrastructure::generative::ScriptedClient;
use foreman::services::tools::ToolRegistry;
use foreman::services::{AgentRuntime, EventBus, RealityVerifier, TaskEngine};

#[allow(dead_code)]
pub struct Harness {
    pub tasks: Arc<dyn TaskRepository>,
    pub runs: Arc<dyn RunRepository>,
    pub repos: Arc<dyn RepoRepository>,
    pub bus: Arc<EventBus>,
    pub client: Arc<ScriptedClient>,
    pub engine: Arc<TaskEngine>,
    pub clock: Arc<ManualClock>,
    pub config: Arc<Config>,
    pub repo: Repository,
    pub repo_dir: TempDir,
    pub db: DatabaseConnection,
}

#[allow(dead_code)]
impl Harness {
    pub async fn new() -> Self {
        Self::with_config(Config::default()).await
    }

    pub async fn with_config(config: Config) -> Self {
        let db = DatabaseConnection::new("sqlite::memory:")
            .await
            .expect("failed to create test database");
        db.migrate().await.expect("failed to run migrations");
        let pool = db.pool().clone();

        let tasks: Arc<dyn TaskRepository> = Arc::new(TaskRepositoryImpl::new(pool.clone()));
        let runs: Arc<dyn RunRepository> = Arc::new(RunRepositoryImpl::new(pool.clone()));
        let repos: Arc<dyn RepoRepository> = Arc::new(RepoRepositoryImpl::new(pool.clone()));
        let events = Arc::new(EventRepositoryImpl::new(pool));

        let clock = Arc::new(ManualClock::new(Utc::now()));
        let clock_dyn: Arc<dyn Clock> = clock.clone();

        let bus = Arc::new(EventBus::new(events, clock_dyn.clone()));
        let registry = Arc::new(ToolRegistry::standard());
        let verifier = Arc::new(RealityVerifier::new(
            registry,
            runs.clone(),
            bus.clone(),
            clock_dyn.clone(),
            config.timeouts.clone(),
        ));

        let client = Arc::new(ScriptedClient::new());
        let runtime = Arc::new(AgentRuntime::new(
            client.clone(),
            verifier,
            config.agent.clone(),
            config.timeouts.clone(),
            config.thresholds.clone(),
        ));

        let config = Arc::new(config);
        let engine = Arc::new(TaskEngine::new(
            tasks.clone(),
            runs.clone(),
            repos.clone(),
            bus.clone(),
            runtime,
            clock_dyn,
            config.clone(),
        ));

        let repo_dir = TempDir::new().expect("failed to create scratch repo");
        let repo = Repository::new(
            repo_dir.path().to_string_lossy().into_owned(),
            "scratch",
            Utc::now(),
        );
        repos.insert(&repo).await.expect("failed to register repo");

        Self {
            tasks,
            runs,
            repos,
            bus,
            client,
            engine,
            clock,
            config,
            repo,
            repo_dir,
            db,
        }
    }

    pub async fn submit(&self, request: &str) -> Task {
        let task = Task::new(self.repo.id, request, Utc::now());
        self.tasks.insert(&task).await.expect("insert failed");
        task
    }

    pub async fn task(&self, id: Uuid) -> Task {
        self.tasks
            .get(id)
            .await
            .expect("get failed")
            .expect("task missing")
    }

    /// Kinds of every committed event for a task, in sequence order.
    pub async fn event_kinds(&self, id: Uuid) -> Vec<String> {
        self.bus
            .replay(id, None)
            .await
            .expect("replay failed")
            .iter()
            .map(|e| e.payload.kind().to_string())
            .collect()
    }
}

/// A single-step plan value as the planner's structured output.
#[allow(dead_code)]
pub fn plan_value(confidence: f64, file: &str) -> Value {
    json!({
        "summary": "implement the request in one step",
        "steps": [{
            "index": 0,
            "description": format!("create {file}"),
            "role": "coder_be",
            "files": [file],
            "depends_on": []
        }],
        "estimated_complexity": 2,
        "affected_files": [file],
        "risks": [],
        "confidence": confidence
    })
}

/// An agent reply requesting a single tool call.
#[allow(dead_code)]
pub fn tool_reply(name: &str, args: Value) -> AgentReply {
    AgentReply::ToolRequests(vec![ToolRequest {
        id: format!("tu_{}", Uuid::new_v4().simple()),
        name: name.to_string(),
        args,
    }])
}

/// A final agent report with the given title.
#[allow(dead_code)]
pub fn final_reply(title: &str) -> AgentReply {
    AgentReply::Final(
        json!({
            "title": title,
            "subtitle": "",
            "reasoning": "done",
            "confidence": 0.9
        })
        .to_string(),
    )
}

/// Script a full coder step: one write followed by a final report.
#[allow(dead_code)]
pub fn script_coder_write(client: &ScriptedClient, path: &str, content: &str) {
    client.push_tool_reply(Ok(tool_reply(
        "write_file",
        json!({ "path": path, "content": content }),
    )));
    client.push_tool_reply(Ok(final_reply("implemented step")));
}

/// Script a QA pass: run a command whose output parses as `passed`.
#[allow(dead_code)]
pub fn script_qa_pass(client: &ScriptedClient) {
    client.push_tool_reply(Ok(tool_reply(
        "run_command",
        json!({ "command": "echo '2 passed in 0.01s'" }),
    )));
    client.push_tool_reply(Ok(final_reply("tests passed")));
}

/// Script a QA run whose command fails.
#[allow(dead_code)]
pub fn script_qa_fail(client: &ScriptedClient) {
    client.push_tool_reply(Ok(tool_reply(
        "run_command",
        json!({ "command": "echo 'FAILED test_health - assert 404 == 200'; exit 1" }),
    )));
    client.push_tool_reply(Ok(final_reply("tests failed")));
}

/// Script a QA run that collects nothing.
#[allow(dead_code)]
pub fn script_qa_no_tests(client: &ScriptedClient) {
    client.push_tool_reply(Ok(tool_reply(
        "run_command",
        json!({ "command": "echo 'collected 0 items'" }),
    )));
    client.push_tool_reply(Ok(final_reply("nothing collected")));
}

/// Script the docs phase: report only.
#[allow(dead_code)]
pub fn script_docs(client: &ScriptedClient) {
    client.push_tool_reply(Ok(final_reply("updated docs")));
}

/// Script an entire successful child pipeline (plan, code, qa pass, docs).
#[allow(dead_code)]
pub fn script_full_success(client: &ScriptedClient, file: &str, content: &str) {
    client.push_structured(Ok(plan_value(0.95, file)));
    script_coder_write(client, file, content);
    script_qa_pass(client);
    script_docs(client);
}
