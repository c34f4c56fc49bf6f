//! Configuration model.
//!
//! Loaded by `infrastructure::config::ConfigLoader` from defaults, project
//! yaml, local yaml, and `FOREMAN_*` environment variables.

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub workers: WorkerConfig,
    pub thresholds: ThresholdConfig,
    pub lease: LeaseConfig,
    pub timeouts: TimeoutConfig,
    pub fix_loop: FixLoopConfig,
    pub agent: AgentConfig,
    pub retry: RetryConfig,
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

/// Worker pool sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Concurrent worker slots
    pub slots: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { slots: 4 }
    }
}

/// Confidence thresholds for plan auto-approval and review flagging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    /// Plans at or above this confidence skip human review
    pub auto_approve: f64,
    /// Agent runs below this confidence are flagged for review
    pub review: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            auto_approve: 0.7,
            review: 0.7,
        }
    }
}

/// Heartbeat and lease timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseConfig {
    /// Heartbeat publication period in seconds
    pub heartbeat_secs: u64,
    /// Lease expiry in seconds (recommended: three heartbeat periods)
    pub expiry_secs: u64,
    /// Sweeper scan period in seconds
    pub sweep_interval_secs: u64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: 15,
            expiry_secs: 45,
            sweep_interval_secs: 15,
        }
    }
}

/// Operation timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Per agent iteration
    pub agent_iteration_secs: u64,
    /// Per file-operation tool invocation
    pub file_tool_secs: u64,
    /// Per command-execution tool invocation
    pub command_tool_secs: u64,
    /// Per task phase (plan, execute, test, docs)
    pub phase_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            agent_iteration_secs: 120,
            file_tool_secs: 60,
            command_tool_secs: 300,
            phase_secs: 1200,
        }
    }
}

/// Fix-loop budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FixLoopConfig {
    /// Test-failure retries before the task fails
    pub max_test_retries: u32,
    /// Fix-child recursion depth bound
    pub max_depth: u32,
}

impl Default for FixLoopConfig {
    fn default() -> Self {
        Self {
            max_test_retries: 2,
            max_depth: 3,
        }
    }
}

/// Generative agent settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Model identifier
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Agent loop iteration budget
    pub max_iterations: u32,
    /// Coder residual re-prompts before the step fails
    pub max_residual_reprompts: u32,
    /// API base URL
    pub api_base: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 8192,
            temperature: 0.2,
            max_iterations: 8,
            max_residual_reprompts: 3,
            api_base: "https://api.anthropic.com".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
        }
    }
}

/// Retry/backoff settings for transient failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
        }
    }
}

/// Database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite path, relative to the working directory
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: ".foreman/foreman.db".to_string(),
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7070,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace | debug | info | warn | error
    pub level: String,
    /// json | pretty
    pub format: String,
    /// When set, also log to rotated files under this directory
    pub log_dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            log_dir: None,
        }
    }
}
