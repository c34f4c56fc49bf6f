//! Generative client port.
//!
//! The orchestrator consumes an opaque generative client with two methods:
//! structured output (schema-constrained value) and tool calling (final text
//! or tool requests). Implementations must honor the tool-choice policy and
//! must be cancelable.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Failure modes of a generative request.
#[derive(Debug, Clone, Error)]
pub enum GenerativeError {
    #[error("Rate limited")]
    RateLimit,

    #[error("Output did not match the requested schema: {0}")]
    InvalidOutput(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Request cancelled")]
    Cancelled,
}

impl GenerativeError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimit | Self::Network(_) | Self::Timeout)
    }
}

/// Description of a callable tool, sent to the model.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Tool-choice policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolChoice {
    /// Model may answer directly or call tools
    Auto,
    /// Model must call some tool
    Required,
    /// Model must call the named tool
    Specific(String),
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolRequest {
    /// Provider-assigned call id, echoed back with the result
    pub id: String,
    pub name: String,
    pub args: Value,
}

/// One completed request/result pair in the running transcript.
#[derive(Debug, Clone)]
pub struct ToolExchange {
    pub request: ToolRequest,
    pub output: String,
    pub is_error: bool,
}

/// A schema-constrained request.
#[derive(Debug, Clone)]
pub struct StructuredRequest {
    pub system: String,
    pub prompt: String,
    pub schema: Value,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// A tool-calling request, including the transcript of prior exchanges in
/// this agent loop.
#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    pub system: String,
    pub prompt: String,
    pub exchanges: Vec<ToolExchange>,
    pub tools: Vec<ToolDescriptor>,
    pub tool_choice: ToolChoice,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// The model's reply to a tool-calling request.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentReply {
    /// Final answer text
    Final(String),
    /// One or more tool invocations to perform
    ToolRequests(Vec<ToolRequest>),
}

#[async_trait]
pub trait GenerativeClient: Send + Sync {
    /// Request a value matching `request.schema`.
    async fn structured(
        &self,
        request: &StructuredRequest,
        cancel: &CancellationToken,
    ) -> Result<Value, GenerativeError>;

    /// Request a final text or a batch of tool invocations.
    async fn tool_call(
        &self,
        request: &ToolCallRequest,
        cancel: &CancellationToken,
    ) -> Result<AgentReply, GenerativeError>;
}
