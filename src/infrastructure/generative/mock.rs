//! Scripted generative client for tests.
//!
//! Replies are queued ahead of time and consumed in order, so integration
//! tests can walk a task through an exact sequence of agent decisions
//! without a network dependency.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::domain::ports::generative::{
    AgentReply, GenerativeClient, GenerativeError, StructuredRequest, ToolCallRequest,
};

#[derive(Default)]
pub struct ScriptedClient {
    structured_replies: Mutex<VecDeque<Result<Value, GenerativeError>>>,
    tool_replies: Mutex<VecDeque<Result<AgentReply, GenerativeError>>>,
    structured_prompts: Mutex<Vec<String>>,
    tool_prompts: Mutex<Vec<String>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next structured() reply.
    pub fn push_structured(&self, reply: Result<Value, GenerativeError>) {
        self.structured_replies
            .lock()
            .expect("script lock poisoned")
            .push_back(reply);
    }

    /// Queue the next tool_call() reply.
    pub fn push_tool_reply(&self, reply: Result<AgentReply, GenerativeError>) {
        self.tool_replies
            .lock()
            .expect("script lock poisoned")
            .push_back(reply);
    }

    /// Prompts seen by structured(), in order.
    pub fn structured_prompts(&self) -> Vec<String> {
        self.structured_prompts
            .lock()
            .expect("script lock poisoned")
            .clone()
    }

    /// Prompts seen by tool_call(), in order.
    pub fn tool_prompts(&self) -> Vec<String> {
        self.tool_prompts
            .lock()
            .expect("script lock poisoned")
            .clone()
    }
}

#[async_trait]
impl GenerativeClient for ScriptedClient {
    async fn structured(
        &self,
        request: &StructuredRequest,
        cancel: &CancellationToken,
    ) -> Result<Value, GenerativeError> {
        if cancel.is_cancelled() {
            return Err(GenerativeError::Cancelled);
        }
        self.structured_prompts
            .lock()
            .expect("script lock poisoned")
            .push(request.prompt.clone());

        self.structured_replies
            .lock()
            .expect("script lock poisoned")
            .pop_front()
            .unwrap_or_else(|| Err(GenerativeError::Network("script exhausted".to_string())))
    }

    async fn tool_call(
        &self,
        request: &ToolCallRequest,
        cancel: &CancellationToken,
    ) -> Result<AgentReply, GenerativeError> {
        if cancel.is_cancelled() {
            return Err(GenerativeError::Cancelled);
        }
        self.tool_prompts
            .lock()
            .expect("script lock poisoned")
            .push(request.prompt.clone());

        self.tool_replies
            .lock()
            .expect("script lock poisoned")
            .pop_front()
            .unwrap_or_else(|| Err(GenerativeError::Network("script exhausted".to_string())))
    }
}
