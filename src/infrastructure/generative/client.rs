//! HTTP generative client against an Anthropic-style messages endpoint.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::models::config::{AgentConfig, RetryConfig};
use crate::domain::ports::generative::{
    AgentReply, GenerativeClient, GenerativeError, StructuredRequest, ToolCallRequest, ToolChoice,
    ToolRequest,
};
use crate::infrastructure::generative::retry::RetryPolicy;
use crate::infrastructure::generative::types::{
    ApiErrorBody, ContentBlock, Message, MessageRequest, MessageResponse, StopReason,
    ToolChoiceBody, ToolDefinition,
};

/// Name of the synthetic tool used to force schema-shaped output.
const STRUCTURED_TOOL: &str = "record_output";

pub struct HttpGenerativeClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    retry: RetryPolicy,
}

impl HttpGenerativeClient {
    pub fn new(agent: &AgentConfig, retry: &RetryConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var(&agent.api_key_env).unwrap_or_default();
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;

        Ok(Self {
            http,
            base_url: agent.api_base.trim_end_matches('/').to_string(),
            api_key,
            model: agent.model.clone(),
            max_tokens: agent.max_tokens,
            retry: RetryPolicy::from(retry),
        })
    }

    async fn send(&self, body: &MessageRequest) -> Result<MessageResponse, GenerativeError> {
        let url = format!("{}/v1/messages", self.base_url);

        let response = self
            .http
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GenerativeError::Timeout
                } else {
                    GenerativeError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<MessageResponse>()
                .await
                .map_err(|e| GenerativeError::InvalidOutput(e.to_string()));
        }

        let detail = response
            .json::<ApiErrorBody>()
            .await
            .map(|b| b.error.message)
            .unwrap_or_else(|_| status.to_string());

        match status {
            StatusCode::TOO_MANY_REQUESTS => Err(GenerativeError::RateLimit),
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
                Err(GenerativeError::Timeout)
            }
            s if s.is_server_error() => Err(GenerativeError::Network(detail)),
            _ => Err(GenerativeError::InvalidOutput(detail)),
        }
    }

    async fn send_cancellable(
        &self,
        body: &MessageRequest,
        cancel: &CancellationToken,
    ) -> Result<MessageResponse, GenerativeError> {
        tokio::select! {
            result = self.retry.execute(|| self.send(body)) => result,
            () = cancel.cancelled() => Err(GenerativeError::Cancelled),
        }
    }

    fn transcript_messages(request: &ToolCallRequest) -> Vec<Message> {
        let mut messages = vec![Message::user_text(request.prompt.clone())];

        for exchange in &request.exchanges {
            messages.push(Message {
                role: "assistant".to_string(),
                content: vec![ContentBlock::ToolUse {
                    id: exchange.request.id.clone(),
                    name: exchange.request.name.clone(),
                    input: exchange.request.args.clone(),
                }],
            });
            messages.push(Message {
                role: "user".to_string(),
                content: vec![ContentBlock::ToolResult {
                    tool_use_id: exchange.request.id.clone(),
                    content: exchange.output.clone(),
                    is_error: exchange.is_error.then_some(true),
                }],
            });
        }

        messages
    }
}

#[async_trait]
impl GenerativeClient for HttpGenerativeClient {
    async fn structured(
        &self,
        request: &StructuredRequest,
        cancel: &CancellationToken,
    ) -> Result<Value, GenerativeError> {
        // Forcing a single tool whose schema is the requested one makes the
        // provider do the shape enforcement.
        let body = MessageRequest {
            model: self.model.clone(),
            messages: vec![Message::user_text(request.prompt.clone())],
            max_tokens: request.max_tokens.min(self.max_tokens),
            system: Some(request.system.clone()),
            temperature: Some(request.temperature),
            tools: Some(vec![ToolDefinition {
                name: STRUCTURED_TOOL.to_string(),
                description: "Record the final structured result.".to_string(),
                input_schema: request.schema.clone(),
            }]),
            tool_choice: Some(ToolChoiceBody::Tool {
                name: STRUCTURED_TOOL.to_string(),
            }),
        };

        let response = self.send_cancellable(&body, cancel).await?;
        debug!(message_id = %response.id, "structured response received");

        response
            .content
            .into_iter()
            .find_map(|block| match block {
                ContentBlock::ToolUse { name, input, .. } if name == STRUCTURED_TOOL => {
                    Some(input)
                }
                _ => None,
            })
            .ok_or_else(|| {
                GenerativeError::InvalidOutput("no structured tool call in response".to_string())
            })
    }

    async fn tool_call(
        &self,
        request: &ToolCallRequest,
        cancel: &CancellationToken,
    ) -> Result<AgentReply, GenerativeError> {
        let tools = request
            .tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.input_schema.clone(),
            })
            .collect();

        let tool_choice = match &request.tool_choice {
            ToolChoice::Auto => ToolChoiceBody::Auto,
            ToolChoice::Required => ToolChoiceBody::Any,
            ToolChoice::Specific(name) => ToolChoiceBody::Tool { name: name.clone() },
        };

        let body = MessageRequest {
            model: self.model.clone(),
            messages: Self::transcript_messages(request),
            max_tokens: request.max_tokens.min(self.max_tokens),
            system: Some(request.system.clone()),
            temperature: Some(request.temperature),
            tools: Some(tools),
            tool_choice: Some(tool_choice),
        };

        let response = self.send_cancellable(&body, cancel).await?;

        if response.stop_reason == Some(StopReason::ToolUse) {
            let requests: Vec<ToolRequest> = response
                .content
                .into_iter()
                .filter_map(|block| match block {
                    ContentBlock::ToolUse { id, name, input } => Some(ToolRequest {
                        id,
                        name,
                        args: input,
                    }),
                    _ => None,
                })
                .collect();

            if requests.is_empty() {
                return Err(GenerativeError::InvalidOutput(
                    "tool_use stop without tool_use blocks".to_string(),
                ));
            }
            return Ok(AgentReply::ToolRequests(requests));
        }

        Ok(AgentReply::Final(response.text()))
    }
}
