//! OpenRouter chat-completions provider.
//!
//! Speaks the OpenAI-compatible wire format: tool schemas go out under
//! `tools`, the model answers with either `content` or `tool_calls` whose
//! `function.arguments` is a JSON-encoded string.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::LlmError;
use crate::llm::{
    ChatMessage, ChatRole, LlmConfig, LlmProvider, ToolCallRequest, ToolCompletionResponse,
    ToolSchema,
};

const PROVIDER: &str = "openrouter";

/// How much of an error body to keep in error messages.
const ERROR_BODY_LIMIT: usize = 500;

pub struct OpenRouterProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    model: String,
    timeout: Duration,
}

impl OpenRouterProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: format!("Failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            timeout: config.timeout,
        })
    }
}

// ── Wire format ─────────────────────────────────────────────────────

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCallOut>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionDef<'a>,
}

#[derive(Serialize)]
struct WireFunctionDef<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a serde_json::Value,
}

#[derive(Serialize)]
struct WireToolCallOut {
    id: String,
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionCallOut,
}

#[derive(Serialize)]
struct WireFunctionCallOut {
    name: String,
    /// JSON-encoded arguments, per the OpenAI wire format.
    arguments: String,
}

#[derive(Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: Option<WireResponseMessage>,
}

#[derive(Deserialize)]
struct WireResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCallIn>,
}

#[derive(Deserialize)]
struct WireToolCallIn {
    id: String,
    function: WireFunctionCallIn,
}

#[derive(Deserialize)]
struct WireFunctionCallIn {
    name: String,
    #[serde(default)]
    arguments: String,
}

fn to_wire(messages: &[ChatMessage]) -> Vec<WireMessage> {
    messages
        .iter()
        .map(|m| {
            let role = match m.role {
                ChatRole::System => "system",
                ChatRole::User => "user",
                ChatRole::Assistant => "assistant",
                ChatRole::Tool => "tool",
            };
            let tool_calls = if m.tool_calls.is_empty() {
                None
            } else {
                Some(
                    m.tool_calls
                        .iter()
                        .map(|tc| WireToolCallOut {
                            id: tc.id.clone(),
                            kind: "function",
                            function: WireFunctionCallOut {
                                name: tc.name.clone(),
                                arguments: serde_json::to_string(&tc.arguments)
                                    .unwrap_or_else(|_| "{}".to_string()),
                            },
                        })
                        .collect(),
                )
            };
            WireMessage {
                role,
                content: m.content.clone(),
                tool_calls,
                tool_call_id: m.tool_call_id.clone(),
            }
        })
        .collect()
}

/// Decode one incoming tool call. Malformed argument JSON degrades to an
/// empty object so a single bad call surfaces as a tool validation error
/// instead of killing the whole turn.
fn parse_tool_call(tc: WireToolCallIn) -> ToolCallRequest {
    let arguments =
        serde_json::from_str(&tc.function.arguments).unwrap_or_else(|_| serde_json::json!({}));
    ToolCallRequest {
        id: tc.id,
        name: tc.function.name,
        arguments,
    }
}

fn truncate_body(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

#[async_trait]
impl LlmProvider for OpenRouterProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
    ) -> Result<ToolCompletionResponse, LlmError> {
        let body = WireRequest {
            model: &self.model,
            temperature: 0.6,
            messages: to_wire(messages),
            tools: tools
                .iter()
                .map(|t| WireTool {
                    kind: "function",
                    function: WireFunctionDef {
                        name: &t.name,
                        description: &t.description,
                        parameters: &t.parameters,
                    },
                })
                .collect(),
            tool_choice: if tools.is_empty() { None } else { Some("auto") },
        };

        let url = format!("{}/chat/completions", self.base_url);
        let fut = async {
            let response = self
                .client
                .post(&url)
                .bearer_auth(self.api_key.expose_secret())
                .json(&body)
                .send()
                .await
                .map_err(|e| LlmError::RequestFailed {
                    provider: PROVIDER.to_string(),
                    reason: e.to_string(),
                })?;

            let status = response.status();
            if !status.is_success() {
                let body_text = response.text().await.unwrap_or_default();
                return Err(LlmError::Status {
                    provider: PROVIDER.to_string(),
                    status: status.as_u16(),
                    body: truncate_body(&body_text, ERROR_BODY_LIMIT),
                });
            }

            response
                .json::<WireResponse>()
                .await
                .map_err(|e| LlmError::InvalidResponse {
                    provider: PROVIDER.to_string(),
                    reason: format!("body decode: {e}"),
                })
        };

        let wire = match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(LlmError::Timeout {
                    provider: PROVIDER.to_string(),
                    timeout: self.timeout,
                });
            }
        };

        let message = wire
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .ok_or_else(|| LlmError::InvalidResponse {
                provider: PROVIDER.to_string(),
                reason: "response carried no choices".to_string(),
            })?;

        let tool_calls: Vec<ToolCallRequest> =
            message.tool_calls.into_iter().map(parse_tool_call).collect();
        let content = message
            .content
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());

        debug!(
            model = %self.model,
            tool_calls = tool_calls.len(),
            has_content = content.is_some(),
            "OpenRouter completion"
        );

        Ok(ToolCompletionResponse {
            content,
            tool_calls,
        })
    }
}
