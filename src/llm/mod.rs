//! Language-model integration.
//!
//! The engine talks to OpenRouter's OpenAI-compatible chat-completions API.
//! `LlmProvider` is the seam the orchestrator depends on, so tests can swap
//! in scripted providers without any network.

pub mod openrouter;

pub use openrouter::OpenRouterProvider;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;

use crate::error::{ConfigError, LlmError};

/// Default chat-completions endpoint.
pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Default completion model.
pub const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";

/// Role of a chat message sent to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
    Assistant,
    /// A tool result, keyed back to its originating call id.
    Tool,
}

/// One tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// A chat message in model context.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: Option<String>,
    /// Set on assistant turns that requested tool calls.
    pub tool_calls: Vec<ToolCallRequest>,
    /// Set on tool turns, pointing at the call being answered.
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Assistant placeholder turn recording the tool calls the model made.
    pub fn assistant_tool_calls(tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: None,
            tool_calls,
            tool_call_id: None,
        }
    }

    /// Tool-result turn answering one call.
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }
}

/// JSON schema describing one callable tool, as advertised to the model.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Model output: final text, tool calls, or (from confused models) neither.
#[derive(Debug, Clone, Default)]
pub struct ToolCompletionResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
}

/// Capability the orchestrator depends on: given messages and tool schemas,
/// return either a final text reply or one or more tool invocations.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Model identifier, for logging.
    fn model_name(&self) -> &str;

    /// One completion turn with the accumulated history and tool set.
    async fn complete_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
    ) -> Result<ToolCompletionResponse, LlmError>;
}

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: SecretString,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

impl LlmConfig {
    /// Build from environment variables. Only the API key is required.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .map_err(|_| ConfigError::MissingEnvVar("OPENROUTER_API_KEY".to_string()))?;
        let base_url = std::env::var("OPENROUTER_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model =
            std::env::var("OPENROUTER_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let timeout_ms = std::env::var("OPENROUTER_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .unwrap_or(30_000);

        Ok(Self {
            api_key: SecretString::from(api_key),
            base_url,
            model,
            timeout: Duration::from_millis(timeout_ms),
        })
    }
}

/// Create an LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let provider = OpenRouterProvider::new(config)?;
    tracing::info!("Using OpenRouter (model: {})", config.model);
    Ok(Arc::new(provider))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors_set_expected_fields() {
        let user = ChatMessage::user("find earbuds");
        assert_eq!(user.role, ChatRole::User);
        assert_eq!(user.content.as_deref(), Some("find earbuds"));
        assert!(user.tool_calls.is_empty());

        let call = ToolCallRequest {
            id: "call_1".to_string(),
            name: "search_ebay".to_string(),
            arguments: serde_json::json!({"query": "earbuds"}),
        };
        let placeholder = ChatMessage::assistant_tool_calls(vec![call.clone()]);
        assert_eq!(placeholder.role, ChatRole::Assistant);
        assert!(placeholder.content.is_none());
        assert_eq!(placeholder.tool_calls, vec![call]);

        let result = ChatMessage::tool_result("call_1", "{\"items\":[]}");
        assert_eq!(result.role, ChatRole::Tool);
        assert_eq!(result.tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn create_provider_constructs() {
        // Auth failures only surface when a request is actually made.
        let config = LlmConfig {
            api_key: SecretString::from("test-key"),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(30),
        };
        let provider = create_provider(&config);
        assert!(provider.is_ok());
        assert_eq!(provider.unwrap().model_name(), "openai/gpt-4o-mini");
    }
}
