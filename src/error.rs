//! Error types for the SendCat agent engine.

use std::time::Duration;

use uuid::Uuid;

/// Top-level error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} returned status {status}: {body}")]
    Status {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Provider {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Tool execution errors.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Tool {name} not found")]
    NotFound { name: String },

    #[error("Invalid arguments for tool {name}: {reason}")]
    InvalidArguments { name: String, reason: String },

    #[error("Tool {name} execution failed: {reason}")]
    ExecutionFailed { name: String, reason: String },

    #[error("Tool {name} timed out after {timeout:?}")]
    Timeout { name: String, timeout: Duration },
}

/// External search provider errors.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("Provider {provider} auth failed: {reason}")]
    Auth { provider: String, reason: String },

    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} returned status {status}: {body}")]
    Status {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Provider {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },

    #[error("Unknown search provider: {0}")]
    UnknownProvider(String),
}

/// Job lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job {id} not found")]
    NotFound { id: Uuid },

    #[error("Job {id} already in state {state}, cannot transition to {target}")]
    InvalidTransition {
        id: Uuid,
        state: String,
        target: String,
    },

    #[error("Job {id} has no thread")]
    MissingThread { id: Uuid },

    #[error("Job {id} exceeded its {deadline:?} deadline")]
    DeadlineExceeded { id: Uuid, deadline: Duration },

    #[error("Invalid job input: {0}")]
    InvalidInput(String),
}

/// Push notification errors.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Push endpoint gone (status {status}): {endpoint}")]
    Gone { endpoint: String, status: u16 },

    #[error("Push delivery failed: {reason}")]
    Delivery { reason: String },
}

impl NotifyError {
    /// True when the subscription endpoint is permanently dead and should be pruned.
    pub fn is_gone(&self) -> bool {
        matches!(self, Self::Gone { .. })
    }
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_transition_message_names_states() {
        let id = Uuid::new_v4();
        let err = JobError::InvalidTransition {
            id,
            state: "completed".into(),
            target: "running".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("completed"));
        assert!(msg.contains("running"));
        assert!(msg.contains(&id.to_string()));
    }

    #[test]
    fn notify_gone_classification() {
        let gone = NotifyError::Gone {
            endpoint: "https://push.example/abc".into(),
            status: 410,
        };
        assert!(gone.is_gone());

        let transient = NotifyError::Delivery {
            reason: "connection reset".into(),
        };
        assert!(!transient.is_gone());
    }

    #[test]
    fn errors_wrap_into_top_level() {
        let err: Error = DatabaseError::Query("boom".into()).into();
        assert!(matches!(err, Error::Database(_)));
        assert!(err.to_string().contains("boom"));
    }
}
