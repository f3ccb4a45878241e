//! Contract with the external command executor.
//!
//! The executor is an opaque collaborator: it receives a command plus the
//! session's context and eventually returns a structured result. It may
//! take arbitrary time (callers bound the wait with a timeout) and must
//! not be assumed idempotent.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::ids::SessionId;
use crate::session::{ConversationMessage, QuestionType, Role, SessionStatus};

/// Everything the executor gets to see alongside the command.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub repository: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_description: Option<String>,
    /// The conversation log so far, in canonical order.
    #[serde(default)]
    pub history: Vec<ConversationMessage>,
}

/// A message the executor wants appended to the conversation log.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutorMessage {
    pub role: Role,
    pub content: String,
}

/// A question the executor wants queued for a human answer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutorQuestion {
    pub question: String,
    pub question_type: QuestionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
}

/// Structured outcome of one executor invocation. Applied in order:
/// messages, then questions, then the optional status change.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ExecutorResult {
    #[serde(default)]
    pub messages: Vec<ExecutorMessage>,
    #[serde(default)]
    pub questions: Vec<ExecutorQuestion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_change: Option<SessionStatus>,
}

/// Typed error hierarchy for executor calls.
/// Classifies errors as fatal (don't retry), retryable, or operational.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ExecutorError {
    // Fatal — don't retry
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("malformed executor result: {0}")]
    Malformed(String),

    // Retryable
    #[error("executor error {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("executor unavailable")]
    Unavailable,
    #[error("network error: {0}")]
    Network(String),

    // Operational
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("cancelled")]
    Cancelled,
}

impl ExecutorError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ServerError { .. } | Self::Unavailable | Self::Network(_)
        )
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvalidRequest(_) | Self::Malformed(_))
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::Malformed(_) => "malformed",
            Self::ServerError { .. } => "server_error",
            Self::Unavailable => "unavailable",
            Self::Network(_) => "network",
            Self::Timeout(_) => "timeout",
            Self::Cancelled => "cancelled",
        }
    }

    /// Classify an HTTP status code into the appropriate error variant.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            400 | 422 => Self::InvalidRequest(body),
            503 => Self::Unavailable,
            500..=599 => Self::ServerError { status, body },
            _ => Self::InvalidRequest(format!("unexpected status {status}: {body}")),
        }
    }
}

/// The single operation the coordinator consumes from the executor.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Human-readable implementation name, for logs.
    fn name(&self) -> &str;

    async fn execute(
        &self,
        session_id: &SessionId,
        command: &str,
        context: ExecutionContext,
    ) -> Result<ExecutorResult, ExecutorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(ExecutorError::ServerError { status: 500, body: "err".into() }.is_retryable());
        assert!(ExecutorError::Unavailable.is_retryable());
        assert!(ExecutorError::Network("tcp".into()).is_retryable());
    }

    #[test]
    fn fatal_classification() {
        assert!(ExecutorError::InvalidRequest("bad".into()).is_fatal());
        assert!(ExecutorError::Malformed("no such role".into()).is_fatal());
    }

    #[test]
    fn not_retryable_and_not_fatal() {
        let timeout = ExecutorError::Timeout(Duration::from_secs(30));
        assert!(!timeout.is_retryable());
        assert!(!timeout.is_fatal());

        let cancelled = ExecutorError::Cancelled;
        assert!(!cancelled.is_retryable());
        assert!(!cancelled.is_fatal());
    }

    #[test]
    fn from_status_mapping() {
        assert!(ExecutorError::from_status(400, "bad request".into()).is_fatal());
        assert!(ExecutorError::from_status(422, "unprocessable".into()).is_fatal());
        assert!(ExecutorError::from_status(503, "unavailable".into()).is_retryable());
        assert!(ExecutorError::from_status(500, "internal".into()).is_retryable());
        assert!(ExecutorError::from_status(502, "bad gateway".into()).is_retryable());
    }

    #[test]
    fn error_kind_strings() {
        assert_eq!(ExecutorError::Cancelled.error_kind(), "cancelled");
        assert_eq!(ExecutorError::Unavailable.error_kind(), "unavailable");
        assert_eq!(
            ExecutorError::Malformed("x".into()).error_kind(),
            "malformed"
        );
    }

    #[test]
    fn result_deserializes_with_defaults() {
        let result: ExecutorResult = serde_json::from_str("{}").unwrap();
        assert!(result.messages.is_empty());
        assert!(result.questions.is_empty());
        assert!(result.status_change.is_none());
    }

    #[test]
    fn result_deserializes_full_shape() {
        let json = r#"{
            "messages": [{"role": "assistant", "content": "done"}],
            "questions": [{"question": "Deploy?", "question_type": "yes_no"}],
            "status_change": "completed"
        }"#;
        let result: ExecutorResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.messages.len(), 1);
        assert_eq!(result.messages[0].role, Role::Assistant);
        assert_eq!(result.questions.len(), 1);
        assert_eq!(result.questions[0].question_type, QuestionType::YesNo);
        assert_eq!(result.status_change, Some(SessionStatus::Completed));
    }
}
