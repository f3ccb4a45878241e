use serde::{Deserialize, Serialize};

use crate::ids::{MessageId, QuestionId, SessionId};

/// Upper bound on user-originated content (commands, answers), in chars.
pub const MAX_USER_CONTENT_CHARS: usize = 10_000;

/// Lifecycle state of a session.
///
/// `Completed` and `Error` are terminal: once entered, the only remaining
/// operation on the session is deletion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Processing,
    WaitingForInput,
    Completed,
    Error,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    /// Staying in the same non-terminal state is a no-op, not a transition.
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if self == next {
            return true;
        }
        match (self, next) {
            (Self::Idle, Self::Processing) => true,
            (Self::Processing, Self::WaitingForInput) => true,
            (Self::WaitingForInput, Self::Processing) => true,
            (_, Self::Completed) | (_, Self::Error) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Processing => write!(f, "processing"),
            Self::WaitingForInput => write!(f, "waiting_for_input"),
            Self::Completed => write!(f, "completed"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "processing" => Ok(Self::Processing),
            "waiting_for_input" => Ok(Self::WaitingForInput),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown session status: {other}")),
        }
    }
}

/// One conversation unit: a repository reference, an optional task, and the
/// evolving lifecycle state. Messages and questions are owned children.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub repository: String,
    pub task_description: Option<String>,
    pub status: SessionStatus,
    pub started_at: String,
    pub last_activity_at: String,
    pub current_command: Option<String>,
}

/// Who authored a conversation message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::System => write!(f, "system"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Optional context attached to a message at creation time.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files_touched: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Set on User messages that answer a pending question.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answers_question: Option<QuestionId>,
}

impl MessageMetadata {
    pub fn is_empty(&self) -> bool {
        self.files_touched.is_empty()
            && self.correlation_id.is_none()
            && self.answers_question.is_none()
    }
}

/// Append-only entry in a session's conversation log. Never mutated after
/// creation; insertion order is the canonical order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: MessageId,
    pub session_id: SessionId,
    pub role: Role,
    pub content: String,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
}

/// The shape of answer a question expects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    YesNo,
    MultipleChoice,
    FreeText,
    Confirmation,
}

impl std::fmt::Display for QuestionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::YesNo => write!(f, "yes_no"),
            Self::MultipleChoice => write!(f, "multiple_choice"),
            Self::FreeText => write!(f, "free_text"),
            Self::Confirmation => write!(f, "confirmation"),
        }
    }
}

impl std::str::FromStr for QuestionType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "yes_no" => Ok(Self::YesNo),
            "multiple_choice" => Ok(Self::MultipleChoice),
            "free_text" => Ok(Self::FreeText),
            "confirmation" => Ok(Self::Confirmation),
            other => Err(format!("unknown question type: {other}")),
        }
    }
}

/// A question blocking automated progress until a human answers.
/// Removed exactly once, by the answer that names its id.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PendingQuestion {
    pub id: QuestionId,
    pub session_id: SessionId,
    pub question: String,
    pub question_type: QuestionType,
    /// Present iff `question_type` is MultipleChoice; ordinal position is
    /// the option key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    pub asked_at: String,
    /// Per-session monotonic insertion counter; defines queue order
    /// independent of wall-clock precision.
    pub sequence: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Error.is_terminal());
        assert!(!SessionStatus::Idle.is_terminal());
        assert!(!SessionStatus::Processing.is_terminal());
        assert!(!SessionStatus::WaitingForInput.is_terminal());
    }

    #[test]
    fn transition_table() {
        use SessionStatus::*;
        assert!(Idle.can_transition_to(Processing));
        assert!(Processing.can_transition_to(WaitingForInput));
        assert!(WaitingForInput.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(WaitingForInput.can_transition_to(Error));
        assert!(Idle.can_transition_to(Error));

        // No path skips the processing step.
        assert!(!Idle.can_transition_to(WaitingForInput));
        assert!(!Processing.can_transition_to(Idle));
        assert!(!WaitingForInput.can_transition_to(Idle));
    }

    #[test]
    fn terminal_states_accept_nothing() {
        use SessionStatus::*;
        for next in [Idle, Processing, WaitingForInput, Completed, Error] {
            assert!(!Completed.can_transition_to(next), "Completed -> {next}");
            assert!(!Error.can_transition_to(next), "Error -> {next}");
        }
    }

    #[test]
    fn same_state_is_a_noop() {
        assert!(SessionStatus::Processing.can_transition_to(SessionStatus::Processing));
        assert!(SessionStatus::WaitingForInput.can_transition_to(SessionStatus::WaitingForInput));
    }

    #[test]
    fn status_display_and_parse_roundtrip() {
        use SessionStatus::*;
        for status in [Idle, Processing, WaitingForInput, Completed, Error] {
            let s = status.to_string();
            let parsed: SessionStatus = s.parse().unwrap();
            assert_eq!(status, parsed);
        }
        assert!("bogus".parse::<SessionStatus>().is_err());
    }

    #[test]
    fn role_parse_roundtrip() {
        for role in [Role::User, Role::Assistant, Role::System] {
            let parsed: Role = role.to_string().parse().unwrap();
            assert_eq!(role, parsed);
        }
    }

    #[test]
    fn question_type_parse_roundtrip() {
        use QuestionType::*;
        for qt in [YesNo, MultipleChoice, FreeText, Confirmation] {
            let parsed: QuestionType = qt.to_string().parse().unwrap();
            assert_eq!(qt, parsed);
        }
    }

    #[test]
    fn status_serde_uses_snake_case() {
        let json = serde_json::to_string(&SessionStatus::WaitingForInput).unwrap();
        assert_eq!(json, "\"waiting_for_input\"");
    }

    #[test]
    fn empty_metadata_is_skipped_in_json() {
        let msg = ConversationMessage {
            id: MessageId::new(),
            session_id: SessionId::new(),
            role: Role::User,
            content: "hello".into(),
            timestamp: "2026-01-01T00:00:00Z".into(),
            metadata: None,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("metadata"));
    }

    #[test]
    fn metadata_question_link_roundtrip() {
        let qid = QuestionId::new();
        let meta = MessageMetadata {
            answers_question: Some(qid.clone()),
            ..Default::default()
        };
        let json = serde_json::to_string(&meta).unwrap();
        let parsed: MessageMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.answers_question, Some(qid));
    }
}
