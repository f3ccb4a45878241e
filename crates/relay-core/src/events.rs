use serde::{Deserialize, Serialize};

use crate::ids::{QuestionId, SessionId};
use crate::session::{ConversationMessage, PendingQuestion, SessionStatus};

/// State changes fanned out to a session's subscribers.
///
/// For a single session, delivery order to a given subscriber matches the
/// order the underlying mutations were applied in.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SessionEvent {
    #[serde(rename = "message_appended")]
    MessageAppended { message: ConversationMessage },

    #[serde(rename = "question_raised")]
    QuestionRaised { question: PendingQuestion },

    #[serde(rename = "question_answered")]
    QuestionAnswered {
        session_id: SessionId,
        question_id: QuestionId,
        answer: String,
    },

    #[serde(rename = "status_changed")]
    StatusChanged {
        session_id: SessionId,
        status: SessionStatus,
    },
}

impl SessionEvent {
    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::MessageAppended { message } => &message.session_id,
            Self::QuestionRaised { question } => &question.session_id,
            Self::QuestionAnswered { session_id, .. }
            | Self::StatusChanged { session_id, .. } => session_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::MessageAppended { .. } => "message_appended",
            Self::QuestionRaised { .. } => "question_raised",
            Self::QuestionAnswered { .. } => "question_answered",
            Self::StatusChanged { .. } => "status_changed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::MessageId;
    use crate::session::Role;

    fn message(session_id: &SessionId) -> ConversationMessage {
        ConversationMessage {
            id: MessageId::new(),
            session_id: session_id.clone(),
            role: Role::Assistant,
            content: "working on it".into(),
            timestamp: "2026-01-01T00:00:00Z".into(),
            metadata: None,
        }
    }

    #[test]
    fn event_session_id() {
        let sid = SessionId::new();
        let evt = SessionEvent::MessageAppended {
            message: message(&sid),
        };
        assert_eq!(evt.session_id(), &sid);

        let evt = SessionEvent::StatusChanged {
            session_id: sid.clone(),
            status: SessionStatus::Processing,
        };
        assert_eq!(evt.session_id(), &sid);
    }

    #[test]
    fn event_type_str() {
        let evt = SessionEvent::QuestionAnswered {
            session_id: SessionId::new(),
            question_id: QuestionId::new(),
            answer: "yes".into(),
        };
        assert_eq!(evt.event_type(), "question_answered");
    }

    #[test]
    fn tagged_wire_shape() {
        let evt = SessionEvent::StatusChanged {
            session_id: SessionId::new(),
            status: SessionStatus::WaitingForInput,
        };
        let json = serde_json::to_string(&evt).unwrap();
        assert!(json.contains("\"type\":\"status_changed\""));
        assert!(json.contains("\"status\":\"waiting_for_input\""));
    }

    #[test]
    fn serde_roundtrip() {
        let sid = SessionId::new();
        let events = vec![
            SessionEvent::MessageAppended {
                message: message(&sid),
            },
            SessionEvent::QuestionAnswered {
                session_id: sid.clone(),
                question_id: QuestionId::new(),
                answer: "option 2".into(),
            },
            SessionEvent::StatusChanged {
                session_id: sid,
                status: SessionStatus::Completed,
            },
        ];

        for evt in &events {
            let json = serde_json::to_string(evt).unwrap();
            let parsed: SessionEvent = serde_json::from_str(&json).unwrap();
            let json2 = serde_json::to_string(&parsed).unwrap();
            assert_eq!(json, json2);
        }
    }
}
