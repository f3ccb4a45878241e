//! The substitutable storage contract behind the coordinator.
//!
//! Two backings implement this trait: `MemoryStore` (process-lifetime) and
//! `SqliteStore` (survives restart). The coordinator only ever talks to
//! `dyn SessionStore`, so the choice is wiring, not design.

use relay_core::ids::{QuestionId, SessionId};
use relay_core::session::{
    ConversationMessage, MessageMetadata, PendingQuestion, QuestionType, Role, Session,
    SessionStatus,
};

use crate::error::StoreError;

/// Payload for creating a session. Id, timestamps, and initial status are
/// assigned by the store.
#[derive(Clone, Debug)]
pub struct NewSession {
    pub repository: String,
    pub task_description: Option<String>,
}

/// Payload for appending a message. Id and timestamp are assigned by the
/// store at insertion, which fixes the canonical order.
#[derive(Clone, Debug)]
pub struct NewMessage {
    pub session_id: SessionId,
    pub role: Role,
    pub content: String,
    pub metadata: Option<MessageMetadata>,
}

/// Payload for enqueuing a question. Id, asked_at, and the per-session
/// sequence number are assigned by the store.
#[derive(Clone, Debug)]
pub struct NewQuestion {
    pub session_id: SessionId,
    pub question: String,
    pub question_type: QuestionType,
    pub options: Option<Vec<String>>,
}

/// Keyed storage for sessions and their owned children.
///
/// Every mutating operation updates the session's `last_activity_at` as
/// part of the same logical unit. Unknown session or question ids surface
/// as `StoreError::NotFound`, never as silent success.
pub trait SessionStore: Send + Sync {
    fn create(&self, new: NewSession) -> Result<Session, StoreError>;

    fn get(&self, id: &SessionId) -> Result<Session, StoreError>;

    /// All sessions, ordered by `started_at` descending (newest first).
    fn list(&self) -> Result<Vec<Session>, StoreError>;

    fn update_status(&self, id: &SessionId, status: SessionStatus) -> Result<(), StoreError>;

    fn set_current_command(
        &self,
        id: &SessionId,
        command: Option<&str>,
    ) -> Result<(), StoreError>;

    fn append_message(&self, new: NewMessage) -> Result<ConversationMessage, StoreError>;

    /// Messages in insertion order, the canonical conversation order.
    fn list_messages(&self, id: &SessionId) -> Result<Vec<ConversationMessage>, StoreError>;

    /// Appends to the session's question queue, assigning the next
    /// per-session sequence number.
    fn enqueue_question(&self, new: NewQuestion) -> Result<PendingQuestion, StoreError>;

    /// Removes and returns the named question. A second call for the same
    /// id reports NotFound: an answer is processed at most once.
    fn dequeue_question(
        &self,
        session_id: &SessionId,
        question_id: &QuestionId,
    ) -> Result<PendingQuestion, StoreError>;

    /// Pending questions in ascending sequence order.
    fn list_questions(&self, id: &SessionId) -> Result<Vec<PendingQuestion>, StoreError>;

    /// Drains the queue, returning what was pending. Used when a session
    /// enters a terminal state.
    fn clear_questions(&self, id: &SessionId) -> Result<Vec<PendingQuestion>, StoreError>;

    /// Deletes the session and all owned messages and questions. A second
    /// call reports NotFound.
    fn delete(&self, id: &SessionId) -> Result<(), StoreError>;
}
