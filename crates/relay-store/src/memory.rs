use std::collections::HashMap;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::instrument;

use relay_core::ids::{MessageId, QuestionId, SessionId};
use relay_core::session::{
    ConversationMessage, PendingQuestion, Session, SessionStatus,
};

use crate::error::StoreError;
use crate::store::{NewMessage, NewQuestion, NewSession, SessionStore};

/// Everything owned by one session. Deleting the session drops the whole
/// record, which is the cascade.
struct SessionRecord {
    session: Session,
    messages: Vec<ConversationMessage>,
    questions: Vec<PendingQuestion>,
    next_sequence: i64,
}

/// Process-lifetime store backed by a mutex-guarded map.
///
/// The single mutex makes each operation atomic, including the
/// `last_activity_at` bump; per-session serialization of higher-level
/// flows is the coordinator's job, not the store's.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<SessionId, SessionRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_record<T>(
        &self,
        id: &SessionId,
        f: impl FnOnce(&mut SessionRecord) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut inner = self.inner.lock();
        let record = inner
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("session {id}")))?;
        let result = f(record)?;
        record.session.last_activity_at = Utc::now().to_rfc3339();
        Ok(result)
    }
}

impl SessionStore for MemoryStore {
    #[instrument(skip(self, new), fields(repository = %new.repository))]
    fn create(&self, new: NewSession) -> Result<Session, StoreError> {
        let now = Utc::now().to_rfc3339();
        let session = Session {
            id: SessionId::new(),
            repository: new.repository,
            task_description: new.task_description,
            status: SessionStatus::Idle,
            started_at: now.clone(),
            last_activity_at: now,
            current_command: None,
        };

        self.inner.lock().insert(
            session.id.clone(),
            SessionRecord {
                session: session.clone(),
                messages: Vec::new(),
                questions: Vec::new(),
                next_sequence: 0,
            },
        );

        Ok(session)
    }

    fn get(&self, id: &SessionId) -> Result<Session, StoreError> {
        self.inner
            .lock()
            .get(id)
            .map(|r| r.session.clone())
            .ok_or_else(|| StoreError::NotFound(format!("session {id}")))
    }

    fn list(&self) -> Result<Vec<Session>, StoreError> {
        let inner = self.inner.lock();
        let mut sessions: Vec<Session> = inner.values().map(|r| r.session.clone()).collect();
        // RFC 3339 sorts lexicographically; v7 ids break created-at ties.
        sessions.sort_by(|a, b| {
            (b.started_at.as_str(), b.id.as_str()).cmp(&(a.started_at.as_str(), a.id.as_str()))
        });
        Ok(sessions)
    }

    #[instrument(skip(self), fields(session_id = %id, status = %status))]
    fn update_status(&self, id: &SessionId, status: SessionStatus) -> Result<(), StoreError> {
        self.with_record(id, |record| {
            record.session.status = status;
            Ok(())
        })
    }

    fn set_current_command(
        &self,
        id: &SessionId,
        command: Option<&str>,
    ) -> Result<(), StoreError> {
        self.with_record(id, |record| {
            record.session.current_command = command.map(str::to_owned);
            Ok(())
        })
    }

    #[instrument(skip(self, new), fields(session_id = %new.session_id, role = %new.role))]
    fn append_message(&self, new: NewMessage) -> Result<ConversationMessage, StoreError> {
        let session_id = new.session_id.clone();
        self.with_record(&session_id, |record| {
            let message = ConversationMessage {
                id: MessageId::new(),
                session_id: new.session_id,
                role: new.role,
                content: new.content,
                timestamp: Utc::now().to_rfc3339(),
                metadata: new.metadata,
            };
            record.messages.push(message.clone());
            Ok(message)
        })
    }

    fn list_messages(&self, id: &SessionId) -> Result<Vec<ConversationMessage>, StoreError> {
        self.inner
            .lock()
            .get(id)
            .map(|r| r.messages.clone())
            .ok_or_else(|| StoreError::NotFound(format!("session {id}")))
    }

    #[instrument(skip(self, new), fields(session_id = %new.session_id))]
    fn enqueue_question(&self, new: NewQuestion) -> Result<PendingQuestion, StoreError> {
        let session_id = new.session_id.clone();
        self.with_record(&session_id, |record| {
            let question = PendingQuestion {
                id: QuestionId::new(),
                session_id: new.session_id,
                question: new.question,
                question_type: new.question_type,
                options: new.options,
                asked_at: Utc::now().to_rfc3339(),
                sequence: record.next_sequence,
            };
            record.next_sequence += 1;
            record.questions.push(question.clone());
            Ok(question)
        })
    }

    #[instrument(skip(self), fields(session_id = %session_id, question_id = %question_id))]
    fn dequeue_question(
        &self,
        session_id: &SessionId,
        question_id: &QuestionId,
    ) -> Result<PendingQuestion, StoreError> {
        self.with_record(session_id, |record| {
            let idx = record
                .questions
                .iter()
                .position(|q| &q.id == question_id)
                .ok_or_else(|| StoreError::NotFound(format!("question {question_id}")))?;
            Ok(record.questions.remove(idx))
        })
    }

    fn list_questions(&self, id: &SessionId) -> Result<Vec<PendingQuestion>, StoreError> {
        self.inner
            .lock()
            .get(id)
            .map(|r| {
                let mut questions = r.questions.clone();
                questions.sort_by_key(|q| q.sequence);
                questions
            })
            .ok_or_else(|| StoreError::NotFound(format!("session {id}")))
    }

    fn clear_questions(&self, id: &SessionId) -> Result<Vec<PendingQuestion>, StoreError> {
        self.with_record(id, |record| {
            let mut drained = std::mem::take(&mut record.questions);
            drained.sort_by_key(|q| q.sequence);
            Ok(drained)
        })
    }

    #[instrument(skip(self), fields(session_id = %id))]
    fn delete(&self, id: &SessionId) -> Result<(), StoreError> {
        self.inner
            .lock()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("session {id}")))
    }
}
