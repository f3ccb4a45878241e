use chrono::Utc;
use rusqlite::Connection;
use tracing::instrument;

use relay_core::ids::{MessageId, QuestionId, SessionId};
use relay_core::session::{
    ConversationMessage, MessageMetadata, PendingQuestion, Session, SessionStatus,
};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;
use crate::store::{NewMessage, NewQuestion, NewSession, SessionStore};

/// Durable store backed by SQLite. The connection mutex inside `Database`
/// makes each operation atomic, `last_activity_at` bump included.
pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn open(path: &std::path::Path) -> Result<Self, StoreError> {
        Ok(Self::new(Database::open(path)?))
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self::new(Database::in_memory()?))
    }
}

/// Touch the session row, failing with NotFound for unknown ids.
fn touch_session(conn: &Connection, id: &SessionId, now: &str) -> Result<(), StoreError> {
    let rows = conn.execute(
        "UPDATE sessions SET last_activity_at = ?1 WHERE id = ?2",
        rusqlite::params![now, id.as_str()],
    )?;
    if rows == 0 {
        return Err(StoreError::NotFound(format!("session {id}")));
    }
    Ok(())
}

impl SessionStore for SqliteStore {
    #[instrument(skip(self, new), fields(repository = %new.repository))]
    fn create(&self, new: NewSession) -> Result<Session, StoreError> {
        let id = SessionId::new();
        let now = Utc::now().to_rfc3339();

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (id, repository, task_description, status, started_at, last_activity_at)
                 VALUES (?1, ?2, ?3, 'idle', ?4, ?4)",
                rusqlite::params![
                    id.as_str(),
                    new.repository,
                    new.task_description,
                    now,
                ],
            )?;

            Ok(Session {
                id,
                repository: new.repository.clone(),
                task_description: new.task_description.clone(),
                status: SessionStatus::Idle,
                started_at: now.clone(),
                last_activity_at: now,
                current_command: None,
            })
        })
    }

    #[instrument(skip(self), fields(session_id = %id))]
    fn get(&self, id: &SessionId) -> Result<Session, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, repository, task_description, status, started_at, last_activity_at, current_command
                 FROM sessions WHERE id = ?1",
            )?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_session(row),
                None => Err(StoreError::NotFound(format!("session {id}"))),
            }
        })
    }

    fn list(&self) -> Result<Vec<Session>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, repository, task_description, status, started_at, last_activity_at, current_command
                 FROM sessions ORDER BY started_at DESC, id DESC",
            )?;
            let mut rows = stmt.query([])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_session(row)?);
            }
            Ok(results)
        })
    }

    #[instrument(skip(self), fields(session_id = %id, status = %status))]
    fn update_status(&self, id: &SessionId, status: SessionStatus) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            let rows = conn.execute(
                "UPDATE sessions SET status = ?1, last_activity_at = ?2 WHERE id = ?3",
                rusqlite::params![status.to_string(), now, id.as_str()],
            )?;
            if rows == 0 {
                return Err(StoreError::NotFound(format!("session {id}")));
            }
            Ok(())
        })
    }

    fn set_current_command(
        &self,
        id: &SessionId,
        command: Option<&str>,
    ) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            let rows = conn.execute(
                "UPDATE sessions SET current_command = ?1, last_activity_at = ?2 WHERE id = ?3",
                rusqlite::params![command, now, id.as_str()],
            )?;
            if rows == 0 {
                return Err(StoreError::NotFound(format!("session {id}")));
            }
            Ok(())
        })
    }

    #[instrument(skip(self, new), fields(session_id = %new.session_id, role = %new.role))]
    fn append_message(&self, new: NewMessage) -> Result<ConversationMessage, StoreError> {
        let id = MessageId::new();
        let now = Utc::now().to_rfc3339();
        let metadata_json = new
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.db.with_conn(|conn| {
            touch_session(conn, &new.session_id, &now)?;

            conn.execute(
                "INSERT INTO messages (id, session_id, role, content, timestamp, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    id.as_str(),
                    new.session_id.as_str(),
                    new.role.to_string(),
                    new.content,
                    now,
                    metadata_json,
                ],
            )?;

            Ok(ConversationMessage {
                id,
                session_id: new.session_id.clone(),
                role: new.role,
                content: new.content.clone(),
                timestamp: now.clone(),
                metadata: new.metadata.clone(),
            })
        })
    }

    fn list_messages(&self, id: &SessionId) -> Result<Vec<ConversationMessage>, StoreError> {
        self.db.with_conn(|conn| {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM sessions WHERE id = ?1)",
                [id.as_str()],
                |row| row.get(0),
            )?;
            if !exists {
                return Err(StoreError::NotFound(format!("session {id}")));
            }

            // Insertion order: v7 message ids are time-ordered and unique,
            // so `id` is a stable canonical sort key.
            let mut stmt = conn.prepare(
                "SELECT id, session_id, role, content, timestamp, metadata
                 FROM messages WHERE session_id = ?1 ORDER BY id ASC",
            )?;
            let mut rows = stmt.query([id.as_str()])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_message(row)?);
            }
            Ok(results)
        })
    }

    #[instrument(skip(self, new), fields(session_id = %new.session_id))]
    fn enqueue_question(&self, new: NewQuestion) -> Result<PendingQuestion, StoreError> {
        let id = QuestionId::new();
        let now = Utc::now().to_rfc3339();
        let options_json = new
            .options
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.db.with_conn(|conn| {
            touch_session(conn, &new.session_id, &now)?;

            // High-water mark lives on the session row so sequences stay
            // monotonic even after the queue has drained.
            let sequence: i64 = conn.query_row(
                "SELECT next_question_sequence FROM sessions WHERE id = ?1",
                [new.session_id.as_str()],
                |row| row.get(0),
            )?;
            conn.execute(
                "UPDATE sessions SET next_question_sequence = ?1 WHERE id = ?2",
                rusqlite::params![sequence + 1, new.session_id.as_str()],
            )?;

            conn.execute(
                "INSERT INTO questions (id, session_id, question, question_type, options, asked_at, sequence)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    id.as_str(),
                    new.session_id.as_str(),
                    new.question,
                    new.question_type.to_string(),
                    options_json,
                    now,
                    sequence,
                ],
            )?;

            Ok(PendingQuestion {
                id,
                session_id: new.session_id.clone(),
                question: new.question.clone(),
                question_type: new.question_type,
                options: new.options.clone(),
                asked_at: now.clone(),
                sequence,
            })
        })
    }

    #[instrument(skip(self), fields(session_id = %session_id, question_id = %question_id))]
    fn dequeue_question(
        &self,
        session_id: &SessionId,
        question_id: &QuestionId,
    ) -> Result<PendingQuestion, StoreError> {
        self.db.with_conn(|conn| {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM sessions WHERE id = ?1)",
                [session_id.as_str()],
                |row| row.get(0),
            )?;
            if !exists {
                return Err(StoreError::NotFound(format!("session {session_id}")));
            }

            let mut stmt = conn.prepare(
                "SELECT id, session_id, question, question_type, options, asked_at, sequence
                 FROM questions WHERE id = ?1 AND session_id = ?2",
            )?;
            let mut rows = stmt.query(rusqlite::params![
                question_id.as_str(),
                session_id.as_str()
            ])?;
            let question = match rows.next()? {
                Some(row) => row_to_question(row)?,
                None => {
                    return Err(StoreError::NotFound(format!("question {question_id}")));
                }
            };
            drop(rows);
            drop(stmt);

            conn.execute(
                "DELETE FROM questions WHERE id = ?1",
                [question_id.as_str()],
            )?;
            let now = Utc::now().to_rfc3339();
            touch_session(conn, session_id, &now)?;

            Ok(question)
        })
    }

    fn list_questions(&self, id: &SessionId) -> Result<Vec<PendingQuestion>, StoreError> {
        self.db.with_conn(|conn| {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM sessions WHERE id = ?1)",
                [id.as_str()],
                |row| row.get(0),
            )?;
            if !exists {
                return Err(StoreError::NotFound(format!("session {id}")));
            }

            let mut stmt = conn.prepare(
                "SELECT id, session_id, question, question_type, options, asked_at, sequence
                 FROM questions WHERE session_id = ?1 ORDER BY sequence ASC",
            )?;
            let mut rows = stmt.query([id.as_str()])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_question(row)?);
            }
            Ok(results)
        })
    }

    fn clear_questions(&self, id: &SessionId) -> Result<Vec<PendingQuestion>, StoreError> {
        self.db.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            touch_session(conn, id, &now)?;

            let mut stmt = conn.prepare(
                "SELECT id, session_id, question, question_type, options, asked_at, sequence
                 FROM questions WHERE session_id = ?1 ORDER BY sequence ASC",
            )?;
            let mut rows = stmt.query([id.as_str()])?;
            let mut drained = Vec::new();
            while let Some(row) = rows.next()? {
                drained.push(row_to_question(row)?);
            }
            drop(rows);
            drop(stmt);

            conn.execute(
                "DELETE FROM questions WHERE session_id = ?1",
                [id.as_str()],
            )?;

            Ok(drained)
        })
    }

    /// Hard delete — children first, then the session row.
    #[instrument(skip(self), fields(session_id = %id))]
    fn delete(&self, id: &SessionId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM messages WHERE session_id = ?1",
                [id.as_str()],
            )?;
            conn.execute(
                "DELETE FROM questions WHERE session_id = ?1",
                [id.as_str()],
            )?;
            let rows = conn.execute("DELETE FROM sessions WHERE id = ?1", [id.as_str()])?;
            if rows == 0 {
                return Err(StoreError::NotFound(format!("session {id}")));
            }
            Ok(())
        })
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> Result<Session, StoreError> {
    let status_str: String = row_helpers::get(row, 3, "sessions", "status")?;

    Ok(Session {
        id: SessionId::from_raw(row_helpers::get::<String>(row, 0, "sessions", "id")?),
        repository: row_helpers::get(row, 1, "sessions", "repository")?,
        task_description: row_helpers::get_opt(row, 2, "sessions", "task_description")?,
        status: row_helpers::parse_enum(&status_str, "sessions", "status")?,
        started_at: row_helpers::get(row, 4, "sessions", "started_at")?,
        last_activity_at: row_helpers::get(row, 5, "sessions", "last_activity_at")?,
        current_command: row_helpers::get_opt(row, 6, "sessions", "current_command")?,
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<ConversationMessage, StoreError> {
    let role_str: String = row_helpers::get(row, 2, "messages", "role")?;
    let metadata: Option<MessageMetadata> =
        match row_helpers::get_opt::<String>(row, 5, "messages", "metadata")? {
            Some(raw) => Some(row_helpers::parse_json(&raw, "messages", "metadata")?),
            None => None,
        };

    Ok(ConversationMessage {
        id: MessageId::from_raw(row_helpers::get::<String>(row, 0, "messages", "id")?),
        session_id: SessionId::from_raw(row_helpers::get::<String>(
            row, 1, "messages", "session_id",
        )?),
        role: row_helpers::parse_enum(&role_str, "messages", "role")?,
        content: row_helpers::get(row, 3, "messages", "content")?,
        timestamp: row_helpers::get(row, 4, "messages", "timestamp")?,
        metadata,
    })
}

fn row_to_question(row: &rusqlite::Row<'_>) -> Result<PendingQuestion, StoreError> {
    let type_str: String = row_helpers::get(row, 3, "questions", "question_type")?;
    let options: Option<Vec<String>> =
        match row_helpers::get_opt::<String>(row, 4, "questions", "options")? {
            Some(raw) => Some(row_helpers::parse_json(&raw, "questions", "options")?),
            None => None,
        };

    Ok(PendingQuestion {
        id: QuestionId::from_raw(row_helpers::get::<String>(row, 0, "questions", "id")?),
        session_id: SessionId::from_raw(row_helpers::get::<String>(
            row, 1, "questions", "session_id",
        )?),
        question: row_helpers::get(row, 2, "questions", "question")?,
        question_type: row_helpers::parse_enum(&type_str, "questions", "question_type")?,
        options,
        asked_at: row_helpers::get(row, 5, "questions", "asked_at")?,
        sequence: row_helpers::get(row, 6, "questions", "sequence")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::session::{MessageMetadata, QuestionType, Role};

    fn store() -> SqliteStore {
        SqliteStore::in_memory().unwrap()
    }

    fn new_session(store: &SqliteStore) -> Session {
        store
            .create(NewSession {
                repository: "acme/widgets".into(),
                task_description: None,
            })
            .unwrap()
    }

    fn user_message(session_id: &SessionId, content: &str) -> NewMessage {
        NewMessage {
            session_id: session_id.clone(),
            role: Role::User,
            content: content.into(),
            metadata: None,
        }
    }

    fn yes_no_question(session_id: &SessionId, text: &str) -> NewQuestion {
        NewQuestion {
            session_id: session_id.clone(),
            question: text.into(),
            question_type: QuestionType::YesNo,
            options: None,
        }
    }

    #[test]
    fn create_and_get_roundtrip() {
        let store = store();
        let session = new_session(&store);
        let fetched = store.get(&session.id).unwrap();
        assert_eq!(fetched.id, session.id);
        assert_eq!(fetched.repository, "acme/widgets");
        assert_eq!(fetched.status, SessionStatus::Idle);
    }

    #[test]
    fn get_unknown_session_fails() {
        let store = store();
        let result = store.get(&SessionId::from_raw("sess_nonexistent"));
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn list_orders_newest_first() {
        let store = store();
        let first = new_session(&store);
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = new_session(&store);

        let all = store.list().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, second.id);
        assert_eq!(all[1].id, first.id);
    }

    #[test]
    fn update_status_persists_and_bumps_activity() {
        let store = store();
        let session = new_session(&store);
        std::thread::sleep(std::time::Duration::from_millis(5));

        store
            .update_status(&session.id, SessionStatus::Processing)
            .unwrap();
        let fetched = store.get(&session.id).unwrap();
        assert_eq!(fetched.status, SessionStatus::Processing);
        assert!(fetched.last_activity_at > session.last_activity_at);
    }

    #[test]
    fn update_status_unknown_session_fails() {
        let store = store();
        let result = store.update_status(&SessionId::new(), SessionStatus::Error);
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn current_command_roundtrip() {
        let store = store();
        let session = new_session(&store);
        store
            .set_current_command(&session.id, Some("run the linter"))
            .unwrap();
        assert_eq!(
            store.get(&session.id).unwrap().current_command.as_deref(),
            Some("run the linter")
        );
    }

    #[test]
    fn messages_keep_insertion_order() {
        let store = store();
        let session = new_session(&store);

        for i in 0..5 {
            store
                .append_message(user_message(&session.id, &format!("message {i}")))
                .unwrap();
        }

        let messages = store.list_messages(&session.id).unwrap();
        assert_eq!(messages.len(), 5);
        for (i, msg) in messages.iter().enumerate() {
            assert_eq!(msg.content, format!("message {i}"));
        }
    }

    #[test]
    fn message_metadata_survives_roundtrip() {
        let store = store();
        let session = new_session(&store);
        let qid = QuestionId::new();

        store
            .append_message(NewMessage {
                session_id: session.id.clone(),
                role: Role::User,
                content: "yes".into(),
                metadata: Some(MessageMetadata {
                    correlation_id: Some("cmd-1".into()),
                    answers_question: Some(qid.clone()),
                    ..Default::default()
                }),
            })
            .unwrap();

        let messages = store.list_messages(&session.id).unwrap();
        let meta = messages[0].metadata.as_ref().unwrap();
        assert_eq!(meta.correlation_id.as_deref(), Some("cmd-1"));
        assert_eq!(meta.answers_question, Some(qid));
    }

    #[test]
    fn append_to_unknown_session_fails() {
        let store = store();
        let result = store.append_message(user_message(&SessionId::new(), "hello"));
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn question_sequences_are_monotonic() {
        let store = store();
        let session = new_session(&store);

        let q0 = store
            .enqueue_question(yes_no_question(&session.id, "first?"))
            .unwrap();
        let q1 = store
            .enqueue_question(yes_no_question(&session.id, "second?"))
            .unwrap();
        assert_eq!(q0.sequence, 0);
        assert_eq!(q1.sequence, 1);

        let pending = store.list_questions(&session.id).unwrap();
        assert_eq!(pending[0].question, "first?");
        assert_eq!(pending[1].question, "second?");
    }

    #[test]
    fn sequence_not_reused_after_dequeue() {
        let store = store();
        let session = new_session(&store);

        let q0 = store
            .enqueue_question(yes_no_question(&session.id, "first?"))
            .unwrap();
        store.dequeue_question(&session.id, &q0.id).unwrap();

        let q1 = store
            .enqueue_question(yes_no_question(&session.id, "second?"))
            .unwrap();
        assert_eq!(q1.sequence, 1);
    }

    #[test]
    fn dequeue_twice_reports_not_found() {
        let store = store();
        let session = new_session(&store);
        let q = store
            .enqueue_question(yes_no_question(&session.id, "deploy?"))
            .unwrap();

        let dequeued = store.dequeue_question(&session.id, &q.id).unwrap();
        assert_eq!(dequeued.id, q.id);
        assert_eq!(dequeued.question, "deploy?");

        let again = store.dequeue_question(&session.id, &q.id);
        assert!(matches!(again, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn dequeue_checks_session_ownership() {
        let store = store();
        let session_a = new_session(&store);
        let session_b = new_session(&store);
        let q = store
            .enqueue_question(yes_no_question(&session_a.id, "mine?"))
            .unwrap();

        // Another session cannot answer a question it does not own.
        let result = store.dequeue_question(&session_b.id, &q.id);
        assert!(matches!(result, Err(StoreError::NotFound(_))));

        // Still answerable by the owning session.
        assert!(store.dequeue_question(&session_a.id, &q.id).is_ok());
    }

    #[test]
    fn multiple_choice_options_roundtrip() {
        let store = store();
        let session = new_session(&store);

        store
            .enqueue_question(NewQuestion {
                session_id: session.id.clone(),
                question: "which environment?".into(),
                question_type: QuestionType::MultipleChoice,
                options: Some(vec!["staging".into(), "production".into()]),
            })
            .unwrap();

        let pending = store.list_questions(&session.id).unwrap();
        assert_eq!(pending[0].question_type, QuestionType::MultipleChoice);
        assert_eq!(
            pending[0].options.as_deref(),
            Some(&["staging".to_string(), "production".to_string()][..])
        );
    }

    #[test]
    fn clear_questions_drains_queue() {
        let store = store();
        let session = new_session(&store);
        store
            .enqueue_question(yes_no_question(&session.id, "a?"))
            .unwrap();
        store
            .enqueue_question(yes_no_question(&session.id, "b?"))
            .unwrap();

        let drained = store.clear_questions(&session.id).unwrap();
        assert_eq!(drained.len(), 2);
        assert!(store.list_questions(&session.id).unwrap().is_empty());
    }

    #[test]
    fn delete_cascades_and_second_call_fails() {
        let store = store();
        let session = new_session(&store);
        store
            .append_message(user_message(&session.id, "hello"))
            .unwrap();
        store
            .enqueue_question(yes_no_question(&session.id, "sure?"))
            .unwrap();

        store.delete(&session.id).unwrap();
        assert!(matches!(
            store.get(&session.id),
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.delete(&session.id),
            Err(StoreError::NotFound(_))
        ));

        // Children are gone too, no orphan rows behind a recreated id.
        let orphans: i64 = store
            .db
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM messages WHERE session_id = ?1",
                    [session.id.as_str()],
                    |row| row.get(0),
                )
                .map_err(StoreError::from)
            })
            .unwrap();
        assert_eq!(orphans, 0);
    }

    #[test]
    fn corrupt_status_returns_corrupt_row() {
        let store = store();
        let session = new_session(&store);
        store
            .db
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE sessions SET status = 'INVALID_STATUS' WHERE id = ?1",
                    [session.id.as_str()],
                )?;
                Ok(())
            })
            .unwrap();

        let result = store.get(&session.id);
        assert!(matches!(result, Err(StoreError::CorruptRow { .. })));
    }
}
