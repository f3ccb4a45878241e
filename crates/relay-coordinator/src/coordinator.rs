//! Session lifecycle coordinator.
//!
//! Owns session state transitions and serializes concurrent mutations per
//! session. Every accepted mutation is broadcast to the session's
//! subscriber group in application order; executor rounds are handed off
//! to the pipeline without blocking the caller's acknowledgment.

use std::sync::Arc;
use std::time::Duration;

use tracing::instrument;

use relay_core::events::SessionEvent;
use relay_core::executor::CommandExecutor;
use relay_core::ids::{MessageId, QuestionId, SessionId};
use relay_core::session::{
    ConversationMessage, MessageMetadata, PendingQuestion, Role, Session, SessionStatus,
    MAX_USER_CONTENT_CHARS,
};
use relay_store::{NewMessage, NewSession, SessionStore};

use crate::broadcaster::Broadcaster;
use crate::error::CoordinatorError;
use crate::locks::SessionLocks;
use crate::notify::Notifier;
use crate::pipeline::Pipeline;

#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    /// Upper bound on one executor round. On expiry the session moves to
    /// Error rather than sitting in Processing indefinitely.
    pub executor_timeout: Duration,
    /// Length bound for user-originated content (commands, answers).
    pub max_input_chars: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            executor_timeout: Duration::from_secs(120),
            max_input_chars: MAX_USER_CONTENT_CHARS,
        }
    }
}

/// Acknowledgment returned once a command or answer has been recorded.
/// The executor round it triggered completes asynchronously.
#[derive(Clone, Debug)]
pub struct CommandReceipt {
    pub command_id: MessageId,
}

pub struct SessionCoordinator {
    store: Arc<dyn SessionStore>,
    broadcaster: Arc<Broadcaster>,
    locks: Arc<SessionLocks>,
    pipeline: Pipeline,
    config: CoordinatorConfig,
}

impl SessionCoordinator {
    pub fn new(
        store: Arc<dyn SessionStore>,
        broadcaster: Arc<Broadcaster>,
        executor: Arc<dyn CommandExecutor>,
        notifier: Arc<dyn Notifier>,
        config: CoordinatorConfig,
    ) -> Self {
        let locks = Arc::new(SessionLocks::new());
        let pipeline = Pipeline {
            store: Arc::clone(&store),
            broadcaster: Arc::clone(&broadcaster),
            executor,
            notifier,
            locks: Arc::clone(&locks),
            executor_timeout: config.executor_timeout,
        };

        Self {
            store,
            broadcaster,
            locks,
            pipeline,
            config,
        }
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    /// Create a fresh Idle session. Always succeeds.
    #[instrument(skip(self, task_description), fields(repository = %repository))]
    pub fn start_session(
        &self,
        repository: &str,
        task_description: Option<String>,
    ) -> Result<Session, CoordinatorError> {
        let session = self.store.create(NewSession {
            repository: repository.to_string(),
            task_description,
        })?;
        tracing::info!(session_id = %session.id, "session started");
        Ok(session)
    }

    pub fn get_session(&self, session_id: &SessionId) -> Result<Session, CoordinatorError> {
        Ok(self.store.get(session_id)?)
    }

    /// All sessions, newest first.
    pub fn list_sessions(&self) -> Result<Vec<Session>, CoordinatorError> {
        Ok(self.store.list()?)
    }

    /// The conversation log in canonical order.
    pub fn list_messages(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<ConversationMessage>, CoordinatorError> {
        Ok(self.store.list_messages(session_id)?)
    }

    /// Unanswered questions in queue order.
    pub fn pending_questions(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<PendingQuestion>, CoordinatorError> {
        Ok(self.store.list_questions(session_id)?)
    }

    /// Record a command, move the session to Processing, and hand the
    /// executor round to the pipeline. Returns as soon as the command is
    /// recorded and broadcast; the executor's response arrives later.
    #[instrument(skip(self, command), fields(session_id = %session_id))]
    pub async fn submit_command(
        &self,
        session_id: &SessionId,
        command: &str,
    ) -> Result<CommandReceipt, CoordinatorError> {
        self.validate_input(command, "command")?;

        let lock = self.locks.acquire(session_id);
        let _guard = lock.lock().await;

        let session = self.store.get(session_id)?;
        match session.status {
            SessionStatus::Idle | SessionStatus::Processing => {}
            SessionStatus::WaitingForInput => {
                return Err(CoordinatorError::InvalidState(
                    "session is waiting for an answer to a pending question".into(),
                ));
            }
            status => {
                return Err(CoordinatorError::InvalidState(format!(
                    "session is {status} and accepts no further commands"
                )));
            }
        }

        let message = self.store.append_message(NewMessage {
            session_id: session_id.clone(),
            role: Role::User,
            content: command.to_string(),
            metadata: None,
        })?;
        self.store
            .set_current_command(session_id, Some(command))?;

        self.broadcaster.publish(
            session_id,
            SessionEvent::MessageAppended {
                message: message.clone(),
            },
        );

        if session.status == SessionStatus::Idle {
            self.store
                .update_status(session_id, SessionStatus::Processing)?;
            self.broadcaster.publish(
                session_id,
                SessionEvent::StatusChanged {
                    session_id: session_id.clone(),
                    status: SessionStatus::Processing,
                },
            );
        }

        drop(_guard);

        // Detached: the caller's cancellation cannot abort the round now.
        self.pipeline.spawn(
            session_id.clone(),
            command.to_string(),
            message.id.to_string(),
        );

        Ok(CommandReceipt {
            command_id: message.id,
        })
    }

    /// Answer one pending question. The question is removed exactly once;
    /// re-answering the same id reports NotFound. The session leaves
    /// WaitingForInput only when its queue drains.
    #[instrument(skip(self, answer), fields(session_id = %session_id, question_id = %question_id))]
    pub async fn submit_answer(
        &self,
        session_id: &SessionId,
        question_id: &QuestionId,
        answer: &str,
    ) -> Result<CommandReceipt, CoordinatorError> {
        self.validate_input(answer, "answer")?;

        let lock = self.locks.acquire(session_id);
        let _guard = lock.lock().await;

        let session = self.store.get(session_id)?;
        if session.status.is_terminal() {
            return Err(CoordinatorError::InvalidState(format!(
                "session is {} and accepts no further answers",
                session.status
            )));
        }

        let question = self.store.dequeue_question(session_id, question_id)?;

        let message = self.store.append_message(NewMessage {
            session_id: session_id.clone(),
            role: Role::User,
            content: answer.to_string(),
            metadata: Some(MessageMetadata {
                answers_question: Some(question.id.clone()),
                ..Default::default()
            }),
        })?;
        self.store.set_current_command(session_id, Some(answer))?;

        self.broadcaster.publish(
            session_id,
            SessionEvent::MessageAppended {
                message: message.clone(),
            },
        );
        self.broadcaster.publish(
            session_id,
            SessionEvent::QuestionAnswered {
                session_id: session_id.clone(),
                question_id: question.id,
                answer: answer.to_string(),
            },
        );

        let queue_empty = self.store.list_questions(session_id)?.is_empty();
        if queue_empty && session.status == SessionStatus::WaitingForInput {
            self.store
                .update_status(session_id, SessionStatus::Processing)?;
            self.broadcaster.publish(
                session_id,
                SessionEvent::StatusChanged {
                    session_id: session_id.clone(),
                    status: SessionStatus::Processing,
                },
            );
        }

        drop(_guard);

        self.pipeline.spawn(
            session_id.clone(),
            answer.to_string(),
            message.id.to_string(),
        );

        Ok(CommandReceipt {
            command_id: message.id,
        })
    }

    /// Delete the session and everything it owns. A repeat call reports
    /// NotFound, which callers treat as already-stopped.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn stop_session(&self, session_id: &SessionId) -> Result<(), CoordinatorError> {
        let lock = self.locks.acquire(session_id);
        let _guard = lock.lock().await;

        self.store.delete(session_id)?;
        self.broadcaster.drop_group(session_id);

        drop(_guard);
        self.locks.remove(session_id);

        tracing::info!(session_id = %session_id, "session stopped");
        Ok(())
    }

    fn validate_input(&self, text: &str, what: &str) -> Result<(), CoordinatorError> {
        if text.is_empty() {
            return Err(CoordinatorError::InvalidArgument(format!(
                "{what} must not be empty"
            )));
        }
        let chars = text.chars().count();
        if chars > self.config.max_input_chars {
            return Err(CoordinatorError::InvalidArgument(format!(
                "{what} exceeds {} chars (got {chars})",
                self.config.max_input_chars
            )));
        }
        Ok(())
    }
}
