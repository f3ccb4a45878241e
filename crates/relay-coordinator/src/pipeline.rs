//! Command pipeline — drives one executor round for a session.
//!
//! The executor runs outside the session lock (it may take a long time);
//! only the application of its result is serialized. Application order is
//! fixed and each effect is broadcast the moment it lands: messages in
//! the given order, then questions in the given order, then the status
//! step. Subscribers therefore see incremental progress, never one
//! batched update.

use std::sync::Arc;
use std::time::Duration;

use relay_core::events::SessionEvent;
use relay_core::executor::{CommandExecutor, ExecutionContext, ExecutorResult};
use relay_core::ids::SessionId;
use relay_core::session::{MessageMetadata, QuestionType, Role, SessionStatus};
use relay_store::{NewMessage, NewQuestion, SessionStore, StoreError};

use crate::broadcaster::Broadcaster;
use crate::locks::SessionLocks;
use crate::notify::{self, Notification, NotificationKind, Notifier};

#[derive(Clone)]
pub(crate) struct Pipeline {
    pub store: Arc<dyn SessionStore>,
    pub broadcaster: Arc<Broadcaster>,
    pub executor: Arc<dyn CommandExecutor>,
    pub notifier: Arc<dyn Notifier>,
    pub locks: Arc<SessionLocks>,
    pub executor_timeout: Duration,
}

impl Pipeline {
    /// Detach one executor round. The caller has already recorded the
    /// input as a User message; cancellation of the caller no longer
    /// affects this round.
    pub fn spawn(&self, session_id: SessionId, input: String, correlation: String) {
        let pipeline = self.clone();
        let _ = tokio::spawn(async move {
            pipeline.run(session_id, input, correlation).await;
        });
    }

    async fn run(&self, session_id: SessionId, input: String, correlation: String) {
        let context = match self.build_context(&session_id) {
            Ok(context) => context,
            Err(StoreError::NotFound(_)) => {
                tracing::debug!(session_id = %session_id, "session gone before executor round");
                return;
            }
            Err(e) => {
                tracing::error!(session_id = %session_id, error = %e, "failed to build executor context");
                return;
            }
        };

        let outcome = tokio::time::timeout(
            self.executor_timeout,
            self.executor.execute(&session_id, &input, context),
        )
        .await;

        match outcome {
            Err(_elapsed) => {
                self.fail(
                    &session_id,
                    format!(
                        "Command executor timed out after {}s.",
                        self.executor_timeout.as_secs()
                    ),
                )
                .await;
            }
            Ok(Err(e)) => {
                self.fail(&session_id, format!("Command executor failed: {e}."))
                    .await;
            }
            Ok(Ok(result)) => {
                if let Err(reason) = validate_result(&result) {
                    self.fail(
                        &session_id,
                        format!("Command executor returned a malformed result: {reason}."),
                    )
                    .await;
                } else {
                    self.apply(&session_id, result, &correlation).await;
                }
            }
        }
    }

    fn build_context(&self, session_id: &SessionId) -> Result<ExecutionContext, StoreError> {
        let session = self.store.get(session_id)?;
        let history = self.store.list_messages(session_id)?;
        Ok(ExecutionContext {
            repository: session.repository,
            task_description: session.task_description,
            history,
        })
    }

    /// Apply a validated executor result under the session lock.
    async fn apply(&self, session_id: &SessionId, result: ExecutorResult, correlation: &str) {
        let lock = self.locks.acquire(session_id);
        let _guard = lock.lock().await;

        let session = match self.store.get(session_id) {
            Ok(session) => session,
            Err(_) => {
                tracing::debug!(session_id = %session_id, "session deleted mid-round, discarding result");
                return;
            }
        };
        if session.status.is_terminal() {
            tracing::warn!(
                session_id = %session_id,
                status = %session.status,
                "discarding executor result for terminal session"
            );
            return;
        }

        if let Err(e) = self.apply_locked(session_id, session.status, result, correlation) {
            // Store failure mid-application is fatal for this round; what
            // was already applied stays applied and broadcast.
            tracing::error!(session_id = %session_id, error = %e, "failed applying executor result");
        }
    }

    fn apply_locked(
        &self,
        session_id: &SessionId,
        current: SessionStatus,
        result: ExecutorResult,
        correlation: &str,
    ) -> Result<(), StoreError> {
        for msg in result.messages {
            let appended = self.store.append_message(NewMessage {
                session_id: session_id.clone(),
                role: msg.role,
                content: msg.content,
                metadata: Some(MessageMetadata {
                    correlation_id: Some(correlation.to_string()),
                    ..Default::default()
                }),
            })?;
            self.broadcaster
                .publish(session_id, SessionEvent::MessageAppended { message: appended });
        }

        for q in result.questions {
            let question = self.store.enqueue_question(NewQuestion {
                session_id: session_id.clone(),
                question: q.question,
                question_type: q.question_type,
                options: q.options,
            })?;

            notify::dispatch(
                &self.notifier,
                Notification {
                    kind: NotificationKind::QuestionRaised,
                    session_id: session_id.clone(),
                    summary: question.question.clone(),
                },
            );
            self.broadcaster
                .publish(session_id, SessionEvent::QuestionRaised { question });
        }

        let target = match result.status_change {
            Some(status) => status,
            None => {
                if self.store.list_questions(session_id)?.is_empty() {
                    SessionStatus::Processing
                } else {
                    SessionStatus::WaitingForInput
                }
            }
        };

        if target != current {
            if target.is_terminal() {
                // Terminal states hold no pending questions.
                let _ = self.store.clear_questions(session_id)?;
            }
            self.store.update_status(session_id, target)?;
            self.broadcaster.publish(
                session_id,
                SessionEvent::StatusChanged {
                    session_id: session_id.clone(),
                    status: target,
                },
            );

            if target.is_terminal() {
                let kind = match target {
                    SessionStatus::Completed => NotificationKind::SessionCompleted,
                    _ => NotificationKind::SessionFailed,
                };
                notify::dispatch(
                    &self.notifier,
                    Notification {
                        kind,
                        session_id: session_id.clone(),
                        summary: format!("Session {target}"),
                    },
                );
            }
        }

        Ok(())
    }

    /// Recover an executor-side failure into an Error transition with an
    /// explanatory System message. The session never stays stuck in
    /// Processing, and no question is left enqueued.
    async fn fail(&self, session_id: &SessionId, detail: String) {
        let lock = self.locks.acquire(session_id);
        let _guard = lock.lock().await;

        let session = match self.store.get(session_id) {
            Ok(session) => session,
            Err(_) => return,
        };
        if session.status.is_terminal() {
            return;
        }

        tracing::warn!(session_id = %session_id, detail = %detail, "executor round failed");

        if let Err(e) = self.store.clear_questions(session_id) {
            tracing::error!(session_id = %session_id, error = %e, "failed clearing questions");
        }

        match self.store.append_message(NewMessage {
            session_id: session_id.clone(),
            role: Role::System,
            content: detail.clone(),
            metadata: None,
        }) {
            Ok(message) => {
                self.broadcaster
                    .publish(session_id, SessionEvent::MessageAppended { message });
            }
            Err(e) => {
                tracing::error!(session_id = %session_id, error = %e, "failed appending failure message");
            }
        }

        match self.store.update_status(session_id, SessionStatus::Error) {
            Ok(()) => {
                self.broadcaster.publish(
                    session_id,
                    SessionEvent::StatusChanged {
                        session_id: session_id.clone(),
                        status: SessionStatus::Error,
                    },
                );
                notify::dispatch(
                    &self.notifier,
                    Notification {
                        kind: NotificationKind::SessionFailed,
                        session_id: session_id.clone(),
                        summary: detail,
                    },
                );
            }
            Err(e) => {
                tracing::error!(session_id = %session_id, error = %e, "failed recording error status");
            }
        }
    }
}

/// Reject uninterpretable results before anything is applied; a malformed
/// result is never partially applied.
pub(crate) fn validate_result(result: &ExecutorResult) -> Result<(), String> {
    for q in &result.questions {
        if q.question.trim().is_empty() {
            return Err("question with empty text".into());
        }
        match q.question_type {
            QuestionType::MultipleChoice => {
                if q.options.as_ref().map_or(true, |o| o.is_empty()) {
                    return Err("multiple-choice question without options".into());
                }
            }
            _ => {
                if q.options.is_some() {
                    return Err(format!(
                        "options supplied for {} question",
                        q.question_type
                    ));
                }
            }
        }
    }

    match result.status_change {
        None | Some(SessionStatus::Completed) | Some(SessionStatus::Error) => Ok(()),
        Some(other) => Err(format!("illegal status change: {other}")),
    }
}
