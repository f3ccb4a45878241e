use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use relay_core::executor::{
    CommandExecutor, ExecutionContext, ExecutorError, ExecutorMessage, ExecutorQuestion,
    ExecutorResult,
};
use relay_core::ids::SessionId;
use relay_core::session::{QuestionType, Role, SessionStatus};

/// Pre-programmed outcomes for deterministic testing without a live executor.
pub enum MockOutcome {
    /// Return this result.
    Result(ExecutorResult),
    /// Return an error from the execute() call itself.
    Error(ExecutorError),
    /// Wait a duration, then yield the inner outcome.
    Delay(Duration, Box<MockOutcome>),
}

impl MockOutcome {
    /// Convenience: a single assistant message, no questions, no status change.
    pub fn assistant_text(text: &str) -> Self {
        Self::Result(ExecutorResult {
            messages: vec![ExecutorMessage {
                role: Role::Assistant,
                content: text.into(),
            }],
            ..Default::default()
        })
    }

    /// Convenience: one assistant message followed by one question.
    pub fn question(text: &str, question: &str, question_type: QuestionType) -> Self {
        Self::Result(ExecutorResult {
            messages: vec![ExecutorMessage {
                role: Role::Assistant,
                content: text.into(),
            }],
            questions: vec![ExecutorQuestion {
                question: question.into(),
                question_type,
                options: None,
            }],
            ..Default::default()
        })
    }

    /// Convenience: a message plus a terminal status.
    pub fn finished(text: &str, status: SessionStatus) -> Self {
        Self::Result(ExecutorResult {
            messages: vec![ExecutorMessage {
                role: Role::Assistant,
                content: text.into(),
            }],
            status_change: Some(status),
            ..Default::default()
        })
    }

    /// Convenience: wrap any outcome with a delay.
    pub fn delayed(delay: Duration, inner: MockOutcome) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Mock executor that returns pre-programmed outcomes in call order.
pub struct MockExecutor {
    outcomes: Vec<MockOutcome>,
    call_count: AtomicUsize,
    received: Mutex<Vec<String>>,
    /// When set, the last outcome repeats once the script is exhausted.
    repeat_last: bool,
}

impl MockExecutor {
    pub fn new(outcomes: Vec<MockOutcome>) -> Self {
        Self {
            outcomes,
            call_count: AtomicUsize::new(0),
            received: Mutex::new(Vec::new()),
            repeat_last: false,
        }
    }

    /// An executor that answers every command the same way. Used by the
    /// binary when no real executor endpoint is configured.
    pub fn always(outcome: MockOutcome) -> Self {
        Self {
            outcomes: vec![outcome],
            call_count: AtomicUsize::new(0),
            received: Mutex::new(Vec::new()),
            repeat_last: true,
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Commands received so far, in call order.
    pub fn received(&self) -> Vec<String> {
        self.received.lock().clone()
    }
}

#[async_trait]
impl CommandExecutor for MockExecutor {
    fn name(&self) -> &str {
        "mock"
    }

    async fn execute(
        &self,
        _session_id: &SessionId,
        command: &str,
        _context: ExecutionContext,
    ) -> Result<ExecutorResult, ExecutorError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.received.lock().push(command.to_string());

        let idx = if self.repeat_last && !self.outcomes.is_empty() {
            idx.min(self.outcomes.len() - 1)
        } else {
            idx
        };

        let Some(outcome) = self.outcomes.get(idx) else {
            return Err(ExecutorError::InvalidRequest(format!(
                "MockExecutor: no outcome configured for call {idx}"
            )));
        };

        resolve_outcome(outcome).await
    }
}

/// Resolve a MockOutcome, handling Delay by sleeping first.
async fn resolve_outcome(outcome: &MockOutcome) -> Result<ExecutorResult, ExecutorError> {
    let mut current = outcome;
    loop {
        match current {
            MockOutcome::Result(result) => return Ok(result.clone()),
            MockOutcome::Error(e) => return Err(e.clone()),
            MockOutcome::Delay(duration, inner) => {
                tokio::time::sleep(*duration).await;
                current = inner;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> ExecutionContext {
        ExecutionContext {
            repository: "acme/widgets".into(),
            task_description: None,
            history: vec![],
        }
    }

    #[tokio::test]
    async fn scripted_outcomes_in_order() {
        let mock = MockExecutor::new(vec![
            MockOutcome::assistant_text("first"),
            MockOutcome::assistant_text("second"),
        ]);

        let r1 = mock
            .execute(&SessionId::new(), "go", context())
            .await
            .unwrap();
        assert_eq!(r1.messages[0].content, "first");

        let r2 = mock
            .execute(&SessionId::new(), "go again", context())
            .await
            .unwrap();
        assert_eq!(r2.messages[0].content, "second");
        assert_eq!(mock.call_count(), 2);
        assert_eq!(mock.received(), vec!["go", "go again"]);
    }

    #[tokio::test]
    async fn exhausted_script_errors() {
        let mock = MockExecutor::new(vec![MockOutcome::assistant_text("only one")]);
        let _ = mock.execute(&SessionId::new(), "a", context()).await;
        let result = mock.execute(&SessionId::new(), "b", context()).await;
        assert!(matches!(result, Err(ExecutorError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn always_repeats_last_outcome() {
        let mock = MockExecutor::always(MockOutcome::finished("done", SessionStatus::Completed));
        for _ in 0..3 {
            let result = mock
                .execute(&SessionId::new(), "anything", context())
                .await
                .unwrap();
            assert_eq!(result.status_change, Some(SessionStatus::Completed));
        }
    }

    #[tokio::test]
    async fn error_outcome() {
        let mock = MockExecutor::new(vec![MockOutcome::Error(ExecutorError::Unavailable)]);
        let result = mock.execute(&SessionId::new(), "go", context()).await;
        assert!(matches!(result, Err(ExecutorError::Unavailable)));
    }

    #[tokio::test]
    async fn delayed_outcome_waits() {
        let mock = MockExecutor::new(vec![MockOutcome::delayed(
            Duration::from_millis(50),
            MockOutcome::assistant_text("after delay"),
        )]);

        let start = std::time::Instant::now();
        let result = mock
            .execute(&SessionId::new(), "go", context())
            .await
            .unwrap();
        assert!(
            start.elapsed() >= Duration::from_millis(40),
            "delay should have waited ~50ms, got {:?}",
            start.elapsed()
        );
        assert_eq!(result.messages[0].content, "after delay");
    }

    #[tokio::test]
    async fn question_outcome_shape() {
        let mock = MockExecutor::new(vec![MockOutcome::question(
            "need input",
            "Proceed with the migration?",
            QuestionType::YesNo,
        )]);
        let result = mock
            .execute(&SessionId::new(), "migrate", context())
            .await
            .unwrap();
        assert_eq!(result.questions.len(), 1);
        assert_eq!(result.questions[0].question_type, QuestionType::YesNo);
        assert!(result.status_change.is_none());
    }
}
