//! Notification side channel.
//!
//! At-most-once, best effort: the coordinator emits one notification per
//! raised question and per terminal status transition. Delivery runs in a
//! detached task; failures are logged, never surfaced, and never touch
//! session state.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use relay_core::ids::SessionId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    QuestionRaised,
    SessionCompleted,
    SessionFailed,
}

#[derive(Clone, Debug, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub session_id: SessionId,
    /// Human-readable summary, ready to render.
    pub summary: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification);
}

/// Fire the notification without waiting on it.
pub fn dispatch(notifier: &Arc<dyn Notifier>, notification: Notification) {
    let notifier = Arc::clone(notifier);
    tokio::spawn(async move {
        notifier.notify(notification).await;
    });
}

/// Logs notifications; the default when no webhook is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: Notification) {
        tracing::info!(
            session_id = %notification.session_id,
            kind = ?notification.kind,
            summary = %notification.summary,
            "notification"
        );
    }
}

/// POSTs notifications as JSON to a configured webhook.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: Notification) {
        let result = self
            .client
            .post(&self.url)
            .json(&notification)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => {
                tracing::warn!(
                    session_id = %notification.session_id,
                    status = resp.status().as_u16(),
                    "notification webhook rejected"
                );
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %notification.session_id,
                    error = %e,
                    "notification webhook unreachable"
                );
            }
        }
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Records notifications for assertions in coordinator tests.
    pub struct RecordingNotifier {
        pub sent: Mutex<Vec<Notification>>,
    }

    impl RecordingNotifier {
        pub fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, notification: Notification) {
            self.sent.lock().push(notification);
        }
    }

    #[tokio::test]
    async fn log_notifier_never_fails() {
        let notifier = LogNotifier;
        notifier
            .notify(Notification {
                kind: NotificationKind::QuestionRaised,
                session_id: SessionId::new(),
                summary: "Deploy to production?".into(),
            })
            .await;
    }

    #[tokio::test]
    async fn webhook_failure_is_swallowed() {
        // Nothing listens on port 1; delivery fails and is only logged.
        let notifier = WebhookNotifier::new("http://127.0.0.1:1/notify");
        notifier
            .notify(Notification {
                kind: NotificationKind::SessionFailed,
                session_id: SessionId::new(),
                summary: "executor timed out".into(),
            })
            .await;
    }

    #[tokio::test]
    async fn dispatch_is_fire_and_forget() {
        let recorder = Arc::new(RecordingNotifier::new());
        let notifier: Arc<dyn Notifier> = recorder.clone();

        dispatch(
            &notifier,
            Notification {
                kind: NotificationKind::SessionCompleted,
                session_id: SessionId::new(),
                summary: "done".into(),
            },
        );

        // Detached task: give it a moment to land.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(recorder.sent.lock().len(), 1);
    }

    #[test]
    fn notification_wire_shape() {
        let n = Notification {
            kind: NotificationKind::QuestionRaised,
            session_id: SessionId::from_raw("sess_x"),
            summary: "Deploy?".into(),
        };
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["kind"], "question_raised");
        assert_eq!(json["session_id"], "sess_x");
    }
}
