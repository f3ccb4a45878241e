pub mod broadcaster;
pub mod coordinator;
pub mod error;
mod locks;
pub mod notify;
mod pipeline;

pub use broadcaster::{Broadcaster, SessionSnapshot};
pub use coordinator::{CommandReceipt, CoordinatorConfig, SessionCoordinator};
pub use error::CoordinatorError;
pub use notify::{LogNotifier, Notification, NotificationKind, Notifier, WebhookNotifier};
