use async_trait::async_trait;
use log::info;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("push delivery failed: {0}")]
    Delivery(String),
}

/// Push-notification boundary. Callers fire and forget; a failed delivery
/// is logged and swallowed, never surfaced to the sender.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        username: &str,
        title: &str,
        body: &str,
        deep_link: &str,
    ) -> Result<(), NotifyError>;
}

/// Stand-in used when no push provider is wired up.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        username: &str,
        title: &str,
        body: &str,
        deep_link: &str,
    ) -> Result<(), NotifyError> {
        info!("push to {username}: {title} - {body} ({deep_link})");
        Ok(())
    }
}
