use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use queue::{MessageHandler, QueueMessage};
use tracing::{info, instrument};

/// Simulated latency of the email provider
const DEFAULT_SEND_DELAY: Duration = Duration::from_millis(100);

/// Handles order notifications taken off the queue
///
/// Sending is simulated: the processor waits for the configured delay and
/// logs the email it would have sent.
pub struct NotificationProcessor {
    send_delay: Duration,
}

impl NotificationProcessor {
    /// Creates a new `NotificationProcessor`
    #[must_use]
    pub const fn new(send_delay: Duration) -> Self {
        Self { send_delay }
    }

    #[instrument(name = "send_notification", skip_all, fields(notification.channel = "email"))]
    async fn send_email(&self, notification: &QueueMessage) -> anyhow::Result<()> {
        anyhow::ensure!(
            !notification.user_name.trim().is_empty(),
            "Notification for order {} has no recipient",
            notification.order_id
        );

        info!("Sending email notification");
        tokio::time::sleep(self.send_delay).await;
        info!(
            user_name = %notification.user_name,
            order_id = notification.order_id,
            "Email sent"
        );

        Ok(())
    }
}

impl Default for NotificationProcessor {
    fn default() -> Self {
        Self::new(DEFAULT_SEND_DELAY)
    }
}

#[async_trait]
impl MessageHandler for NotificationProcessor {
    #[instrument(
        name = "process_notification",
        skip_all,
        fields(
            notification.kind = %message.kind,
            notification.order_id = message.order_id,
            notification.user_id = message.user_id,
        )
    )]
    async fn handle(&self, message: QueueMessage) -> anyhow::Result<()> {
        info!(total = message.total, "Notification received from queue");

        self.send_email(&message).await?;

        info!("Notification processed successfully");
        counter!("notification_delivered").increment(1);

        Ok(())
    }
}
