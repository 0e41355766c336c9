// Email notifications: queue publisher and the consuming dispatcher

use crate::core::errors::QueueError;
use crate::core::models::EmailNotification;
use crate::queue::{HandlerError, MessageHandler, MessageQueue, DEFAULT_EXCHANGE, NOTIFICATIONS_QUEUE};
use crate::services::mail::{Mailer, OutgoingEmail, TemplateRenderer};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Publishes email notifications onto the notifications queue
pub struct NotificationPublisher {
    queue: Arc<MessageQueue>,
    from: String,
}

impl NotificationPublisher {
    pub fn new(queue: Arc<MessageQueue>, from: impl Into<String>) -> Self {
        Self {
            queue,
            from: from.into(),
        }
    }

    pub async fn publish(&self, notification: &EmailNotification) -> Result<(), QueueError> {
        let body = serde_json::to_vec(notification).map_err(|e| QueueError::Malformed(e.to_string()))?;
        self.queue.publish(DEFAULT_EXCHANGE, NOTIFICATIONS_QUEUE, &body).await
    }

    /// Publish a templated email from the configured sender address
    pub async fn notify(
        &self,
        to: &str,
        subject: &str,
        template_name: &str,
        data: Value,
    ) -> Result<(), QueueError> {
        let notification = EmailNotification {
            from: self.from.clone(),
            to: vec![to.to_string()],
            subject: subject.to_string(),
            template_name: template_name.to_string(),
            data,
        };
        self.publish(&notification).await
    }
}

/// Consumes the notifications queue: render, then send
///
/// Payloads that cannot be decoded are acknowledged and dropped, since
/// redelivery would never fix them. Rendering and sending failures are
/// returned as handler errors, which requeues the message. An unknown template
/// therefore retries until the template is deployed.
pub struct NotificationDispatcher {
    renderer: Arc<dyn TemplateRenderer>,
    mailer: Arc<dyn Mailer>,
}

impl NotificationDispatcher {
    pub fn new(renderer: Arc<dyn TemplateRenderer>, mailer: Arc<dyn Mailer>) -> Self {
        Self { renderer, mailer }
    }

    /// Declare the notifications queue and start consuming it
    pub async fn start(self: Arc<Self>, queue: &MessageQueue) -> Result<(), QueueError> {
        queue.declare_queue(NOTIFICATIONS_QUEUE).await?;
        queue.consume(NOTIFICATIONS_QUEUE, self).await?;
        info!(queue = NOTIFICATIONS_QUEUE, "Notification dispatcher started");
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for NotificationDispatcher {
    async fn handle(&self, body: &[u8]) -> Result<(), HandlerError> {
        let notification: EmailNotification = match serde_json::from_slice(body) {
            Ok(notification) => notification,
            Err(e) => {
                error!(error = %e, bytes = body.len(), "Dropping undecodable notification");
                return Ok(());
            }
        };

        if notification.to.is_empty() {
            error!(template = %notification.template_name, "Dropping notification without recipients");
            return Ok(());
        }

        let html = self
            .renderer
            .render(&notification.template_name, &notification.data)
            .map_err(|e| HandlerError::new(e.to_string()))?;

        let email = OutgoingEmail {
            from: notification.from,
            to: notification.to,
            subject: notification.subject,
            html,
        };
        self.mailer
            .send(&email)
            .await
            .map_err(|e| HandlerError::new(e.to_string()))?;

        debug!(template = %notification.template_name, recipients = email.to.len(), "Notification sent");
        Ok(())
    }
}
