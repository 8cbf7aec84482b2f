//! Outbound email — `EmailSender` trait and the SMTP implementation.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use uuid::Uuid;

use crate::config::EmailConfig;
use crate::error::EmailError;

/// Result of a successful send, recorded on the email log for later
/// reply-thread correlation.
#[derive(Debug, Clone)]
pub struct SendReceipt {
    pub message_id: String,
    pub thread_id: String,
}

/// Abstraction over outbound email so the sequencer can be tested
/// without a mail server.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<SendReceipt, EmailError>;
}

/// Sender used when no SMTP host is configured. Every send fails, so
/// email logs record the attempt and the prospect stays retry-eligible.
pub struct DisabledSender;

#[async_trait]
impl EmailSender for DisabledSender {
    async fn send(&self, to: &str, _subject: &str, _html: &str) -> Result<SendReceipt, EmailError> {
        Err(EmailError::SendFailed {
            to: to.to_string(),
            reason: "email sending is not configured".into(),
        })
    }
}

/// SMTP sender backed by lettre. The transport is synchronous, so sends
/// run inside `spawn_blocking`.
pub struct SmtpEmailSender {
    config: EmailConfig,
}

impl SmtpEmailSender {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    fn send_blocking(
        config: &EmailConfig,
        to: &str,
        subject: &str,
        html: &str,
        message_id: &str,
    ) -> Result<(), EmailError> {
        let creds = Credentials::new(config.username.clone(), config.password.clone());

        let transport = SmtpTransport::relay(&config.smtp_host)
            .map_err(|e| EmailError::SendFailed {
                to: to.to_string(),
                reason: format!("SMTP relay error: {e}"),
            })?
            .port(config.smtp_port)
            .credentials(creds)
            .build();

        let email = Message::builder()
            .from(
                config
                    .from_address
                    .parse()
                    .map_err(|e| EmailError::InvalidAddress(format!("from address: {e}")))?,
            )
            .to(to
                .parse()
                .map_err(|e| EmailError::InvalidAddress(format!("to address: {e}")))?)
            .subject(subject)
            .message_id(Some(message_id.to_string()))
            .header(ContentType::TEXT_HTML)
            .body(html.to_string())
            .map_err(|e| EmailError::SendFailed {
                to: to.to_string(),
                reason: format!("Failed to build email: {e}"),
            })?;

        transport.send(&email).map_err(|e| EmailError::SendFailed {
            to: to.to_string(),
            reason: format!("SMTP send failed: {e}"),
        })?;

        Ok(())
    }
}

#[async_trait]
impl EmailSender for SmtpEmailSender {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<SendReceipt, EmailError> {
        let domain = self
            .config
            .from_address
            .rsplit('@')
            .next()
            .unwrap_or("localhost")
            .to_string();
        let message_id = format!("<{}@{domain}>", Uuid::new_v4());
        let thread_id = Uuid::new_v4().to_string();

        // Sandbox redirect reroutes to the safe inbox; the intended
        // recipient is preserved in a subject tag.
        let (dest, subject) = match self.config.sandbox_redirect.as_deref() {
            Some(redirect) => (redirect.to_string(), format!("[to: {to}] {subject}")),
            None => (to.to_string(), subject.to_string()),
        };

        let config = self.config.clone();
        let html = html.to_string();
        let mid = message_id.clone();
        let dest_for_task = dest.clone();
        tokio::task::spawn_blocking(move || {
            Self::send_blocking(&config, &dest_for_task, &subject, &html, &mid)
        })
        .await
        .map_err(|e| EmailError::SendFailed {
            to: to.to_string(),
            reason: format!("send task panicked: {e}"),
        })??;

        tracing::info!(to = %dest, message_id = %message_id, "Email sent");
        Ok(SendReceipt {
            message_id,
            thread_id,
        })
    }
}
