//! Alert dispatch over SMTP (async lettre, STARTTLS relay).

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use salesops_core::config::EmailAlertsConfig;
use salesops_core::error::{Result, SalesOpsError};
use salesops_core::traits::NotifyTransport;

const SUBJECT_PREFIX: &str = "Sales Pipeline Alert: ";

/// Email transport built from the `email_alerts` config section.
pub struct SmtpTransport {
    server: String,
    port: u16,
    sender: String,
    password: String,
}

impl SmtpTransport {
    pub fn new(config: &EmailAlertsConfig) -> Self {
        Self {
            server: config.smtp_server.clone(),
            port: config.smtp_port,
            sender: config.sender_email.clone(),
            password: config.sender_password.clone(),
        }
    }

    /// Build one plain-text message addressed to every recipient.
    pub fn build_message(&self, subject: &str, body: &str, recipients: &[String]) -> Result<Message> {
        if recipients.is_empty() {
            return Err(SalesOpsError::Notification("no recipients configured".into()));
        }

        let from: Mailbox = format!("Sales Pipeline <{}>", self.sender)
            .parse()
            .map_err(|e| SalesOpsError::Notification(format!("Invalid from: {e}")))?;

        let mut builder = Message::builder()
            .from(from)
            .subject(format!("{SUBJECT_PREFIX}{subject}"))
            .header(ContentType::TEXT_PLAIN);

        for recipient in recipients {
            let to: Mailbox = recipient
                .parse()
                .map_err(|e| SalesOpsError::Notification(format!("Invalid to '{recipient}': {e}")))?;
            builder = builder.to(to);
        }

        builder
            .body(body.to_string())
            .map_err(|e| SalesOpsError::Notification(format!("Build email: {e}")))
    }
}

#[async_trait]
impl NotifyTransport for SmtpTransport {
    fn name(&self) -> &str {
        "email"
    }

    async fn send(&self, subject: &str, body: &str, recipients: &[String]) -> Result<()> {
        let email = self.build_message(subject, body, recipients)?;

        let creds = Credentials::new(self.sender.clone(), self.password.clone());
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.server)
            .map_err(|e| SalesOpsError::Notification(format!("SMTP relay: {e}")))?
            .port(self.port)
            .credentials(creds)
            .build();

        mailer
            .send(email)
            .await
            .map_err(|e| SalesOpsError::Notification(format!("SMTP send: {e}")))?;

        tracing::info!("📤 Alert email sent to {} recipient(s)", recipients.len());
        Ok(())
    }
}
