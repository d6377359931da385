//! Operator alerts. Best-effort, never fails the caller.
//! Lightweight: no queue, no retry. Send once, log the outcome, move on.

use salesops_core::config::EmailAlertsConfig;
use salesops_core::traits::NotifyTransport;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Max alerts kept in the in-memory history.
const HISTORY_LIMIT: usize = 100;

/// What happened to an alert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum DeliveryStatus {
    Sent,
    /// Notifications are disabled; nothing was sent.
    Suppressed,
    Failed(String),
}

/// An alert the notifier handled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// Failure category, used as the subject.
    pub title: String,
    pub body: String,
    pub status: DeliveryStatus,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Sends alerts for named failure categories.
pub struct Notifier {
    settings: EmailAlertsConfig,
    transport: Option<Arc<dyn NotifyTransport>>,
    timeout: Duration,
    history: Mutex<Vec<Notification>>,
}

impl Notifier {
    pub fn new(
        settings: EmailAlertsConfig,
        transport: Option<Arc<dyn NotifyTransport>>,
        timeout: Duration,
    ) -> Self {
        Self {
            settings,
            transport,
            timeout,
            history: Mutex::new(Vec::new()),
        }
    }

    /// A notifier that never sends anything.
    pub fn disabled() -> Self {
        Self::new(EmailAlertsConfig::default(), None, Duration::from_secs(0))
    }

    pub fn enabled(&self) -> bool {
        self.settings.enabled && self.transport.is_some()
    }

    /// Deliver an alert. Every failure is logged and swallowed.
    pub async fn alert(&self, subject: &str, body: &str) {
        let status = match (&self.transport, self.settings.enabled) {
            (Some(transport), true) => self.deliver(transport.as_ref(), subject, body).await,
            (None, true) => {
                tracing::warn!("⚠️ Alert '{subject}' not sent: no transport configured");
                DeliveryStatus::Failed("no transport configured".into())
            }
            (_, false) => {
                tracing::debug!("🔕 Alerts disabled, suppressed '{subject}'");
                DeliveryStatus::Suppressed
            }
        };
        self.record(Notification {
            title: subject.to_string(),
            body: body.to_string(),
            status,
            timestamp: chrono::Utc::now(),
        });
    }

    async fn deliver(&self, transport: &dyn NotifyTransport, subject: &str, body: &str) -> DeliveryStatus {
        let send = transport.send(subject, body, &self.settings.recipients);
        match tokio::time::timeout(self.timeout, send).await {
            Ok(Ok(())) => {
                tracing::info!("📣 Alert sent via {}: {subject}", transport.name());
                DeliveryStatus::Sent
            }
            Ok(Err(e)) => {
                tracing::error!("❌ Failed to send alert '{subject}' via {}: {e}", transport.name());
                DeliveryStatus::Failed(e.to_string())
            }
            Err(_) => {
                tracing::error!(
                    "❌ Alert '{subject}' via {} timed out after {}s",
                    transport.name(),
                    self.timeout.as_secs()
                );
                DeliveryStatus::Failed(format!("timed out after {}s", self.timeout.as_secs()))
            }
        }
    }

    fn record(&self, notification: Notification) {
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history.push(notification);
        // Ring buffer: keep the most recent
        if history.len() > HISTORY_LIMIT {
            history.remove(0);
        }
    }

    /// Alerts handled so far, oldest first.
    pub fn history(&self) -> Vec<Notification> {
        self.history.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
