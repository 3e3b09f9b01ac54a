//! Email transports.
//!
//! [`LogMailer`] records messages to the log and is the default.
//! [`HttpMailer`] hands them to an HTTP mail relay.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use taskpulse_core::defaults::{MAIL_FROM, MAIL_RELAY_TIMEOUT_SECS};
use taskpulse_core::{Error, Mailer, OutgoingEmail, Result};

/// Which transport to build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MailerKind {
    Log,
    Http { relay_url: String },
}

/// Mail configuration.
#[derive(Debug, Clone)]
pub struct MailerConfig {
    pub kind: MailerKind,
    /// Sender address stamped on every message.
    pub from: String,
    pub timeout: Duration,
}

impl Default for MailerConfig {
    fn default() -> Self {
        Self {
            kind: MailerKind::Log,
            from: MAIL_FROM.to_string(),
            timeout: Duration::from_secs(MAIL_RELAY_TIMEOUT_SECS),
        }
    }
}

impl MailerConfig {
    /// Load from `MAILER` (`log` | `http`), `MAIL_RELAY_URL` and `MAIL_FROM`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(from) = std::env::var("MAIL_FROM") {
            if !from.trim().is_empty() {
                config.from = from;
            }
        }

        let kind = std::env::var("MAILER").unwrap_or_else(|_| "log".to_string());
        config.kind = match kind.to_lowercase().as_str() {
            "log" => MailerKind::Log,
            "http" => {
                let relay_url = std::env::var("MAIL_RELAY_URL").map_err(|_| {
                    Error::Config("MAIL_RELAY_URL is required when MAILER=http".to_string())
                })?;
                MailerKind::Http { relay_url }
            }
            other => return Err(Error::Config(format!("Unknown MAILER: {}", other))),
        };

        Ok(config)
    }

    /// Build the configured transport.
    pub fn build(&self) -> Result<Arc<dyn Mailer>> {
        match &self.kind {
            MailerKind::Log => Ok(Arc::new(LogMailer)),
            MailerKind::Http { relay_url } => {
                Ok(Arc::new(HttpMailer::new(relay_url.clone(), self.timeout)?))
            }
        }
    }
}

/// Writes each message to the log instead of sending it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<()> {
        info!(
            subsystem = "mail",
            component = "log_mailer",
            from = %email.from,
            to = %email.to,
            subject = %email.subject,
            "Email sent"
        );
        debug!(subsystem = "mail", body = %email.body, "Email body");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

#[derive(Serialize)]
struct RelayMessage<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: &'a str,
}

/// POSTs each message as JSON to a mail relay. Any non-2xx status fails.
pub struct HttpMailer {
    client: reqwest::Client,
    relay_url: String,
}

impl HttpMailer {
    pub fn new(relay_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build mail HTTP client: {}", e)))?;
        Ok(Self {
            client,
            relay_url: relay_url.into(),
        })
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<()> {
        let response = self
            .client
            .post(&self.relay_url)
            .json(&RelayMessage {
                from: &email.from,
                to: &email.to,
                subject: &email.subject,
                text: &email.body,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Delivery(format!("Mail relay returned {}", status)));
        }

        debug!(
            subsystem = "mail",
            component = "http_mailer",
            to = %email.to,
            status = status.as_u16(),
            "Email accepted by relay"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
