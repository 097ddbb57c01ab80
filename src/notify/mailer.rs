use async_trait::async_trait;
use lettre::{transport::smtp::authentication::Credentials, Message, SmtpTransport, Transport};
use log::info;

use crate::config::EmailConfig;
use crate::shared::error::HelpdeskError;

/// Best-effort outbound channel. Callers never await delivery success to
/// complete their own operation.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), HelpdeskError>;
}

pub struct SmtpMailer {
    config: EmailConfig,
}

impl SmtpMailer {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), HelpdeskError> {
        let from = self
            .config
            .from
            .parse()
            .map_err(|e| HelpdeskError::Delivery(format!("invalid from address: {e}")))?;
        let to = to
            .parse()
            .map_err(|e| HelpdeskError::Delivery(format!("invalid recipient address: {e}")))?;

        let email = Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .body(body.to_string())
            .map_err(|e| HelpdeskError::Delivery(format!("building message: {e}")))?;

        let creds = Credentials::new(
            self.config.username.clone(),
            self.config.password.clone(),
        );
        let mailer = SmtpTransport::relay(&self.config.smtp_server)
            .map_err(|e| HelpdeskError::Delivery(format!("smtp relay: {e}")))?
            .port(self.config.smtp_port)
            .credentials(creds)
            .build();

        mailer
            .send(&email)
            .map_err(|e| HelpdeskError::Delivery(format!("smtp send: {e}")))?;
        Ok(())
    }
}

/// Stand-in channel for deployments without SMTP configured.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, _body: &str) -> Result<(), HelpdeskError> {
        info!("email delivery disabled, would send to {to}: {subject}");
        Ok(())
    }
}
