use std::env;

use crate::shared::error::HelpdeskError;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database_url: String,
    pub email: EmailConfig,
    pub sla: SlaConfig,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct EmailConfig {
    pub smtp_server: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
    pub enabled: bool,
}

#[derive(Clone, Debug)]
pub struct SlaConfig {
    /// Seconds between background detection passes.
    pub sweep_interval_secs: u64,
    /// Upper bound on tickets escalated concurrently within one pass.
    pub worker_limit: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, HelpdeskError> {
        let database_url = env::var("DATABASE_URL").map_err(|_| {
            HelpdeskError::Validation("DATABASE_URL must be set".to_string())
        })?;

        let smtp_server = env::var("SMTP_SERVER").unwrap_or_default();
        let email = EmailConfig {
            enabled: !smtp_server.is_empty(),
            smtp_server,
            smtp_port: parse_var("SMTP_PORT", 587)?,
            username: env::var("SMTP_USERNAME").unwrap_or_default(),
            password: env::var("SMTP_PASSWORD").unwrap_or_default(),
            from: env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "helpdesk@localhost".to_string()),
        };

        Ok(Self {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_var("SERVER_PORT", 8080)?,
            },
            database_url,
            email,
            sla: SlaConfig {
                sweep_interval_secs: parse_var("SLA_SWEEP_INTERVAL_SECS", 300)?,
                worker_limit: parse_var("SLA_WORKER_LIMIT", 8)?,
            },
        })
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, HelpdeskError> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| HelpdeskError::Validation(format!("invalid value for {name}: {raw}"))),
        Err(_) => Ok(default),
    }
}
