use std::path::PathBuf;

use anyhow::{Context, Result, bail};

/// Signing keys that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me",
    "change-me-to-a-random-string",
    "dev-secret-change-me",
    "secret",
];

#[derive(Debug, Clone)]
pub struct MailConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub from: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub secret_key: String,
    pub public_url: String,
    pub session_idle_hours: i64,
    pub trust_proxy: bool,
    /// Unset means magic links are only written to the log.
    pub mail: Option<MailConfig>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let secret_key = get("PARLOR_SECRET_KEY").unwrap_or_default();
        if secret_key.trim().is_empty() || PLACEHOLDER_SECRETS.contains(&secret_key.as_str()) {
            bail!("PARLOR_SECRET_KEY is unset or still a placeholder");
        }

        let port = or("PARLOR_PORT", "5000")
            .parse()
            .context("PARLOR_PORT must be a port number")?;
        let session_idle_hours: i64 = or("PARLOR_SESSION_IDLE_HOURS", "24")
            .parse()
            .context("PARLOR_SESSION_IDLE_HOURS must be a whole number of hours")?;
        if session_idle_hours <= 0 {
            bail!("PARLOR_SESSION_IDLE_HOURS must be positive");
        }

        let trust_proxy = matches!(
            or("PARLOR_TRUST_PROXY", "false").to_ascii_lowercase().as_str(),
            "1" | "true" | "yes"
        );

        let mail = get("PARLOR_MAIL_ENDPOINT")
            .filter(|e| !e.trim().is_empty())
            .map(|endpoint| MailConfig {
                endpoint,
                api_key: get("PARLOR_MAIL_API_KEY").filter(|k| !k.is_empty()),
                from: or("PARLOR_MAIL_FROM", "no-reply@localhost"),
            });

        Ok(Self {
            host: or("PARLOR_HOST", "0.0.0.0"),
            port,
            db_path: or("PARLOR_DB_PATH", "parlor.db").into(),
            secret_key,
            public_url: or("PARLOR_PUBLIC_URL", "http://localhost:5000"),
            session_idle_hours,
            trust_proxy,
            mail,
        })
    }

    pub fn secure_cookies(&self) -> bool {
        self.public_url.starts_with("https://")
    }
}
