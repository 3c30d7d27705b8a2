//! Database row types. These map directly to SQLite rows.
//! Distinct from parlor-types models to keep the DB layer independent.
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use parlor_types::models::Account;

pub struct AccountRow {
    pub email: String,
    pub verified: bool,
    pub credential: Option<String>,
    pub credential_expiry: Option<String>,
    pub handle: Option<String>,
    pub created_at: String,
}

impl AccountRow {
    pub fn into_account(self) -> Result<Account> {
        let credential_expiry = self
            .credential_expiry
            .as_deref()
            .map(parse_timestamp)
            .transpose()
            .with_context(|| format!("corrupt credential_expiry for {}", self.email))?;
        let created_at = parse_timestamp(&self.created_at)
            .with_context(|| format!("corrupt created_at for {}", self.email))?;

        Ok(Account {
            email: self.email,
            verified: self.verified,
            credential: self.credential,
            credential_expiry,
            handle: self.handle,
            created_at,
        })
    }
}

/// Timestamps are stored as RFC 3339 UTC text.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}
