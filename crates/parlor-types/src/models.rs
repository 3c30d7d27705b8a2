use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An email identity and its credential/handle state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub email: String,
    pub verified: bool,
    /// SHA-256 digest of the outstanding magic-link token, never the token itself.
    #[serde(skip_serializing)]
    pub credential: Option<String>,
    pub credential_expiry: Option<DateTime<Utc>>,
    pub handle: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn new(email: String, created_at: DateTime<Utc>) -> Self {
        Self {
            email,
            verified: false,
            credential: None,
            credential_expiry: None,
            handle: None,
            created_at,
        }
    }

    /// A credential stays valid up to and including its expiry instant. One
    /// without an expiry is treated as expired.
    pub fn credential_state(&self, now: DateTime<Utc>) -> CredentialState {
        match (&self.credential, self.credential_expiry) {
            (Some(_), expiry) if expiry.is_none_or(|e| now > e) => CredentialState::Expired,
            (Some(_), _) => CredentialState::Issued,
            (None, _) if self.verified => CredentialState::Redeemed,
            (None, _) => CredentialState::NoCredential,
        }
    }
}

/// Credential sub-state of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialState {
    NoCredential,
    Issued,
    Redeemed,
    Expired,
}
