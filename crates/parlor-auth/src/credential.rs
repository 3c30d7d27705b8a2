use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{error, info, warn};

use parlor_db::{AccountStore, Redemption};
use parlor_types::api::normalize_email;
use parlor_types::models::Account;

use crate::error::AuthError;
use crate::mailer::Mailer;
use crate::run_blocking;
use crate::token::{digest_token, generate_token};

/// Magic links stay valid for 24 hours, compared in UTC.
pub const CREDENTIAL_TTL_HOURS: i64 = 24;

const LOGIN_SUBJECT: &str = "Your Parlor login link";

/// Issues and redeems magic-link credentials.
#[derive(Clone)]
pub struct CredentialManager {
    store: Arc<dyn AccountStore>,
    mailer: Arc<dyn Mailer>,
    public_url: String,
}

impl CredentialManager {
    pub fn new(store: Arc<dyn AccountStore>, mailer: Arc<dyn Mailer>, public_url: &str) -> Self {
        Self {
            store,
            mailer,
            public_url: public_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn verify_link(&self, token: &str) -> String {
        format!("{}/verify/{}", self.public_url, token)
    }

    pub async fn issue(&self, email: &str) -> Result<String, AuthError> {
        self.issue_at(email, Utc::now()).await
    }

    /// Mint a token for `email`, superseding any outstanding one, and mail it.
    ///
    /// The credential is persisted before delivery is attempted; on delivery
    /// failure it stays valid and `AuthError::Delivery` is returned. Issuing
    /// again simply replaces it.
    pub async fn issue_at(&self, email: &str, now: DateTime<Utc>) -> Result<String, AuthError> {
        let email = normalize_email(email);
        let token = generate_token();
        let digest = digest_token(&token);
        let expiry = now + Duration::hours(CREDENTIAL_TTL_HOURS);

        let key = email.clone();
        run_blocking(&self.store, move |store| {
            store.store_credential(&key, &digest, expiry, now)
        })
        .await?;
        info!("Issued login credential for {} (expires {})", email, expiry);

        let body = format!(
            "Click the link below to sign in. It expires in {} hours and works once.\n\n{}\n",
            CREDENTIAL_TTL_HOURS,
            self.verify_link(&token)
        );
        self.mailer
            .send(&email, LOGIN_SUBJECT, &body)
            .await
            .map_err(|e| {
                error!("Failed to deliver login link to {}: {:#}", email, e);
                AuthError::Delivery(e)
            })?;

        Ok(token)
    }

    pub async fn redeem(&self, token: &str) -> Result<Account, AuthError> {
        self.redeem_at(token, Utc::now()).await
    }

    /// Consume a token. Forged, already-used and superseded tokens all come back
    /// as `CredentialInvalid`; an expired token keeps reporting
    /// `CredentialExpired` until a new one is issued.
    pub async fn redeem_at(&self, token: &str, now: DateTime<Utc>) -> Result<Account, AuthError> {
        let digest = digest_token(token);

        match run_blocking(&self.store, move |store| store.redeem_credential(&digest, now)).await? {
            Redemption::Redeemed(account) => {
                info!("Credential redeemed for {}", account.email);
                Ok(account)
            }
            Redemption::Expired => {
                warn!("Expired credential presented");
                Err(AuthError::CredentialExpired)
            }
            Redemption::Invalid => {
                warn!("Invalid credential presented");
                Err(AuthError::CredentialInvalid)
            }
        }
    }
}
