use anyhow::Result;
use chrono::{DateTime, Utc};

use parlor_types::models::Account;

use crate::Database;

/// Outcome of presenting a credential digest for redemption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redemption {
    Redeemed(Account),
    Expired,
    Invalid,
}

/// Outcome of an atomic handle claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleClaim {
    Claimed,
    Taken,
    UnknownAccount,
}

/// Keyed account record store. Pure data access: callers own the business rules,
/// implementations own atomicity of the credential and handle mutations.
///
/// Emails passed in are expected to be normalized already.
pub trait AccountStore: Send + Sync {
    fn get(&self, email: &str) -> Result<Option<Account>>;

    fn upsert(&self, email: &str, now: DateTime<Utc>) -> Result<Account>;

    fn store_credential(
        &self,
        email: &str,
        digest: &str,
        expiry: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Account>;

    fn find_by_credential(&self, digest: &str) -> Result<Option<Account>>;

    fn redeem_credential(&self, digest: &str, now: DateTime<Utc>) -> Result<Redemption>;

    fn set_handle_if_free(&self, email: &str, handle: &str) -> Result<HandleClaim>;
}

impl AccountStore for Database {
    fn get(&self, email: &str) -> Result<Option<Account>> {
        self.get_account(email)?.map(|row| row.into_account()).transpose()
    }

    fn upsert(&self, email: &str, now: DateTime<Utc>) -> Result<Account> {
        self.insert_account_if_absent(email, now)?.into_account()
    }

    fn store_credential(
        &self,
        email: &str,
        digest: &str,
        expiry: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Account> {
        Database::store_credential(self, email, digest, expiry, now)?.into_account()
    }

    fn find_by_credential(&self, digest: &str) -> Result<Option<Account>> {
        self.get_account_by_credential(digest)?
            .map(|row| row.into_account())
            .transpose()
    }

    fn redeem_credential(&self, digest: &str, now: DateTime<Utc>) -> Result<Redemption> {
        Database::redeem_credential(self, digest, now)
    }

    fn set_handle_if_free(&self, email: &str, handle: &str) -> Result<HandleClaim> {
        self.claim_handle(email, handle)
    }
}
