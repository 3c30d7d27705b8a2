use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};

use parlor_types::models::{Account, CredentialState};

use crate::store::{AccountStore, HandleClaim, Redemption};

/// In-memory account store with the same contract as the SQLite backing.
/// One mutex guards both the account map and the handle index, which is what
/// makes `set_handle_if_free` and `redeem_credential` atomic.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    accounts: HashMap<String, Account>,
    /// handle -> owning email
    handles: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryInner>> {
        self.inner
            .lock()
            .map_err(|e| anyhow!("Memory store lock poisoned: {}", e))
    }
}

impl AccountStore for MemoryStore {
    fn get(&self, email: &str) -> Result<Option<Account>> {
        Ok(self.lock()?.accounts.get(email).cloned())
    }

    fn upsert(&self, email: &str, now: DateTime<Utc>) -> Result<Account> {
        let mut inner = self.lock()?;
        let account = inner
            .accounts
            .entry(email.to_string())
            .or_insert_with(|| Account::new(email.to_string(), now));
        Ok(account.clone())
    }

    fn store_credential(
        &self,
        email: &str,
        digest: &str,
        expiry: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Account> {
        let mut inner = self.lock()?;
        let account = inner
            .accounts
            .entry(email.to_string())
            .or_insert_with(|| Account::new(email.to_string(), now));
        account.verified = false;
        account.credential = Some(digest.to_string());
        account.credential_expiry = Some(expiry);
        Ok(account.clone())
    }

    fn find_by_credential(&self, digest: &str) -> Result<Option<Account>> {
        Ok(self
            .lock()?
            .accounts
            .values()
            .find(|a| a.credential.as_deref() == Some(digest))
            .cloned())
    }

    fn redeem_credential(&self, digest: &str, now: DateTime<Utc>) -> Result<Redemption> {
        let mut inner = self.lock()?;
        let Some(account) = inner
            .accounts
            .values_mut()
            .find(|a| a.credential.as_deref() == Some(digest))
        else {
            return Ok(Redemption::Invalid);
        };

        if account.credential_state(now) == CredentialState::Expired {
            return Ok(Redemption::Expired);
        }

        account.verified = true;
        account.credential = None;
        account.credential_expiry = None;
        Ok(Redemption::Redeemed(account.clone()))
    }

    fn set_handle_if_free(&self, email: &str, handle: &str) -> Result<HandleClaim> {
        let mut inner = self.lock()?;
        if !inner.accounts.contains_key(email) {
            return Ok(HandleClaim::UnknownAccount);
        }
        match inner.handles.get(handle) {
            Some(owner) if owner != email => return Ok(HandleClaim::Taken),
            _ => {}
        }

        let previous = inner
            .accounts
            .get_mut(email)
            .and_then(|a| a.handle.replace(handle.to_string()));
        if let Some(previous) = previous {
            inner.handles.remove(&previous);
        }
        inner.handles.insert(handle.to_string(), email.to_string());
        Ok(HandleClaim::Claimed)
    }
}
