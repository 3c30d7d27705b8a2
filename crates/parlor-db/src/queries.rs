use crate::Database;
use crate::models::{AccountRow, format_timestamp};
use crate::store::{HandleClaim, Redemption};
use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode};

use parlor_types::models::CredentialState;

impl Database {
    // -- Accounts --

    pub fn get_account(&self, email: &str) -> Result<Option<AccountRow>> {
        self.with_conn(|conn| query_account(conn, "email = ?1", email))
    }

    pub fn get_account_by_credential(&self, digest: &str) -> Result<Option<AccountRow>> {
        self.with_conn(|conn| query_account(conn, "credential = ?1", digest))
    }

    /// Create the account if it does not exist yet, then return it.
    pub fn insert_account_if_absent(&self, email: &str, now: DateTime<Utc>) -> Result<AccountRow> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO accounts (email, created_at) VALUES (?1, ?2)",
                (email, format_timestamp(now)),
            )?;
            query_account(conn, "email = ?1", email)?
                .ok_or_else(|| anyhow!("Account missing after insert: {}", email))
        })
    }

    // -- Credentials --

    /// Bind a fresh credential to the account, creating it on first sight. Any
    /// previous credential is overwritten and the account drops back to unverified.
    pub fn store_credential(
        &self,
        email: &str,
        digest: &str,
        expiry: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<AccountRow> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO accounts (email, verified, credential, credential_expiry, created_at)
                 VALUES (?1, 0, ?2, ?3, ?4)
                 ON CONFLICT(email) DO UPDATE SET
                     verified = 0,
                     credential = excluded.credential,
                     credential_expiry = excluded.credential_expiry",
                (email, digest, format_timestamp(expiry), format_timestamp(now)),
            )?;
            query_account(conn, "email = ?1", email)?
                .ok_or_else(|| anyhow!("Account missing after credential upsert: {}", email))
        })
    }

    /// Compare-and-clear redemption. The lookup, expiry check and clearing update
    /// run in one transaction on the single writer, and the update itself is guarded
    /// by `credential = ?`, so only one caller can ever consume a given token.
    pub fn redeem_credential(&self, digest: &str, now: DateTime<Utc>) -> Result<Redemption> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;

            let Some(row) = query_account(&tx, "credential = ?1", digest)? else {
                return Ok(Redemption::Invalid);
            };
            let account = row.into_account()?;

            if account.credential_state(now) == CredentialState::Expired {
                // Left in place: repeated attempts keep reporting expiry.
                return Ok(Redemption::Expired);
            }

            let changed = tx.execute(
                "UPDATE accounts
                 SET verified = 1, credential = NULL, credential_expiry = NULL
                 WHERE email = ?1 AND credential = ?2",
                (&account.email, digest),
            )?;
            if changed != 1 {
                return Ok(Redemption::Invalid);
            }

            let redeemed = query_account(&tx, "email = ?1", &account.email)?
                .ok_or_else(|| anyhow!("Account missing after redemption: {}", account.email))?
                .into_account()?;
            tx.commit()?;

            Ok(Redemption::Redeemed(redeemed))
        })
    }

    // -- Handles --

    /// Relies on the UNIQUE index on `handle`; a collision surfaces as a
    /// constraint violation rather than a separate existence check.
    pub fn claim_handle(&self, email: &str, handle: &str) -> Result<HandleClaim> {
        self.with_conn(|conn| {
            match conn.execute(
                "UPDATE accounts SET handle = ?2 WHERE email = ?1",
                (email, handle),
            ) {
                Ok(0) => Ok(HandleClaim::UnknownAccount),
                Ok(_) => Ok(HandleClaim::Claimed),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == ErrorCode::ConstraintViolation =>
                {
                    Ok(HandleClaim::Taken)
                }
                Err(e) => Err(e.into()),
            }
        })
    }
}

fn query_account(conn: &Connection, predicate: &str, value: &str) -> Result<Option<AccountRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT email, verified, credential, credential_expiry, handle, created_at
         FROM accounts WHERE {}",
        predicate
    ))?;

    let row = stmt
        .query_row([value], |row| {
            Ok(AccountRow {
                email: row.get(0)?,
                verified: row.get(1)?,
                credential: row.get(2)?,
                credential_expiry: row.get(3)?,
                handle: row.get(4)?,
                created_at: row.get(5)?,
            })
        })
        .optional()?;

    Ok(row)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
