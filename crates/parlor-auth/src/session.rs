use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::{debug, info};
use uuid::Uuid;
use validator::Validate;

use parlor_db::{AccountStore, HandleClaim};
use parlor_types::api::{SessionClaims, SetHandleRequest};
use parlor_types::models::Account;

use crate::error::AuthError;
use crate::run_blocking;

/// Upper bound on a session cookie's lifetime, independent of idle expiry.
const SESSION_MAX_DAYS: i64 = 30;

/// A client session bound to a verified email identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: Uuid,
    pub email: String,
}

struct SessionEntry {
    email: String,
    last_seen: DateTime<Utc>,
}

/// Binds redeemed credentials to sessions and gates room access on the
/// account's current state.
#[derive(Clone)]
pub struct SessionBinder {
    inner: Arc<SessionBinderInner>,
}

struct SessionBinderInner {
    store: Arc<dyn AccountStore>,
    secret: String,
    idle_timeout: Duration,
    sessions: Mutex<HashMap<Uuid, SessionEntry>>,
}

impl SessionBinder {
    pub fn new(store: Arc<dyn AccountStore>, secret: &str, idle_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(SessionBinderInner {
                store,
                secret: secret.to_string(),
                idle_timeout,
                sessions: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn establish(&self, account: &Account) -> Result<Session, AuthError> {
        self.establish_at(account, Utc::now())
    }

    /// Register a new session for a freshly redeemed account. A session is only
    /// handed out once it is in the registry.
    pub fn establish_at(&self, account: &Account, now: DateTime<Utc>) -> Result<Session, AuthError> {
        let mut sessions = self.lock_sessions()?;
        let session = Session {
            id: Uuid::new_v4(),
            email: account.email.clone(),
        };
        sessions.insert(
            session.id,
            SessionEntry {
                email: session.email.clone(),
                last_seen: now,
            },
        );
        info!("Session {} established for {}", session.id, session.email);
        Ok(session)
    }

    fn lock_sessions(&self) -> Result<MutexGuard<'_, HashMap<Uuid, SessionEntry>>, AuthError> {
        self.inner
            .sessions
            .lock()
            .map_err(|e| AuthError::Storage(anyhow::anyhow!("session lock poisoned: {}", e)))
    }

    /// Sign a session into a cookie-safe token.
    pub fn encode(&self, session: &Session) -> anyhow::Result<String> {
        let claims = SessionClaims {
            sub: session.email.clone(),
            sid: session.id,
            exp: (Utc::now() + Duration::days(SESSION_MAX_DAYS)).timestamp() as usize,
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.inner.secret.as_bytes()),
        )?;

        Ok(token)
    }

    /// Recover a session from a cookie token. Liveness is not checked here.
    pub fn decode(&self, token: &str) -> Option<Session> {
        let data = decode::<SessionClaims>(
            token,
            &DecodingKey::from_secret(self.inner.secret.as_bytes()),
            &Validation::default(),
        )
        .ok()?;

        Some(Session {
            id: data.claims.sid,
            email: data.claims.sub,
        })
    }

    pub fn logout(&self, session: &Session) {
        if let Ok(mut sessions) = self.inner.sessions.lock() {
            if sessions.remove(&session.id).is_some() {
                info!("Session {} logged out", session.id);
            }
        }
    }

    /// Mark the session active, or fail if it was logged out or went idle.
    fn touch(&self, session: &Session, now: DateTime<Utc>) -> Result<(), AuthError> {
        let mut sessions = self.lock_sessions()?;

        let Some(entry) = sessions.get_mut(&session.id) else {
            return Err(AuthError::NotAuthenticated);
        };
        if entry.email != session.email {
            return Err(AuthError::NotAuthenticated);
        }
        if now - entry.last_seen > self.inner.idle_timeout {
            sessions.remove(&session.id);
            debug!("Session {} expired after inactivity", session.id);
            return Err(AuthError::NotAuthenticated);
        }

        entry.last_seen = now;
        Ok(())
    }

    async fn fetch_account(&self, email: &str) -> Result<Account, AuthError> {
        let email = email.to_string();
        run_blocking(&self.inner.store, move |store| store.get(&email))
            .await?
            .ok_or(AuthError::NotAuthenticated)
    }

    /// The live session's account, without the room-access preconditions.
    pub async fn current_account(&self, session: &Session) -> Result<Account, AuthError> {
        self.touch(session, Utc::now())?;
        self.fetch_account(&session.email).await
    }

    pub async fn require_room_access(&self, session: Option<&Session>) -> Result<Account, AuthError> {
        self.require_room_access_at(session, Utc::now()).await
    }

    /// Re-read the account behind the session and report the first missing
    /// precondition: authentication, then verification, then a handle.
    pub async fn require_room_access_at(
        &self,
        session: Option<&Session>,
        now: DateTime<Utc>,
    ) -> Result<Account, AuthError> {
        let session = session.ok_or(AuthError::NotAuthenticated)?;
        self.touch(session, now)?;

        let account = self.fetch_account(&session.email).await?;
        if !account.verified {
            return Err(AuthError::NotVerified);
        }
        if account.handle.is_none() {
            return Err(AuthError::NoHandle);
        }
        Ok(account)
    }

    /// Claim `proposed` as the session account's handle. Uniqueness is enforced
    /// by the store in the same step as the write.
    pub async fn set_handle(&self, session: Option<&Session>, proposed: &str) -> Result<Account, AuthError> {
        let session = session.ok_or(AuthError::NotAuthenticated)?;
        self.touch(session, Utc::now())?;

        let request = SetHandleRequest {
            handle: proposed.trim().to_string(),
        };
        request.validate().map_err(|_| {
            AuthError::Validation(
                "Handles are 3-32 characters: letters, digits, '_' or '-'.".into(),
            )
        })?;

        let account = self.fetch_account(&session.email).await?;
        if !account.verified {
            return Err(AuthError::NotVerified);
        }

        let email = account.email.clone();
        let handle = request.handle.clone();
        let claim = run_blocking(&self.inner.store, move |store| {
            store.set_handle_if_free(&email, &handle)
        })
        .await?;

        match claim {
            HandleClaim::Claimed => {
                info!("{} is now known as {}", account.email, request.handle);
                self.fetch_account(&account.email).await
            }
            HandleClaim::Taken => Err(AuthError::HandleTaken),
            HandleClaim::UnknownAccount => Err(AuthError::NotAuthenticated),
        }
    }

    /// Forget sessions idle past the timeout. Returns the ids removed so live
    /// connections bound to them can be evicted.
    pub fn sweep(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        let Ok(mut sessions) = self.lock_sessions() else {
            return Vec::new();
        };
        let idle = self.inner.idle_timeout;
        let expired: Vec<Uuid> = sessions
            .iter()
            .filter(|(_, entry)| now - entry.last_seen > idle)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            sessions.remove(id);
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use parlor_db::{Database, MemoryStore};

    use super::*;
    use crate::credential::CredentialManager;
    use crate::mailer::RecordingMailer;

    struct Harness {
        credentials: CredentialManager,
        binder: SessionBinder,
    }

    fn harness(store: Arc<dyn AccountStore>) -> Harness {
        let mailer = Arc::new(RecordingMailer::new());
        Harness {
            credentials: CredentialManager::new(store.clone(), mailer, "http://parlor.test"),
            binder: SessionBinder::new(store, "test-secret", Duration::hours(24)),
        }
    }

    impl Harness {
        async fn verified_session(&self, email: &str) -> Session {
            let token = self.credentials.issue(email).await.unwrap();
            let account = self.credentials.redeem(&token).await.unwrap();
            self.binder.establish(&account).unwrap()
        }
    }

    #[tokio::test]
    async fn login_scenario_walks_every_gate() {
        let h = harness(Arc::new(Database::open_in_memory().unwrap()));

        assert_matches!(h.binder.require_room_access(None).await, Err(AuthError::NotAuthenticated));

        let token = h.credentials.issue("a@x.com").await.unwrap();
        let account = h.credentials.redeem(&token).await.unwrap();
        assert!(account.verified);
        assert!(account.handle.is_none());

        let session = h.binder.establish(&account).unwrap();
        assert_matches!(h.binder.require_room_access(Some(&session)).await, Err(AuthError::NoHandle));

        let account = h.binder.set_handle(Some(&session), "alice").await.unwrap();
        assert_eq!(account.handle.as_deref(), Some("alice"));
        assert_matches!(h.binder.require_room_access(Some(&session)).await, Ok(a) if a.email == "a@x.com");

        assert_matches!(h.credentials.redeem(&token).await, Err(AuthError::CredentialInvalid));
    }

    #[tokio::test]
    async fn reissue_revokes_verification() {
        let h = harness(Arc::new(MemoryStore::new()));
        let session = h.verified_session("a@x.com").await;
        h.binder.set_handle(Some(&session), "alice").await.unwrap();

        h.credentials.issue("a@x.com").await.unwrap();
        assert_matches!(h.binder.require_room_access(Some(&session)).await, Err(AuthError::NotVerified));
    }

    #[tokio::test]
    async fn unverified_account_cannot_claim_handle() {
        let h = harness(Arc::new(MemoryStore::new()));
        let session = h.verified_session("a@x.com").await;
        h.credentials.issue("a@x.com").await.unwrap();

        assert_matches!(
            h.binder.set_handle(Some(&session), "alice").await,
            Err(AuthError::NotVerified)
        );
    }

    #[tokio::test]
    async fn concurrent_handle_claims() {
        let h = harness(Arc::new(Database::open_in_memory().unwrap()));
        let b = h.verified_session("b@x.com").await;
        let c = h.verified_session("c@x.com").await;

        let (rb, rc) = tokio::join!(
            h.binder.set_handle(Some(&b), "bob"),
            h.binder.set_handle(Some(&c), "bob"),
        );
        let results = [rb, rc];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(AuthError::HandleTaken)))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn malformed_handle_is_a_validation_error() {
        let h = harness(Arc::new(MemoryStore::new()));
        let session = h.verified_session("a@x.com").await;
        assert_matches!(
            h.binder.set_handle(Some(&session), "no spaces please").await,
            Err(AuthError::Validation(_))
        );
        assert_matches!(h.binder.set_handle(None, "alice").await, Err(AuthError::NotAuthenticated));
    }

    #[tokio::test]
    async fn logout_and_idle_expiry() {
        let h = harness(Arc::new(MemoryStore::new()));
        let session = h.verified_session("a@x.com").await;
        h.binder.set_handle(Some(&session), "alice").await.unwrap();

        let later = Utc::now() + Duration::hours(25);
        assert_matches!(
            h.binder.require_room_access_at(Some(&session), later).await,
            Err(AuthError::NotAuthenticated)
        );

        let session = h.verified_session("a@x.com").await;
        assert_matches!(h.binder.require_room_access(Some(&session)).await, Ok(_));
        h.binder.logout(&session);
        assert_matches!(
            h.binder.require_room_access(Some(&session)).await,
            Err(AuthError::NotAuthenticated)
        );
    }

    #[tokio::test]
    async fn cookie_token_round_trip_and_tamper() {
        let h = harness(Arc::new(MemoryStore::new()));
        let session = h.verified_session("a@x.com").await;

        let token = h.binder.encode(&session).unwrap();
        assert_eq!(h.binder.decode(&token), Some(session));

        let other = SessionBinder::new(Arc::new(MemoryStore::new()), "other-secret", Duration::hours(1));
        assert_eq!(other.decode(&token), None);
        assert_eq!(h.binder.decode("garbage"), None);
    }

    #[test]
    fn sweep_forgets_idle_sessions() {
        let binder = SessionBinder::new(Arc::new(MemoryStore::new()), "s", Duration::minutes(10));
        let now = Utc::now();
        let account = Account::new("a@x.com".into(), now);
        let stale = binder.establish_at(&account, now).unwrap();
        let fresh = binder.establish_at(&account, now + Duration::minutes(9)).unwrap();

        assert_eq!(binder.sweep(now + Duration::minutes(15)), vec![stale.id]);
        assert!(binder.sweep(now + Duration::minutes(15)).is_empty());
        assert_ne!(stale.id, fresh.id);
    }

    #[test]
    fn poisoned_registry_refuses_to_establish() {
        let binder = SessionBinder::new(Arc::new(MemoryStore::new()), "s", Duration::minutes(10));
        let poisoner = binder.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.inner.sessions.lock().unwrap();
            panic!("poison the session registry");
        })
        .join();

        let account = Account::new("a@x.com".into(), Utc::now());
        assert_matches!(binder.establish(&account), Err(AuthError::Storage(_)));
    }
}
