/// Parlor auth library
///
/// Magic-link credentials, the session binder that gates room access, the
/// fixed-window rate guard, and the outbound mail seam.
pub mod credential;
pub mod error;
pub mod mailer;
pub mod rate_guard;
pub mod session;
pub mod token;

use std::sync::Arc;

use tracing::error;

use parlor_db::AccountStore;

pub use credential::CredentialManager;
pub use error::AuthError;
pub use mailer::Mailer;
pub use rate_guard::{EndpointClass, RateGuard};
pub use session::{Session, SessionBinder};

/// Run a store call off the async runtime. Storage errors are logged here and
/// surface to callers only as `AuthError::Storage`.
pub(crate) async fn run_blocking<F, T>(store: &Arc<dyn AccountStore>, f: F) -> Result<T, AuthError>
where
    F: FnOnce(&dyn AccountStore) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || f(store.as_ref()))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            AuthError::Storage(anyhow::anyhow!("store task failed: {}", e))
        })?
        .map_err(|e| {
            error!("Account store error: {:#}", e);
            AuthError::Storage(e)
        })
}
