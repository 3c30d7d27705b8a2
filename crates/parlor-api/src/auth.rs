use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::CookieJar;
use tracing::error;
use validator::Validate;

use parlor_auth::{AuthError, CredentialManager, EndpointClass, RateGuard, SessionBinder};
use parlor_gateway::dispatcher::Dispatcher;
use parlor_types::api::{ApiResponse, LoginRequest};

use crate::error::{ApiError, status_for};
use crate::extract::FormOrJson;
use crate::middleware::{ClientAddr, MaybeSession, check_rate, cleared_session_cookie, session_cookie};
use crate::pages::error_page;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub credentials: CredentialManager,
    pub sessions: SessionBinder,
    pub rate_guard: Arc<RateGuard>,
    pub dispatcher: Dispatcher,
    /// Mark the session cookie `Secure` (public URL is https).
    pub secure_cookies: bool,
    pub trust_proxy: bool,
}

pub async fn login(
    State(state): State<AppState>,
    ClientAddr(client): ClientAddr,
    body: Result<FormOrJson<LoginRequest>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    check_rate(&state, &client, EndpointClass::Login)?;
    let FormOrJson(req) = body?;

    let req = LoginRequest {
        email: req.normalized_email(),
    };
    req.validate()
        .map_err(|_| AuthError::Validation("Please enter a valid email address.".into()))?;

    // A stored credential un-verifies the account, delivered or not.
    let issued = state.credentials.issue(&req.email).await;
    if matches!(issued, Ok(_) | Err(AuthError::Delivery(_))) {
        state.dispatcher.evict_account(&req.email).await;
    }
    issued?;

    Ok(Json(ApiResponse::ok(
        "Check your email for a login link. It is valid for 24 hours.",
    )))
}

/// Redeem a magic link, bind a session and send the browser on to the next step.
pub async fn verify(
    State(state): State<AppState>,
    ClientAddr(client): ClientAddr,
    MaybeSession(previous): MaybeSession,
    jar: CookieJar,
    Path(token): Path<String>,
) -> Response {
    if !state.rate_guard.allow(&client, EndpointClass::Verify) {
        let err = AuthError::RateLimited;
        return error_page(status_for(&err), &err.client_message());
    }

    let account = match state.credentials.redeem(&token).await {
        Ok(account) => account,
        Err(e) => return error_page(status_for(&e), &e.client_message()),
    };

    if let Some(previous) = previous {
        state.sessions.logout(&previous);
        state.dispatcher.evict_session(previous.id).await;
    }
    let session = match state.sessions.establish(&account) {
        Ok(session) => session,
        Err(e) => return error_page(status_for(&e), &e.client_message()),
    };
    let cookie_token = match state.sessions.encode(&session) {
        Ok(token) => token,
        Err(e) => {
            error!("Failed to sign session cookie: {:#}", e);
            let err = AuthError::Storage(e);
            return error_page(StatusCode::INTERNAL_SERVER_ERROR, &err.client_message());
        }
    };

    let next = if account.handle.is_some() { "/chat" } else { "/set_handle" };
    (
        jar.add(session_cookie(cookie_token, state.secure_cookies)),
        Redirect::to(next),
    )
        .into_response()
}

pub async fn logout(
    State(state): State<AppState>,
    MaybeSession(session): MaybeSession,
    jar: CookieJar,
) -> impl IntoResponse {
    if let Some(session) = session {
        state.sessions.logout(&session);
        state.dispatcher.evict_session(session.id).await;
    }
    (jar.remove(cleared_session_cookie()), Redirect::to("/"))
}
