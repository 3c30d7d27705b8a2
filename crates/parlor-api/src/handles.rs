use axum::{
    Json,
    extract::State,
    response::{IntoResponse, Redirect, Response},
};

use parlor_auth::EndpointClass;
use parlor_types::api::{ApiResponse, SetHandleRequest};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::extract::FormOrJson;
use crate::middleware::{ClientAddr, MaybeSession, check_rate};
use crate::pages::set_handle_page;

/// Handle picker. Anyone without a live, verified session goes back to `/`.
pub async fn set_handle_form(
    State(state): State<AppState>,
    MaybeSession(session): MaybeSession,
) -> Response {
    let Some(session) = session else {
        return Redirect::to("/").into_response();
    };
    match state.sessions.current_account(&session).await {
        Ok(account) if account.verified => set_handle_page(account.handle.as_deref()).into_response(),
        _ => Redirect::to("/").into_response(),
    }
}

pub async fn set_handle(
    State(state): State<AppState>,
    ClientAddr(client): ClientAddr,
    MaybeSession(session): MaybeSession,
    body: Result<FormOrJson<SetHandleRequest>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    check_rate(&state, &client, EndpointClass::SetHandle)?;
    let FormOrJson(req) = body?;

    let account = state.sessions.set_handle(session.as_ref(), &req.handle).await?;
    let handle = account.handle.unwrap_or(req.handle);

    Ok(Json(ApiResponse::ok(format!("You are now known as {}.", handle))))
}
