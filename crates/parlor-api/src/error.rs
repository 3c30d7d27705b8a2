use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

use parlor_auth::AuthError;
use parlor_types::api::ApiResponse;

/// `AuthError` rendered as `{success: false, message}` with a stable status.
#[derive(Debug)]
pub struct ApiError(pub AuthError);

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        Self(err)
    }
}

pub fn status_for(err: &AuthError) -> StatusCode {
    match err {
        AuthError::Validation(_) => StatusCode::BAD_REQUEST,
        AuthError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        AuthError::CredentialExpired => StatusCode::GONE,
        AuthError::CredentialInvalid => StatusCode::BAD_REQUEST,
        AuthError::HandleTaken => StatusCode::CONFLICT,
        AuthError::NotAuthenticated => StatusCode::UNAUTHORIZED,
        AuthError::NotVerified | AuthError::NoHandle => StatusCode::FORBIDDEN,
        AuthError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        AuthError::Delivery(_) => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }
        (status, Json(ApiResponse::failed(self.0.client_message()))).into_response()
    }
}
