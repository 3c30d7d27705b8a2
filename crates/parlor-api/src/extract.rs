use axum::{
    Form, Json,
    extract::{FromRequest, Request},
    http::header::CONTENT_TYPE,
};
use serde::de::DeserializeOwned;
use tracing::debug;

use parlor_auth::AuthError;

use crate::error::ApiError;

/// Accepts either an urlencoded form post or a JSON body, picked by
/// `Content-Type`. Browsers post the forms; scripts tend to send JSON.
pub struct FormOrJson<T>(pub T);

impl<T, S> FromRequest<S> for FormOrJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_json = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json"));

        let value = if is_json {
            Json::<T>::from_request(req, state)
                .await
                .map(|Json(v)| v)
                .map_err(|e| malformed(e.body_text()))?
        } else {
            Form::<T>::from_request(req, state)
                .await
                .map(|Form(v)| v)
                .map_err(|e| malformed(e.body_text()))?
        };

        Ok(Self(value))
    }
}

fn malformed(detail: String) -> ApiError {
    debug!("Rejected request body: {}", detail);
    ApiError(AuthError::Validation("Malformed request.".into()))
}
