use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

// -- Session Claims --

/// Claims carried in the signed session cookie. The `sid` is checked against the
/// live session registry on every gated call, so a valid signature alone does not
/// keep a logged-out or idle session alive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: String,
    pub sid: Uuid,
    pub exp: usize,
}

// -- Login --

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
}

impl LoginRequest {
    /// The identity key this request refers to.
    pub fn normalized_email(&self) -> String {
        normalize_email(&self.email)
    }
}

// -- Handles --

#[derive(Debug, Deserialize, Validate)]
pub struct SetHandleRequest {
    #[validate(length(min = 3, max = 32))]
    #[validate(custom = "handle_characters")]
    pub handle: String,
}

fn handle_characters(handle: &str) -> Result<(), ValidationError> {
    if handle
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        Ok(())
    } else {
        Err(ValidationError::new("handle_characters"))
    }
}

// -- Responses --

/// Uniform `{success, message}` payload returned by the form endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub message: String,
}

impl ApiResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Emails are compared case-insensitively, so every lookup goes through this.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
