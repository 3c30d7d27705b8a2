/// Every failure the auth flow can hand back to a client. Storage and delivery
/// variants keep the underlying error for logs; `client_message` never shows it.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("rate limited")]
    RateLimited,

    #[error("credential expired")]
    CredentialExpired,

    #[error("credential invalid")]
    CredentialInvalid,

    #[error("handle taken")]
    HandleTaken,

    #[error("not authenticated")]
    NotAuthenticated,

    #[error("email not verified")]
    NotVerified,

    #[error("no handle chosen")]
    NoHandle,

    #[error("storage failure: {0:#}")]
    Storage(anyhow::Error),

    #[error("delivery failure: {0:#}")]
    Delivery(anyhow::Error),
}

impl AuthError {
    /// Stable, client-safe description of the failure.
    pub fn client_message(&self) -> String {
        match self {
            Self::Validation(msg) => msg.clone(),
            Self::RateLimited => "Too many requests. Please wait a minute and try again.".into(),
            Self::CredentialExpired => {
                "This login link has expired. Please request a new one.".into()
            }
            Self::CredentialInvalid => {
                "This login link is invalid or has already been used.".into()
            }
            Self::HandleTaken => "That handle is already taken. Please choose another.".into(),
            Self::NotAuthenticated => "Please log in first.".into(),
            Self::NotVerified => "Please verify your email address first.".into(),
            Self::NoHandle => "Please choose a handle before joining a room.".into(),
            Self::Storage(_) => "Something went wrong on our side. Please try again later.".into(),
            Self::Delivery(_) => {
                "We could not send the login email. Please try again.".into()
            }
        }
    }
}
