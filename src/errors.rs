use thiserror::Error;

/// Storefront client errors.
#[derive(Debug, Error)]
pub enum StorefrontError {
    /// There is no session, the session expired, or the server answered 401.
    /// The session has already been torn down when this is returned.
    #[error("Not authenticated. Please log in again.")]
    Unauthenticated,

    /// The request never produced a response (DNS, connect, TLS, timeout...).
    #[error("Network error: {0}")]
    Network(String),

    /// The API answered with a non-success status.
    /// `message` is the server's `error` field when it sent one.
    #[error("{message}")]
    ServerRejected { status: u16, message: String },

    /// The token's claims could not be decoded, or lack `role` / `exp`.
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    /// A response was missing a field the caller depends on.
    #[error("Malformed response from {endpoint}: missing or invalid `{field}`.")]
    MalformedResponse { endpoint: String, field: String },

    /// Reading or writing the persisted token failed.
    #[error("Token storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// The client options are unusable.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl StorefrontError {
    /// HTTP status attached to the error, if the server produced one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::ServerRejected { status, .. } => Some(*status),
            Self::Unauthenticated => Some(401),
            _ => None,
        }
    }

    /// Message for display: the server's own text when present, else `fallback`.
    pub fn user_message(&self, fallback: &str) -> String {
        match self {
            Self::ServerRejected { message, .. } if !message.is_empty() => message.clone(),
            Self::Unauthenticated => self.to_string(),
            _ => fallback.to_string(),
        }
    }
}

impl From<reqwest::Error> for StorefrontError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}
