use reqwest::StatusCode;

/// Failures surfaced by the client library.
///
/// The `Display` text is what the user sees, so variants carrying a server
/// `detail` print it verbatim.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("User not authenticated")]
    NotAuthenticated,
    #[error("{0}")]
    AuthenticationFailed(String),
    #[error("{detail}")]
    Api { status: StatusCode, detail: String },
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("{0}")]
    Transport(#[from] reqwest::Error),
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Refused(String),
}

impl ClientError {
    /// HTTP status of the failed response, when there was one.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            ClientError::AuthenticationFailed(_) => Some(StatusCode::UNAUTHORIZED),
            ClientError::Transport(e) => e.status(),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND)
    }
}
