use thiserror::Error;

#[derive(Error, Debug)]
pub enum HostedError {
    #[error("HTTP Request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Server error: status code {status_code}, message: {message}")]
    Server {
        status_code: u16,
        message: String,
        body: Option<String>,
    },

    #[error("Invalid response: {0}")]
    InvalidResponse(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Upload was cancelled")]
    Cancelled,
}

impl HostedError {
    pub fn server_error(status_code: u16, message: impl Into<String>, body: Option<String>) -> Self {
        Self::Server {
            status_code,
            message: message.into(),
            body,
        }
    }

    /// Timeouts, connection failures and 5xx responses are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            HostedError::Http(err) => err.is_timeout() || err.is_connect(),
            HostedError::Server { status_code, .. } => *status_code >= 500 || *status_code == 429,
            _ => false,
        }
    }

    /// Raw response body, if the server answered.
    pub fn response_body(&self) -> Option<&str> {
        match self {
            HostedError::Server { body, .. } => body.as_deref(),
            _ => None,
        }
    }
}

/// Error alias
pub type Result<T, E = HostedError> = std::result::Result<T, E>;
