use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("engine cancelled")]
    Cancelled,

    #[error("invalid endpoint `{input}`: {reason}")]
    InvalidEndpoint { input: String, reason: String },

    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("request failed with HTTP {status} during {operation} for {url}")]
    HttpStatus {
        status: StatusCode,
        url: String,
        operation: &'static str,
    },

    #[error("playlist error: {reason}")]
    Playlist { reason: String },

    #[error("fragment fetch error: {reason}")]
    FragmentFetch { reason: String, retryable: bool },

    #[error("invalid content for {protocol}: {reason}")]
    InvalidContent {
        protocol: &'static str,
        reason: String,
    },

    #[error("media decode error: {reason}")]
    MediaDecode { reason: String },

    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl EngineError {
    pub fn invalid_endpoint(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidEndpoint {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn playlist(reason: impl Into<String>) -> Self {
        Self::Playlist {
            reason: reason.into(),
        }
    }

    pub fn http_status(
        status: StatusCode,
        url: impl Into<String>,
        operation: &'static str,
    ) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
            operation,
        }
    }

    /// Whether this error condemns the whole source, as opposed to a single
    /// fragment that can be skipped or refetched.
    pub fn is_fatal_for_source(&self) -> bool {
        match self {
            Self::Cancelled => false,
            Self::FragmentFetch { retryable, .. } => !retryable,
            Self::MediaDecode { .. } => false,
            Self::HttpStatus { status, .. } => {
                status.is_client_error() || status.is_server_error()
            }
            Self::InvalidEndpoint { .. }
            | Self::InvalidContent { .. }
            | Self::Playlist { .. }
            | Self::Network { .. }
            | Self::Internal { .. } => true,
        }
    }
}

/// Classify a reqwest error as retryable or non-retryable.
///
/// Retryable: connect, timeout, request, body read, and decode errors.
/// Non-retryable: redirect and builder errors.
pub fn is_retryable_reqwest_error(e: &reqwest::Error) -> bool {
    e.is_connect() || e.is_timeout() || e.is_request() || e.is_body() || e.is_decode()
}
