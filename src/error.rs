use std::sync::Arc;

use thiserror::Error;

/// Result type used throughout the Flagsmith SDK.
pub type Result<T> = std::result::Result<T, Error>;

/// Enum representing possible errors that can occur in the Flagsmith SDK.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// The client was configured with an invalid combination of options. Always raised from
    /// [`Client::new`](crate::Client::new), before any network request is made.
    #[error("invalid client configuration: {0}")]
    Configuration(String),

    /// The requested feature is not present in the flags and no default flag handler is
    /// configured.
    #[error("feature does not exist: {0}")]
    FeatureNotFound(String),

    /// Local evaluation was requested but no environment has been loaded yet.
    #[error("no environment present, local evaluation is not possible")]
    EnvironmentNotLoaded,

    /// Invalid API URL configuration.
    #[error("invalid api_url configuration")]
    InvalidApiUrl(#[source] url::ParseError),

    /// Network error.
    #[error(transparent)]
    Network(Arc<reqwest::Error>),

    /// The API responded with a non-success status code.
    #[error("invalid request made to Flagsmith API, response status code: {0}")]
    UnexpectedStatus(u16),

    /// The API response body could not be decoded.
    #[error("unable to get valid response from Flagsmith API")]
    InvalidResponse(#[source] Arc<serde_json::Error>),

    /// A real-time update event could not be parsed.
    #[error("invalid stream event: {0}")]
    InvalidStreamEvent(String),

    /// An I/O error.
    #[error(transparent)]
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    Io(Arc<std::io::Error>),

    /// A background thread panicked. This should normally never happen.
    #[error("background thread panicked")]
    ThreadPanicked,
}

impl Error {
    /// Returns `true` for errors produced while talking to the Flagsmith API. These are the
    /// errors that trigger the offline handler and default flag handler fallbacks.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Network(_)
                | Error::UnexpectedStatus(_)
                | Error::InvalidResponse(_)
                | Error::InvalidApiUrl(_)
        )
    }

    /// Returns `true` if the operation timed out.
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Network(err) => err.is_timeout(),
            Error::Io(err) => err.kind() == std::io::ErrorKind::TimedOut,
            _ => false,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Network(Arc::new(value.without_url()))
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::InvalidResponse(Arc::new(value))
    }
}
