use thiserror::Error;

/// Coarse classification of an [`Error`], so callers can branch without
/// matching on messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The request can never succeed (private, removed, login required).
    Unrecoverable,
    /// Network hiccup or 5xx; worth retrying.
    Transient,
    /// Terminal HTTP status (< 500) or redirect exhaustion.
    Status,
    /// Every metadata source was tried without a usable response.
    ValidationFailed,
    /// The signature program could not be recognized in the player script.
    ExtractionFailed,
    /// Format selection criteria matched nothing.
    NoMatchingFormat,
    InvalidInput,
    Parse,
    Unsupported,
    Cancelled,
    Config,
}

/// Crate-wide error type.
///
/// Errors are `Clone` because a single failed computation may be observed by
/// several callers sharing one cache entry.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("{0}")]
    Unrecoverable(String),

    #[error("status code {status}: {url}")]
    Status { status: u16, url: String },

    #[error("too many redirects: {0}")]
    TooManyRedirects(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("unable to retrieve video metadata: {0}")]
    ValidationFailed(String),

    #[error("could not extract signature deciphering actions: {0}")]
    ExtractionFailed(String),

    #[error("no such format found: {0}")]
    NoMatchingFormat(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error("error parsing {what} in {source_name}: {message}")]
    Parse {
        source_name: String,
        what: String,
        message: String,
    },

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("download destroyed")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unrecoverable(_) => ErrorKind::Unrecoverable,
            Self::Status { status, .. } if *status >= 500 => ErrorKind::Transient,
            Self::Status { .. } | Self::TooManyRedirects(_) => ErrorKind::Status,
            Self::Network(_) | Self::Io(_) => ErrorKind::Transient,
            Self::ValidationFailed(_) => ErrorKind::ValidationFailed,
            Self::ExtractionFailed(_) => ErrorKind::ExtractionFailed,
            Self::NoMatchingFormat(_) => ErrorKind::NoMatchingFormat,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::Parse { .. } => ErrorKind::Parse,
            Self::Unsupported(_) => ErrorKind::Unsupported,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// Whether retrying the same request can plausibly change the outcome.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub fn is_unrecoverable(&self) -> bool {
        self.kind() == ErrorKind::Unrecoverable
    }

    pub fn parse(
        source_name: impl Into<String>,
        what: impl Into<String>,
        message: impl ToString,
    ) -> Self {
        Self::Parse {
            source_name: source_name.into(),
            what: what.into(),
            message: message.to_string(),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let url = err.url().map(|u| u.to_string()).unwrap_or_default();
        if err.is_redirect() {
            Self::TooManyRedirects(url)
        } else if let Some(status) = err.status() {
            Self::Status {
                status: status.as_u16(),
                url,
            }
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::parse("response", "json", err)
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidInput(err.to_string())
    }
}

impl From<regex::Error> for Error {
    fn from(err: regex::Error) -> Self {
        Self::ExtractionFailed(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let server = Error::Status {
            status: 503,
            url: "https://example.com".into(),
        };
        let client = Error::Status {
            status: 404,
            url: "https://example.com".into(),
        };
        assert!(server.is_retryable());
        assert_eq!(client.kind(), ErrorKind::Status);
        assert!(!client.is_retryable());
        assert!(!Error::TooManyRedirects("x".into()).is_retryable());
        assert!(Error::Network("reset".into()).is_retryable());
    }

    #[test]
    fn test_unrecoverable_is_never_retryable() {
        let err = Error::Unrecoverable("This is a private video".into());
        assert!(err.is_unrecoverable());
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "This is a private video");
    }
}
