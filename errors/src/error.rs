use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

/// Boxed source type carried by every error in the pipeline.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Broker,
    RateLimit,
    Fetch,
    Stream,
    Store,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Config => write!(f, "config"),
            ErrorKind::Broker => write!(f, "broker"),
            ErrorKind::RateLimit => write!(f, "rate limit"),
            ErrorKind::Fetch => write!(f, "fetch"),
            ErrorKind::Stream => write!(f, "stream"),
            ErrorKind::Store => write!(f, "store"),
        }
    }
}

pub struct ErrorInner {
    pub kind: ErrorKind,
    pub source: Option<BoxError>,
    pub message: Option<String>,
}

pub struct Error {
    pub inner: Box<ErrorInner>,
}

impl Error {
    pub fn new<E>(kind: ErrorKind, source: Option<E>) -> Error
    where
        E: Into<BoxError>,
    {
        Error {
            inner: Box::new(ErrorInner {
                kind,
                source: source.map(Into::into),
                message: None,
            }),
        }
    }

    pub fn with_message<E>(kind: ErrorKind, message: String, source: Option<E>) -> Error
    where
        E: Into<BoxError>,
    {
        Error {
            inner: Box::new(ErrorInner {
                kind,
                source: source.map(Into::into),
                message: Some(message),
            }),
        }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.inner.kind
    }

    pub fn is_config(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::Config)
    }

    pub fn is_broker(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::Broker)
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::RateLimit)
    }

    pub fn is_fetch(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::Fetch)
    }

    pub fn is_stream(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::Stream)
    }

    pub fn is_store(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::Store)
    }

    /// True when the underlying fetch failure was an upstream 429.
    pub fn is_throttled(&self) -> bool {
        if let Some(source) = &self.inner.source {
            if let Some(fetch) = source.downcast_ref::<FetchError>() {
                return matches!(fetch, FetchError::Throttled { .. });
            }
        }
        false
    }

    /// True when the underlying failure was a timeout of any flavor.
    pub fn is_timeout(&self) -> bool {
        if let Some(source) = &self.inner.source {
            if let Some(fetch) = source.downcast_ref::<FetchError>() {
                return matches!(fetch, FetchError::Timeout);
            }
            return source.to_string().to_lowercase().contains("timeout");
        }
        false
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_struct("pipeline::Error");
        f.field("kind", &self.inner.kind);
        if let Some(ref message) = self.inner.message {
            f.field("message", message);
        }
        if let Some(ref source) = self.inner.source {
            f.field("source", source);
        }
        f.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref message) = self.inner.message {
            write!(f, "{} error: {}", self.inner.kind, message)?;
        } else {
            write!(f, "{} error", self.inner.kind)?;
        }

        if let Some(ref source) = self.inner.source {
            write!(f, ": {source}")?;
        }

        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner
            .source
            .as_ref()
            .map(|e| &**e as &(dyn StdError + 'static))
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::new(ErrorKind::Config, Some(err))
    }
}

impl From<BrokerError> for Error {
    fn from(err: BrokerError) -> Self {
        Error::new(ErrorKind::Broker, Some(err))
    }
}

impl From<RateLimitError> for Error {
    fn from(err: RateLimitError) -> Self {
        Error::new(ErrorKind::RateLimit, Some(err))
    }
}

impl From<FetchError> for Error {
    fn from(err: FetchError) -> Self {
        Error::new(ErrorKind::Fetch, Some(err))
    }
}

impl From<StreamError> for Error {
    fn from(err: StreamError) -> Self {
        Error::new(ErrorKind::Stream, Some(err))
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        Error::new(ErrorKind::Store, Some(err))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required variable: {0}")]
    MissingVar(String),
    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },
}

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("connection failed: {0}")]
    ConnectionFailed(#[source] BoxError),
    #[error("command failed: {0}")]
    CommandFailed(#[source] BoxError),
    #[error("pipeline failed: {0}")]
    PipelineFailed(#[source] BoxError),
}

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("{0}")]
    RedisError(#[source] BoxError),
    #[error("script rejected: {0}")]
    ScriptError(#[source] BoxError),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("throttled by upstream")]
    Throttled { retry_after: Option<u64> },
    #[error("timeout")]
    Timeout,
    #[error("upstream status {0}")]
    Status(u16),
    #[error("network error: {0}")]
    Network(#[source] BoxError),
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("append failed: {0}")]
    AppendFailed(#[source] BoxError),
    #[error("group create failed: {0}")]
    GroupCreateFailed(#[source] BoxError),
    #[error("read failed: {0}")]
    ReadFailed(#[source] BoxError),
    #[error("ack failed: {0}")]
    AckFailed(#[source] BoxError),
    #[error("invalid entry {id}: {reason}")]
    InvalidEntry { id: String, reason: String },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("write failed: {0}")]
    WriteFailed(#[source] BoxError),
    #[error("buffer full")]
    BufferFull,
    #[error("writer closed")]
    Closed,
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::with_message(ErrorKind::Stream, "payload decode".to_string(), Some(err))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => Error::from(FetchError::Timeout),
            std::io::ErrorKind::ConnectionRefused => {
                Error::from(BrokerError::ConnectionFailed(err.into()))
            }
            _ => Error::new(ErrorKind::Broker, Some(err)),
        }
    }
}

impl Error {
    pub fn fetch_timeout() -> Self {
        Error::from(FetchError::Timeout)
    }

    pub fn throttled(retry_after: Option<u64>) -> Self {
        Error::from(FetchError::Throttled { retry_after })
    }

    pub fn missing_var(name: &str) -> Self {
        Error::from(ConfigError::MissingVar(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = Error::fetch_timeout();
        assert!(err.is_fetch());
        assert!(err.is_timeout());
    }

    #[test]
    fn test_error_display() {
        let err = Error::missing_var("REDIS_URL");
        assert_eq!(
            err.to_string(),
            "config error: missing required variable: REDIS_URL"
        );
    }

    #[test]
    fn test_error_source() {
        let io_err = std::io::Error::new(std::io::ErrorKind::TimedOut, "request timed out");
        let err = Error::from(io_err);
        assert!(err.source().is_some());
    }

    #[test]
    fn test_throttled_classification() {
        let err = Error::throttled(Some(7));
        assert!(err.is_fetch());
        assert!(err.is_throttled());
        assert!(!err.is_timeout());

        let err = Error::from(FetchError::Status(503));
        assert!(!err.is_throttled());
    }
}
