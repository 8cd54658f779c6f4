pub mod error;

pub use error::{
    BoxError, BrokerError, ConfigError, Error, ErrorKind, FetchError, RateLimitError, Result,
    StoreError, StreamError,
};
