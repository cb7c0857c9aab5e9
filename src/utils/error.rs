//! The `error` module defines the error type used across `relaysub`.
//!
//! Per-message failures (conversion, send) are reported through these
//! variants and then contained by the caller: logged and the single message
//! dropped. Lifecycle failures are returned from `start()`.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Debug, Error)]
pub enum RelayError {
    /// A caller handed in a value the operation cannot work with.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A required option is missing or out of range.
    #[error("configuration error: {0}")]
    Config(String),

    /// The layered configuration sources could not be read or deserialized.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(#[from] config::ConfigError),

    /// Raw text could not be turned into a `Message` or back.
    #[error("conversion failed: {0}")]
    Conversion(String),

    /// Broker connection, subscription, fetch or publish failure.
    #[error("broker error: {message}")]
    Broker {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A wake interrupt was observed while the consumer was not closing.
    #[error("consumer woken up while not closed")]
    UnexpectedWakeup,

    /// A lifecycle transition was requested from the wrong state.
    #[error("lifecycle error: {0}")]
    Lifecycle(String),

    /// The outbound path refused a message.
    #[error("send failed: {0}")]
    Send(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl RelayError {
    pub fn broker(message: impl Into<String>) -> Self {
        RelayError::Broker {
            message: message.into(),
            source: None,
        }
    }

    pub fn broker_with<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        RelayError::Broker {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}
