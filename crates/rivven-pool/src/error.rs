//! Error types for rivven-pool
//!
//! Two layers: [`SinkError`] is what a sink implementation returns from
//! `connect`/`send`, [`PoolError`] is what the pool surfaces to producers and
//! operators.

use std::fmt;
use thiserror::Error;

/// Result type alias for pool operations
pub type Result<T> = std::result::Result<T, PoolError>;

/// Result type alias for sink operations
pub type SinkResult<T> = std::result::Result<T, SinkError>;

/// Main error type for the pool
#[derive(Error, Debug)]
pub enum PoolError {
    /// Configuration error (rejected by `new`/`reload`)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation attempted after `exit` has begun
    #[error("Pool is closed")]
    PoolClosed,

    /// Buffer is at capacity and the caller asked not to block
    #[error("Buffer is full ({capacity} records)")]
    BufferFull { capacity: usize },

    /// Sink could not be reached or validated
    #[error("Connect failure on sink '{sink}': {source}")]
    Connect {
        sink: String,
        #[source]
        source: SinkError,
    },

    /// A batch could not be delivered
    #[error("Send failure on sink '{sink}': {source}")]
    Send {
        sink: String,
        #[source]
        source: SinkError,
    },
}

/// Errors returned by sink implementations
#[derive(Debug, Error)]
pub enum SinkError {
    /// Sink-specific parameters are invalid
    #[error("configuration error: {0}")]
    Config(String),

    /// Connection to the external system failed
    #[error("connection error: {0}")]
    Connection(String),

    /// Timeout waiting for the external system
    #[error("timeout: {0}")]
    Timeout(String),

    /// The external system rejected or failed a batch
    #[error("send error: {0}")]
    Send(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl SinkError {
    /// Check if this error is worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Timeout(_) | Self::Send(_) | Self::Io(_)
        )
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a send error
    pub fn send(msg: impl Into<String>) -> Self {
        Self::Send(msg.into())
    }
}

impl PoolError {
    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Wrap a sink connect error
    pub fn connect(sink: impl Into<String>, source: SinkError) -> Self {
        Self::Connect {
            sink: sink.into(),
            source,
        }
    }

    /// Wrap a sink send error
    pub fn send(sink: impl Into<String>, source: SinkError) -> Self {
        Self::Send {
            sink: sink.into(),
            source,
        }
    }

    /// Check if this error means the pool no longer accepts work
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::PoolClosed)
    }

    /// Check if this error is transient backpressure
    pub fn is_backpressure(&self) -> bool {
        matches!(self, Self::BufferFull { .. })
    }
}

/// Lifecycle phase of a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolPhase {
    /// No healthy sink connection; records keep buffering
    Reconnecting,
    /// Connected and delivering
    Warm,
    /// `exit` in progress
    Draining,
    /// Shutdown complete
    Closed,
}

impl PoolPhase {
    /// Check if shutdown has begun
    pub fn is_exiting(&self) -> bool {
        matches!(self, Self::Draining | Self::Closed)
    }
}

impl fmt::Display for PoolPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Warm => write!(f, "warm"),
            Self::Draining => write!(f, "draining"),
            Self::Closed => write!(f, "closed"),
        }
    }
}
