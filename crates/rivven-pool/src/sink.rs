//! Sink trait and connector
//!
//! A [`Sink`] is the external collaborator the pool delivers to: it knows how
//! to open a connection handle and how to push one batch through it. The
//! pool never looks inside a handle.
//!
//! [`SinkConnector`] owns the *current* handle. A reconnect replaces it
//! wholesale; sends already in flight keep the `Arc` they started with, so a
//! reconnect never pulls a handle out from under a worker.
//!
//! # Example
//!
//! ```rust,ignore
//! use rivven_pool::prelude::*;
//!
//! struct MySink;
//!
//! #[async_trait]
//! impl Sink for MySink {
//!     type Handle = MyClient;
//!
//!     fn name(&self) -> &str {
//!         "my-sink"
//!     }
//!
//!     async fn connect(&self, params: &serde_yaml::Value) -> SinkResult<MyClient> {
//!         MyClient::connect(params).await
//!     }
//!
//!     async fn send(&self, client: &MyClient, batch: Batch) -> SinkResult<()> {
//!         client.put_records(batch.into_records()).await
//!     }
//! }
//! ```

use crate::error::{SinkError, SinkResult};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// A group of records handed to the sink in one call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    records: Vec<Bytes>,
}

impl Batch {
    pub fn new(records: Vec<Bytes>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Total payload size
    pub fn bytes(&self) -> usize {
        self.records.iter().map(Bytes::len).sum()
    }

    pub fn records(&self) -> &[Bytes] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Bytes> {
        self.records
    }
}

impl From<Vec<Bytes>> for Batch {
    fn from(records: Vec<Bytes>) -> Self {
        Self::new(records)
    }
}

/// External stream sink
#[async_trait]
pub trait Sink: Send + Sync + 'static {
    /// Connection handle produced by `connect`
    type Handle: Send + Sync + 'static;

    /// Name used in logs and errors
    fn name(&self) -> &str;

    /// Open and validate a connection using sink-specific parameters
    async fn connect(&self, params: &serde_yaml::Value) -> SinkResult<Self::Handle>;

    /// Deliver one batch through a handle
    async fn send(&self, handle: &Self::Handle, batch: Batch) -> SinkResult<()>;
}

/// Owner of the current sink handle
pub struct SinkConnector<S: Sink> {
    sink: Arc<S>,
    handle: RwLock<Option<Arc<S::Handle>>>,
    params: RwLock<serde_yaml::Value>,
    connect_timeout: RwLock<Duration>,
}

impl<S: Sink> SinkConnector<S> {
    pub fn new(sink: Arc<S>, params: serde_yaml::Value, connect_timeout: Duration) -> Self {
        Self {
            sink,
            handle: RwLock::new(None),
            params: RwLock::new(params),
            connect_timeout: RwLock::new(connect_timeout),
        }
    }

    pub fn sink(&self) -> &Arc<S> {
        &self.sink
    }

    pub fn name(&self) -> &str {
        self.sink.name()
    }

    /// Replace the parameters used by the next `connect`
    pub fn reconfigure(&self, params: serde_yaml::Value, connect_timeout: Duration) {
        *self.params.write() = params;
        *self.connect_timeout.write() = connect_timeout;
    }

    /// Open a fresh handle and make it current.
    ///
    /// The previous handle stays alive for as long as in-flight sends hold it.
    pub async fn connect(&self) -> SinkResult<()> {
        let params = self.params.read().clone();
        let timeout = *self.connect_timeout.read();

        debug!(sink = self.name(), ?timeout, "Connecting to sink");

        let handle = tokio::time::timeout(timeout, self.sink.connect(&params))
            .await
            .map_err(|_| SinkError::Timeout(format!("connect exceeded {:?}", timeout)))??;

        let previous = self.handle.write().replace(Arc::new(handle));
        info!(
            sink = self.name(),
            reconnect = previous.is_some(),
            "Connected to sink"
        );
        Ok(())
    }

    /// Current handle, if any
    pub fn handle(&self) -> Option<Arc<S::Handle>> {
        self.handle.read().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.handle.read().is_some()
    }

    /// Send a batch through the current handle
    pub async fn send(&self, batch: Batch) -> SinkResult<()> {
        let handle = self
            .handle()
            .ok_or_else(|| SinkError::connection("no sink connection"))?;
        self.sink.send(&handle, batch).await
    }

    /// Drop the current handle
    pub fn disconnect(&self) {
        if self.handle.write().take().is_some() {
            debug!(sink = self.name(), "Sink handle released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockSink;

    #[test]
    fn test_batch() {
        let batch = Batch::from(vec![Bytes::from("ab"), Bytes::from("cde")]);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.bytes(), 5);
        assert!(!batch.is_empty());
        assert_eq!(batch.into_records().len(), 2);
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let connector = SinkConnector::new(
            Arc::new(MockSink::new()),
            serde_yaml::Value::Null,
            Duration::from_secs(1),
        );
        assert!(!connector.is_connected());

        let err = connector.send(Batch::default()).await.unwrap_err();
        assert!(matches!(err, SinkError::Connection(_)));

        connector.connect().await.unwrap();
        assert!(connector.is_connected());
        connector
            .send(Batch::from(vec![Bytes::from("x")]))
            .await
            .unwrap();
        assert_eq!(connector.sink().records_sent(), 1);

        connector.disconnect();
        assert!(!connector.is_connected());
    }

    #[tokio::test]
    async fn test_reconnect_keeps_in_flight_handle() {
        let connector = SinkConnector::new(
            Arc::new(MockSink::new()),
            serde_yaml::Value::Null,
            Duration::from_secs(1),
        );
        connector.connect().await.unwrap();
        let held = connector.handle().unwrap();

        connector.connect().await.unwrap();
        let current = connector.handle().unwrap();

        assert_ne!(held.generation(), current.generation());
        assert_eq!(Arc::strong_count(&held), 1);
        assert_eq!(connector.sink().connect_count(), 2);
    }

    #[tokio::test]
    async fn test_connect_timeout() {
        let sink = MockSink::new().with_connect_delay(Duration::from_millis(200));
        let connector = SinkConnector::new(
            Arc::new(sink),
            serde_yaml::Value::Null,
            Duration::from_millis(10),
        );

        let err = connector.connect().await.unwrap_err();
        assert!(matches!(err, SinkError::Timeout(_)));
        assert!(!connector.is_connected());
    }

    #[tokio::test]
    async fn test_connect_failure_keeps_previous_handle() {
        let sink = Arc::new(MockSink::new());
        let connector = SinkConnector::new(
            sink.clone(),
            serde_yaml::Value::Null,
            Duration::from_secs(1),
        );
        connector.connect().await.unwrap();

        sink.fail_connects(true);
        assert!(connector.connect().await.is_err());
        assert!(connector.is_connected());
    }
}
