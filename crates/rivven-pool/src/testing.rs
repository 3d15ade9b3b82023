//! Testing utilities
//!
//! [`MockSink`] captures everything sent through it and can be told to fail
//! connects or sends at runtime, which is enough to drive the pool through
//! its reconnect and scaling paths without a real sink.
//!
//! ```rust,ignore
//! use rivven_pool::prelude::*;
//! use rivven_pool::testing::MockSink;
//!
//! let sink = Arc::new(MockSink::new());
//! let pool = Pool::new(PoolConfig::fixed(2), sink.clone())?;
//! pool.enqueue("hello").await?;
//! pool.exit().await;
//! assert_eq!(sink.records_sent(), 1);
//! ```

use crate::error::{SinkError, SinkResult};
use crate::sink::{Batch, Sink};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// Handle returned by [`MockSink::connect`]
#[derive(Debug)]
pub struct MockHandle {
    generation: u64,
}

impl MockHandle {
    /// Sequence number of the connect that produced this handle (1-based)
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// A mock sink for testing
#[derive(Debug, Default)]
pub struct MockSink {
    batches: Mutex<Vec<Batch>>,
    fail_connect: AtomicBool,
    fail_send: AtomicBool,
    connect_delay: Mutex<Duration>,
    send_delay: Mutex<Duration>,
    connects: AtomicU64,
    send_attempts: AtomicU64,
    send_failures: AtomicU64,
    records_sent: AtomicU64,
}

impl MockSink {
    /// Create a new mock sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every connect (builder pattern)
    pub fn with_connect_delay(self, delay: Duration) -> Self {
        *self.connect_delay.lock() = delay;
        self
    }

    /// Delay every send (builder pattern)
    pub fn with_send_delay(self, delay: Duration) -> Self {
        *self.send_delay.lock() = delay;
        self
    }

    /// Make connects fail until switched off
    pub fn fail_connects(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Make sends fail until switched off
    pub fn fail_sends(&self, fail: bool) {
        self.fail_send.store(fail, Ordering::SeqCst);
    }

    /// Number of connect calls (successful or not)
    pub fn connect_count(&self) -> u64 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn send_attempts(&self) -> u64 {
        self.send_attempts.load(Ordering::SeqCst)
    }

    pub fn send_failures(&self) -> u64 {
        self.send_failures.load(Ordering::SeqCst)
    }

    /// Records delivered successfully
    pub fn records_sent(&self) -> u64 {
        self.records_sent.load(Ordering::SeqCst)
    }

    /// Batches delivered successfully, in delivery order
    pub fn batches(&self) -> Vec<Batch> {
        self.batches.lock().clone()
    }

    /// Records delivered successfully, flattened
    pub fn sent_records(&self) -> Vec<Bytes> {
        self.batches
            .lock()
            .iter()
            .flat_map(|b| b.records().iter().cloned())
            .collect()
    }
}

#[async_trait]
impl Sink for MockSink {
    type Handle = MockHandle;

    fn name(&self) -> &str {
        "mock"
    }

    async fn connect(&self, _params: &serde_yaml::Value) -> SinkResult<MockHandle> {
        let generation = self.connects.fetch_add(1, Ordering::SeqCst) + 1;

        let delay = *self.connect_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(SinkError::connection("mock connect failure"));
        }
        Ok(MockHandle { generation })
    }

    async fn send(&self, _handle: &MockHandle, batch: Batch) -> SinkResult<()> {
        self.send_attempts.fetch_add(1, Ordering::SeqCst);

        let delay = *self.send_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.fail_send.load(Ordering::SeqCst) {
            self.send_failures.fetch_add(1, Ordering::SeqCst);
            return Err(SinkError::send("mock send failure"));
        }

        self.records_sent
            .fetch_add(batch.len() as u64, Ordering::SeqCst);
        self.batches.lock().push(batch);
        Ok(())
    }
}
