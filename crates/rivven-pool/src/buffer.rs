//! Bounded record buffer
//!
//! Multiple producers, multiple consumers. Producers block while the buffer
//! is full; workers take records in FIFO order, in batches. Closing the
//! buffer rejects further inserts and reports how many records were left.

use crate::error::{PoolError, Result};
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Shared bounded FIFO of records
#[derive(Debug, Clone)]
pub struct RecordBuffer {
    tx: mpsc::Sender<Bytes>,
    rx: Arc<Mutex<mpsc::Receiver<Bytes>>>,
    capacity: usize,
    blocked_enqueues: Arc<AtomicU64>,
}

impl RecordBuffer {
    /// Create a buffer holding at most `capacity` records
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            capacity: capacity.max(1),
            blocked_enqueues: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Insert a record, waiting while the buffer is full
    pub async fn push(&self, record: Bytes) -> Result<()> {
        match self.tx.try_send(record) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(PoolError::PoolClosed),
            Err(mpsc::error::TrySendError::Full(record)) => {
                self.blocked_enqueues.fetch_add(1, Ordering::Relaxed);
                self.tx
                    .send(record)
                    .await
                    .map_err(|_| PoolError::PoolClosed)
            }
        }
    }

    /// Insert a record without waiting
    pub fn try_push(&self, record: Bytes) -> Result<()> {
        self.tx.try_send(record).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                self.blocked_enqueues.fetch_add(1, Ordering::Relaxed);
                PoolError::BufferFull {
                    capacity: self.capacity,
                }
            }
            mpsc::error::TrySendError::Closed(_) => PoolError::PoolClosed,
        })
    }

    /// Take up to `max` records.
    ///
    /// Waits for the first record, then takes whatever else is already
    /// buffered. Returns `None` once the buffer is closed and empty.
    pub async fn pop_batch(&self, max: usize) -> Option<Vec<Bytes>> {
        let mut rx = self.rx.lock().await;

        let first = rx.recv().await?;
        let mut records = Vec::with_capacity(max.clamp(1, 64));
        records.push(first);

        while records.len() < max {
            match rx.try_recv() {
                Ok(record) => records.push(record),
                Err(_) => break,
            }
        }

        Some(records)
    }

    /// Close the buffer and drop what is left, returning the dropped count
    pub async fn close(&self) -> usize {
        let mut rx = self.rx.lock().await;
        rx.close();

        let mut lost = 0;
        while rx.try_recv().is_ok() {
            lost += 1;
        }
        lost
    }

    /// Number of buffered records
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Occupancy in `[0.0, 1.0]`
    pub fn load(&self) -> f64 {
        self.len() as f64 / self.capacity as f64
    }

    /// Check if the buffer no longer accepts records
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Number of inserts that found the buffer full
    pub fn blocked_enqueues(&self) -> u64 {
        self.blocked_enqueues.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fifo_batches() {
        let buffer = RecordBuffer::new(10);
        for i in 0..5 {
            buffer.push(Bytes::from(format!("r{}", i))).await.unwrap();
        }
        assert_eq!(buffer.len(), 5);

        let batch = buffer.pop_batch(3).await.unwrap();
        assert_eq!(batch, vec![Bytes::from("r0"), Bytes::from("r1"), Bytes::from("r2")]);

        let batch = buffer.pop_batch(10).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn test_try_push_full() {
        let buffer = RecordBuffer::new(2);
        buffer.try_push(Bytes::from("a")).unwrap();
        buffer.try_push(Bytes::from("b")).unwrap();

        let err = buffer.try_push(Bytes::from("c")).unwrap_err();
        assert!(matches!(err, PoolError::BufferFull { capacity: 2 }));
        assert_eq!(buffer.load(), 1.0);
        assert_eq!(buffer.blocked_enqueues(), 1);
    }

    #[tokio::test]
    async fn test_push_blocks_until_drained() {
        let buffer = RecordBuffer::new(1);
        buffer.push(Bytes::from("a")).await.unwrap();

        let producer = {
            let buffer = buffer.clone();
            tokio::spawn(async move { buffer.push(Bytes::from("b")).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!producer.is_finished());

        let batch = buffer.pop_batch(1).await.unwrap();
        assert_eq!(batch, vec![Bytes::from("a")]);

        tokio::time::timeout(Duration::from_secs(1), producer)
            .await
            .expect("producer should resume")
            .unwrap()
            .unwrap();
        assert_eq!(buffer.len(), 1);
    }

    #[tokio::test]
    async fn test_close_counts_lost() {
        let buffer = RecordBuffer::new(100);
        for _ in 0..37 {
            buffer.push(Bytes::from_static(b"x")).await.unwrap();
        }

        assert_eq!(buffer.close().await, 37);
        assert!(buffer.is_closed());
        assert!(buffer.push(Bytes::from_static(b"y")).await.unwrap_err().is_closed());
        assert!(buffer.try_push(Bytes::from_static(b"y")).unwrap_err().is_closed());
        assert!(buffer.pop_batch(10).await.is_none());
    }

    #[tokio::test]
    async fn test_close_wakes_blocked_producer() {
        let buffer = RecordBuffer::new(1);
        buffer.push(Bytes::from("a")).await.unwrap();

        let producer = {
            let buffer = buffer.clone();
            tokio::spawn(async move { buffer.push(Bytes::from("b")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(buffer.close().await, 1);
        let result = producer.await.unwrap();
        assert!(matches!(result, Err(PoolError::PoolClosed)));
    }
}
