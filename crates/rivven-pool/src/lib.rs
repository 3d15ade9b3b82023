//! rivven-pool - Elastic publisher pool for external stream sinks
//!
//! Producers hand records to a [`Pool`]; the pool buffers them, runs a
//! variable number of workers pushing batches into a [`Sink`], grows and
//! shrinks that worker set with buffer occupancy, and forces a reconnect
//! when sends keep failing.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐ enqueue ┌──────────────┐ pop_batch ┌─────────┐ send ┌────────┐
//! │ producer ├────────►│ RecordBuffer ├──────────►│ Worker* ├─────►│  Sink  │
//! └──────────┘         └──────┬───────┘           └────┬────┘      └────────┘
//!                             │ load                   │ failures
//!                     ┌───────▼───────────┐     ┌──────▼──────┐
//!                     │ ScalingController │     │ ErrorWindow │
//!                     └───────┬───────────┘     └──────┬──────┘
//!                             │  ReconcileSignal       │
//!                             └──────────┬─────────────┘
//!                                 ┌──────▼──────┐
//!                                 │ reconcile   │ connect + resize workers
//!                                 └─────────────┘
//! ```
//!
//! # Library usage
//!
//! ```rust,ignore
//! use rivven_pool::prelude::*;
//! use rivven_pool::connectors::StdoutSink;
//!
//! let config = PoolConfig::autoscaled(2, 10).with_buffer_capacity(4096);
//! let pool = Pool::new(config, Arc::new(StdoutSink::new()))?;
//!
//! pool.enqueue("record").await?;
//! let report = pool.exit().await;
//! ```
//!
//! # CLI usage
//!
//! ```bash
//! # Forward stdin lines to stdout through a pool
//! rivven-pool -c pool.yaml run
//!
//! # Validate configuration
//! rivven-pool -c pool.yaml validate
//! ```

pub mod buffer;
pub mod config;
pub mod connectors;
pub mod error;
pub mod error_window;
pub mod metrics;
pub mod pool;
pub mod reconcile;
pub mod scaling;
pub mod signal;
pub mod sink;
pub mod state;
pub mod testing;
pub mod worker;

pub use buffer::RecordBuffer;
pub use config::{PoolConfig, WorkerMode};
pub use error::{PoolError, PoolPhase, Result, SinkError, SinkResult};
pub use error_window::ErrorWindow;
pub use pool::{verify_sink, ExitReport, Pool, PoolStatus};
pub use reconcile::{ReconcilePlan, WorkerId};
pub use scaling::{ScaleDecision, ScalingController, ScalingParams};
pub use signal::ReconcileSignal;
pub use sink::{Batch, Sink, SinkConnector};

// Re-export commonly used dependencies for sink implementations
pub use async_trait::async_trait;
pub use bytes::Bytes;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        async_trait, Batch, Bytes, ExitReport, Pool, PoolConfig, PoolError, PoolPhase,
        PoolStatus, Result, Sink, SinkError, SinkResult, WorkerMode,
    };
    pub use std::sync::Arc;
}
