//! Pool supervisor
//!
//! [`Pool`] owns the record buffer, the sink connector, the worker set and
//! the scaling controller. Producers only see `enqueue`; everything else is
//! driven by one reconciliation task that wakes on the shared
//! [`ReconcileSignal`](crate::signal::ReconcileSignal):
//!
//! 1. reconnect through the [`SinkConnector`]
//! 2. on failure: report it, wait `connection_retry`, re-arm the trigger
//! 3. on success: reset the error window and bring the worker set to the
//!    target count (remove from the highest index, or start fresh workers)
//!
//! Triggers come from `new`, `reload`, the error window and the scaling
//! controller; while a pass runs, further triggers collapse into one.
//!
//! # Example
//!
//! ```rust,ignore
//! use rivven_pool::prelude::*;
//! use rivven_pool::connectors::StdoutSink;
//!
//! let pool = Pool::new(PoolConfig::autoscaled(2, 8), Arc::new(StdoutSink::new()))?;
//! pool.enqueue("hello").await?;
//!
//! let report = pool.exit().await;
//! println!("lost {} records", report.lost_records);
//! ```

use crate::buffer::RecordBuffer;
use crate::config::{PoolConfig, WorkerMode};
use crate::error::{PoolError, PoolPhase, Result, SinkError};
use crate::metrics::PoolMetrics;
use crate::reconcile::{ReconcilePlan, WorkerId};
use crate::scaling::{ScalingController, ScalingParams, ScalingTask};
use crate::sink::{Batch, Sink, SinkConnector};
use crate::state::SharedState;
use crate::worker::Worker;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Result of a completed shutdown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExitReport {
    /// Records accepted by `enqueue` that never reached the sink
    pub lost_records: u64,
    /// Records delivered over the pool's lifetime
    pub records_sent: u64,
    /// Failed send calls over the pool's lifetime
    pub send_failures: u64,
}

/// Point-in-time view of a pool
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub sink: String,
    pub phase: PoolPhase,
    pub mode: WorkerMode,
    pub connection_healthy: bool,
    pub live_workers: usize,
    pub desired_workers: usize,
    pub error_count: u64,
    pub buffered: usize,
    pub buffer_capacity: usize,
    pub last_connection: Option<DateTime<Utc>>,
    pub records_sent: u64,
    pub send_failures: u64,
    pub reconnects: u64,
    /// Inserts that found the buffer full
    pub blocked_enqueues: u64,
}

struct WorkerSet {
    workers: Vec<Worker>,
    next_id: WorkerId,
}

struct Scaling {
    controller: Arc<parking_lot::Mutex<ScalingController>>,
    task: ScalingTask,
}

struct PoolInner<S: Sink> {
    shared: Arc<SharedState>,
    buffer: RecordBuffer,
    connector: Arc<SinkConnector<S>>,
    workers: Mutex<WorkerSet>,
    scaling: Mutex<Option<Scaling>>,
    reconcile_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
    /// Parent of every task token
    cancel: CancellationToken,
    reconcile_cancel: CancellationToken,
    exit_started: AtomicBool,
    /// Records of stopped workers that did not fit back into the buffer
    dropped_on_requeue: AtomicU64,
    exit_report: watch::Sender<Option<ExitReport>>,
}

/// Elastic publisher pool
///
/// Share it behind an `Arc`. Dropping the pool without calling
/// [`Pool::exit`] cancels its tasks but does not report lost records.
pub struct Pool<S: Sink> {
    inner: Arc<PoolInner<S>>,
}

impl<S: Sink> Pool<S> {
    /// Validate `config`, start the background tasks and return immediately.
    ///
    /// Must be called from within a Tokio runtime. Records enqueued before the
    /// first successful connect wait in the buffer.
    pub fn new(config: PoolConfig, sink: Arc<S>) -> Result<Self> {
        let config = config.normalized()?;
        let mode = config.worker_mode();

        let metrics = PoolMetrics::new(sink.name());
        let buffer = RecordBuffer::new(config.buffer_capacity);
        let connector = Arc::new(SinkConnector::new(
            sink,
            config.sink.clone(),
            config.connect_timeout(),
        ));
        let params = ScalingParams::from_config(&config);
        let shared = Arc::new(SharedState::new(config, metrics));

        let cancel = CancellationToken::new();
        let scaling = params.map(|params| {
            spawn_scaling(params, buffer.clone(), shared.clone(), cancel.child_token())
        });

        let (exit_report, _) = watch::channel(None);
        let inner = Arc::new(PoolInner {
            shared,
            buffer,
            connector,
            workers: Mutex::new(WorkerSet {
                workers: Vec::new(),
                next_id: 0,
            }),
            scaling: Mutex::new(scaling),
            reconcile_task: parking_lot::Mutex::new(None),
            reconcile_cancel: cancel.child_token(),
            cancel,
            exit_started: AtomicBool::new(false),
            dropped_on_requeue: AtomicU64::new(0),
            exit_report,
        });

        let task = tokio::spawn(reconcile_loop(inner.clone()));
        *inner.reconcile_task.lock() = Some(task);

        info!(
            sink = inner.connector.name(),
            ?mode,
            buffer_capacity = inner.buffer.capacity(),
            "Pool started"
        );
        inner.shared.request_reconcile();

        Ok(Self { inner })
    }

    /// The sink this pool delivers to
    pub fn sink(&self) -> &Arc<S> {
        self.inner.connector.sink()
    }

    /// Current configuration snapshot
    pub fn config(&self) -> PoolConfig {
        self.inner.shared.with_state(|s| s.config.clone())
    }

    pub fn is_exiting(&self) -> bool {
        self.inner.shared.is_exiting()
    }

    /// Replace the configuration and reconcile against it.
    ///
    /// The buffer keeps the capacity it was created with.
    pub async fn reload(&self, config: PoolConfig) -> Result<()> {
        let config = config.normalized()?;
        let inner = &self.inner;
        let params = ScalingParams::from_config(&config);

        let never_connected = inner.shared.with_state(|s| {
            if s.phase.is_exiting() {
                return Err(PoolError::PoolClosed);
            }
            let never_connected = s.last_connection.is_none();
            s.errors
                .reconfigure(config.error_window(), config.error_threshold);
            s.mode = config.worker_mode();
            if !s.mode.is_autoscaled() || never_connected {
                s.desired_workers = 0;
            }
            s.config = config.clone();
            Ok(never_connected)
        })?;

        if config.buffer_capacity != inner.buffer.capacity() {
            warn!(
                current = inner.buffer.capacity(),
                requested = config.buffer_capacity,
                "Buffer capacity cannot change on reload, keeping current capacity"
            );
        }

        inner
            .connector
            .reconfigure(config.sink.clone(), config.connect_timeout());
        inner.reconfigure_scaling(params, never_connected).await;

        info!(
            sink = inner.connector.name(),
            mode = ?config.worker_mode(),
            "Pool configuration reloaded"
        );
        inner.shared.request_reconcile();
        Ok(())
    }

    /// Add a record, waiting while the buffer is full
    pub async fn enqueue(&self, record: impl Into<Bytes>) -> Result<()> {
        if self.inner.shared.is_exiting() {
            return Err(PoolError::PoolClosed);
        }
        self.inner.buffer.push(record.into()).await?;
        self.inner.shared.metrics().record_enqueued();
        Ok(())
    }

    /// Add a record without waiting
    pub fn try_enqueue(&self, record: impl Into<Bytes>) -> Result<()> {
        if self.inner.shared.is_exiting() {
            return Err(PoolError::PoolClosed);
        }
        self.inner.buffer.try_push(record.into())?;
        self.inner.shared.metrics().record_enqueued();
        Ok(())
    }

    /// Shut the pool down.
    ///
    /// Idempotent: concurrent and repeated calls share one shutdown and all
    /// get the same report.
    pub async fn exit(&self) -> ExitReport {
        if self.inner.exit_started.swap(true, Ordering::AcqRel) {
            return self.wait().await;
        }

        let report = self.inner.shutdown().await;
        self.inner.exit_report.send_replace(Some(report));
        report
    }

    /// Wait until the pool has shut down
    pub async fn wait(&self) -> ExitReport {
        let mut rx = self.inner.exit_report.subscribe();
        let report = match rx.wait_for(Option::is_some).await {
            Ok(report) => (*report).unwrap_or_default(),
            Err(_) => ExitReport::default(),
        };
        report
    }

    pub fn status(&self) -> PoolStatus {
        let inner = &self.inner;
        let metrics = inner.shared.metrics();

        inner.shared.with_state(|s| PoolStatus {
            sink: inner.connector.name().to_string(),
            phase: s.phase,
            mode: s.mode,
            connection_healthy: s.connection_healthy,
            live_workers: s.live_workers,
            desired_workers: s.target_workers(),
            error_count: s.errors.error_count(),
            buffered: inner.buffer.len(),
            buffer_capacity: inner.buffer.capacity(),
            last_connection: s.last_connection,
            records_sent: metrics.records_sent(),
            send_failures: metrics.send_failures(),
            reconnects: metrics.reconnects(),
            blocked_enqueues: inner.buffer.blocked_enqueues(),
        })
    }
}

impl<S: Sink> Drop for Pool<S> {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

/// Connect to `sink` once with the parameters of `config` and push an empty
/// batch through the fresh handle, without starting a pool.
pub async fn verify_sink<S: Sink>(config: &PoolConfig, sink: Arc<S>) -> Result<()> {
    let config = config.normalized()?;
    let connector = SinkConnector::new(sink, config.sink.clone(), config.connect_timeout());

    connector
        .connect()
        .await
        .map_err(|e| PoolError::connect(connector.name(), e))?;
    connector
        .send(Batch::default())
        .await
        .map_err(|e| PoolError::send(connector.name(), e))?;
    connector.disconnect();

    debug!(sink = connector.name(), "Sink verified");
    Ok(())
}

fn spawn_scaling(
    params: ScalingParams,
    buffer: RecordBuffer,
    shared: Arc<SharedState>,
    cancel: CancellationToken,
) -> Scaling {
    let controller = Arc::new(parking_lot::Mutex::new(ScalingController::new(params)));
    let task = ScalingTask::spawn(controller.clone(), buffer, shared, cancel);
    Scaling { controller, task }
}

async fn reconcile_loop<S: Sink>(inner: Arc<PoolInner<S>>) {
    let cancel = inner.reconcile_cancel.clone();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = inner.shared.reconcile_signal().wait() => {}
        }

        if !inner.shared.begin_reconcile() {
            continue;
        }
        let live = inner.reconcile().await;
        inner.shared.end_reconcile(live);
    }

    debug!("Reconcile loop stopped");
}

impl<S: Sink> PoolInner<S> {
    /// One reconciliation pass, returns the live worker count
    async fn reconcile(&self) -> usize {
        let mut set = self.workers.lock().await;

        let connected = tokio::select! {
            biased;
            _ = self.reconcile_cancel.cancelled() => return set.workers.len(),
            result = self.connector.connect() => result,
        };

        if let Err(e) = connected {
            let live = set.workers.len();
            drop(set);
            self.connect_failed(e).await;
            return live;
        }

        self.shared.mark_connected();

        let target = self.shared.with_state(|s| s.target_workers());
        let ids: Vec<WorkerId> = set.workers.iter().map(Worker::id).collect();
        let plan = ReconcilePlan::compute(&ids, target, set.next_id);

        if plan.is_noop() {
            return ids.len();
        }
        info!(
            sink = self.connector.name(),
            from = ids.len(),
            to = target,
            "Reconciling workers"
        );

        for id in plan.remove {
            let Some(worker) = set.workers.pop() else {
                break;
            };
            debug_assert_eq!(worker.id(), id);
            let report = worker.stop().await;
            self.requeue(report.unsent);
        }

        for id in plan.create {
            set.workers.push(Worker::spawn(
                id,
                self.buffer.clone(),
                self.connector.clone(),
                self.shared.clone(),
                self.cancel.child_token(),
            ));
            set.next_id = id + 1;
        }

        set.workers.len()
    }

    async fn connect_failed(&self, err: SinkError) {
        let retry = self.shared.with_state(|s| s.config.connection_retry());

        self.shared.metrics().record_connect_failure();
        warn!(
            sink = self.connector.name(),
            error = %err,
            retry_in = ?retry,
            "Failed to connect to sink"
        );
        self.shared.report_failure();
        self.shared.mark_connect_failed();

        tokio::select! {
            biased;
            _ = self.reconcile_cancel.cancelled() => {}
            _ = tokio::time::sleep(retry) => {
                self.shared.clear_reconnect_pending();
                self.shared.request_reconcile();
            }
        }
    }

    /// Put back a batch a stopped worker could not deliver
    fn requeue(&self, records: Vec<Bytes>) {
        let mut lost = 0;
        for record in records {
            if self.buffer.try_push(record).is_err() {
                lost += 1;
            }
        }

        if lost > 0 {
            warn!(
                sink = self.connector.name(),
                lost, "Buffer full, dropped records of a stopped worker"
            );
            self.shared.metrics().record_lost(lost);
            self.dropped_on_requeue
                .fetch_add(lost as u64, Ordering::Relaxed);
        }
    }

    async fn reconfigure_scaling(&self, params: Option<ScalingParams>, reset: bool) {
        let mut scaling = self.scaling.lock().await;

        match (scaling.take(), params) {
            (Some(current), Some(params)) => {
                current.controller.lock().reconfigure(params, reset);
                *scaling = Some(current);
            }
            (Some(current), None) => {
                debug!("Switching to a fixed worker count, stopping scaling controller");
                current.task.stop().await;
            }
            (None, Some(params)) => {
                // exit() marks the pool as draining before it takes this lock
                if !self.shared.is_exiting() {
                    debug!("Switching to autoscaling, starting scaling controller");
                    *scaling = Some(spawn_scaling(
                        params,
                        self.buffer.clone(),
                        self.shared.clone(),
                        self.cancel.child_token(),
                    ));
                }
            }
            (None, None) => {}
        }
    }

    async fn shutdown(&self) -> ExitReport {
        info!(sink = self.connector.name(), "Pool exiting");
        self.shared.with_state(|s| s.phase = PoolPhase::Draining);

        if let Some(scaling) = self.scaling.lock().await.take() {
            scaling.task.stop().await;
        }

        self.reconcile_cancel.cancel();
        let task = self.reconcile_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(error = %e, "Reconcile task failed");
            }
        }

        // Every worker observes this between sends
        self.cancel.cancel();

        let mut unsent = 0;
        let mut set = self.workers.lock().await;
        while let Some(worker) = set.workers.pop() {
            unsent += worker.stop().await.unsent.len();
        }
        drop(set);

        let buffered = self.buffer.close().await;
        let lost = buffered + unsent;
        if lost > 0 {
            warn!(
                sink = self.connector.name(),
                lost, buffered, unsent, "Records lost at exit"
            );
            self.shared.metrics().record_lost(lost);
        }

        self.connector.disconnect();

        // Already counted in the metric when they were dropped
        let dropped = self.dropped_on_requeue.load(Ordering::Relaxed);

        self.shared.with_state(|s| {
            s.phase = PoolPhase::Closed;
            s.live_workers = 0;
            s.connection_healthy = false;
        });
        self.shared.metrics().set_live_workers(0);

        let metrics = self.shared.metrics();
        let report = ExitReport {
            lost_records: lost as u64 + dropped,
            records_sent: metrics.records_sent(),
            send_failures: metrics.send_failures(),
        };
        info!(
            sink = self.connector.name(),
            lost_records = report.lost_records,
            records_sent = report.records_sent,
            "Pool closed"
        );
        report
    }
}
