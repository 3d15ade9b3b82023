//! Pool state shared between the supervisor, its workers and the scaling loop
//!
//! Everything mutable lives in one [`PoolState`] behind a single lock. The
//! lock guards state transitions only; it is never held across an `.await`.

use crate::config::{PoolConfig, WorkerMode};
use crate::error::PoolPhase;
use crate::error_window::ErrorWindow;
use crate::metrics::PoolMetrics;
use crate::signal::ReconcileSignal;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::time::Instant;
use tracing::{debug, warn};

/// Mutable pool state
#[derive(Debug)]
pub struct PoolState {
    pub config: PoolConfig,
    pub mode: WorkerMode,
    pub phase: PoolPhase,
    /// Last value emitted by the scaling controller (0 = never set)
    pub desired_workers: usize,
    pub live_workers: usize,
    pub connection_healthy: bool,
    pub last_connection: Option<DateTime<Utc>>,
    /// A reconciliation pass is running
    pub reconciling: bool,
    /// A threshold-driven reconnect was requested and has not finished yet
    pub reconnect_pending: bool,
    pub errors: ErrorWindow,
}

impl PoolState {
    pub fn new(config: PoolConfig) -> Self {
        let errors = ErrorWindow::new(config.error_window(), config.error_threshold);
        Self {
            mode: config.worker_mode(),
            config,
            phase: PoolPhase::Reconnecting,
            desired_workers: 0,
            live_workers: 0,
            connection_healthy: false,
            last_connection: None,
            reconciling: false,
            reconnect_pending: false,
            errors,
        }
    }

    /// Worker count the next reconciliation should reach
    pub fn target_workers(&self) -> usize {
        self.mode.target(self.desired_workers)
    }
}

/// State plus the channels everybody needs to reach it
pub struct SharedState {
    state: Mutex<PoolState>,
    reconcile: ReconcileSignal,
    metrics: PoolMetrics,
}

impl SharedState {
    pub fn new(config: PoolConfig, metrics: PoolMetrics) -> Self {
        Self {
            state: Mutex::new(PoolState::new(config)),
            reconcile: ReconcileSignal::new(),
            metrics,
        }
    }

    /// Run `f` under the pool lock
    pub fn with_state<T>(&self, f: impl FnOnce(&mut PoolState) -> T) -> T {
        f(&mut self.state.lock())
    }

    pub fn reconcile_signal(&self) -> &ReconcileSignal {
        &self.reconcile
    }

    pub fn metrics(&self) -> &PoolMetrics {
        &self.metrics
    }

    pub fn phase(&self) -> PoolPhase {
        self.state.lock().phase
    }

    pub fn is_exiting(&self) -> bool {
        self.state.lock().phase.is_exiting()
    }

    /// Ask for a reconciliation pass (coalesces with a pending one)
    pub fn request_reconcile(&self) -> bool {
        self.reconcile.raise()
    }

    /// Single entry point for send and connect failures.
    ///
    /// Returns `true` if this failure raised a new reconnect trigger.
    pub fn report_failure(&self) -> bool {
        let mut state = self.state.lock();
        if state.phase.is_exiting() {
            return false;
        }

        let tripped = state.errors.record_failure(Instant::now());
        let errors = state.errors.error_count();
        debug!(errors, "Sink failure recorded");

        if !tripped || state.reconnect_pending {
            return false;
        }

        state.reconnect_pending = true;
        state.connection_healthy = false;
        state.phase = PoolPhase::Reconnecting;
        drop(state);

        warn!(
            errors,
            "Error threshold exceeded inside the error window, forcing reconnect"
        );
        self.metrics.record_reconnect();
        self.reconcile.raise();
        true
    }

    /// Record a successful connect
    pub fn mark_connected(&self) {
        let mut state = self.state.lock();
        state.errors.reset();
        state.reconnect_pending = false;
        state.connection_healthy = true;
        state.last_connection = Some(Utc::now());
        if !state.phase.is_exiting() {
            state.phase = PoolPhase::Warm;
        }
    }

    /// Record a failed connect
    pub fn mark_connect_failed(&self) {
        let mut state = self.state.lock();
        state.connection_healthy = false;
        if !state.phase.is_exiting() {
            state.phase = PoolPhase::Reconnecting;
        }
    }

    /// Try to become the only running reconciliation pass
    pub fn begin_reconcile(&self) -> bool {
        let mut state = self.state.lock();
        if state.phase.is_exiting() || state.reconciling {
            return false;
        }
        state.reconciling = true;
        true
    }

    pub fn end_reconcile(&self, live_workers: usize) {
        let mut state = self.state.lock();
        state.reconciling = false;
        state.live_workers = live_workers;
        drop(state);
        self.metrics.set_live_workers(live_workers);
    }

    /// Clear the reconnect marker so the next threshold crossing can re-trigger
    pub fn clear_reconnect_pending(&self) {
        self.state.lock().reconnect_pending = false;
    }
}
