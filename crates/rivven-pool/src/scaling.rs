//! Autoscaling control loop
//!
//! The [`ScalingController`] turns buffer occupancy into a desired worker
//! count. It moves one worker at a time and never acts twice inside the
//! cool-down period. The very first evaluation only seeds the count with the
//! lower bound; that seed does not start the cool-down clock, so the pool can
//! react to load on the next tick.
//!
//! [`ScalingTask`] drives a controller on its own interval, independent of
//! reconciliation, and raises the reconcile signal whenever the desired count
//! changes.

use crate::buffer::RecordBuffer;
use crate::config::{PoolConfig, WorkerMode};
use crate::state::SharedState;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Controller parameters taken from a pool configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalingParams {
    pub min_workers: usize,
    pub max_workers: usize,
    pub warm_up_threshold: f64,
    pub interval: Duration,
    pub cool_down: Duration,
}

impl ScalingParams {
    /// Parameters for an autoscaled configuration, `None` for a fixed one
    pub fn from_config(config: &PoolConfig) -> Option<Self> {
        match config.worker_mode() {
            WorkerMode::Fixed(_) => None,
            WorkerMode::Autoscaled { min, max } => Some(Self {
                min_workers: min,
                max_workers: max,
                warm_up_threshold: config.warm_up_threshold,
                interval: config.evaluation_interval(),
                cool_down: config.cool_down_period(),
            }),
        }
    }
}

/// Outcome of an evaluation that changed the desired count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleDecision {
    pub previous: Option<usize>,
    pub desired: usize,
    /// First evaluation seeding the lower bound
    pub bootstrap: bool,
}

/// Hysteresis-bounded desired worker count
#[derive(Debug, Clone)]
pub struct ScalingController {
    params: ScalingParams,
    desired: Option<usize>,
    last_action: Option<Instant>,
}

impl ScalingController {
    pub fn new(params: ScalingParams) -> Self {
        Self {
            params,
            desired: None,
            last_action: None,
        }
    }

    pub fn params(&self) -> &ScalingParams {
        &self.params
    }

    /// Current desired count, `None` before the first evaluation
    pub fn desired(&self) -> Option<usize> {
        self.desired
    }

    /// Time of the last scale action
    pub fn last_action(&self) -> Option<Instant> {
        self.last_action
    }

    /// Evaluate buffer occupancy `load` at `now`
    pub fn evaluate(&mut self, load: f64, now: Instant) -> Option<ScaleDecision> {
        let ScalingParams {
            min_workers,
            max_workers,
            ..
        } = self.params;

        let Some(current) = self.desired else {
            self.desired = Some(min_workers);
            return Some(ScaleDecision {
                previous: None,
                desired: min_workers,
                bootstrap: true,
            });
        };

        let next = if load > self.params.warm_up_threshold {
            current.saturating_add(1)
        } else {
            current.saturating_sub(1)
        }
        .clamp(min_workers, max_workers);

        if next == current {
            return None;
        }

        if let Some(last) = self.last_action {
            if now.saturating_duration_since(last) < self.params.cool_down {
                return None;
            }
        }

        self.desired = Some(next);
        self.last_action = Some(now);
        Some(ScaleDecision {
            previous: Some(current),
            desired: next,
            bootstrap: false,
        })
    }

    /// Apply new parameters.
    ///
    /// Unless `reset` is set, the desired count (re-clamped) and the cool-down
    /// history survive.
    pub fn reconfigure(&mut self, params: ScalingParams, reset: bool) {
        self.params = params;
        if reset {
            self.desired = None;
            self.last_action = None;
        } else {
            self.desired = self
                .desired
                .map(|d| d.clamp(params.min_workers, params.max_workers));
        }
    }
}

/// Running control loop
pub struct ScalingTask {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ScalingTask {
    /// Start evaluating `controller` against `buffer`
    pub fn spawn(
        controller: Arc<Mutex<ScalingController>>,
        buffer: RecordBuffer,
        shared: Arc<SharedState>,
        cancel: CancellationToken,
    ) -> Self {
        let task = tokio::spawn(run(controller, buffer, shared, cancel.clone()));
        Self { cancel, task }
    }

    /// Cancel the loop and wait for it to finish
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Scaling task failed");
        }
    }
}

async fn run(
    controller: Arc<Mutex<ScalingController>>,
    buffer: RecordBuffer,
    shared: Arc<SharedState>,
    cancel: CancellationToken,
) {
    debug!("Scaling controller started");

    loop {
        tick(&controller, &buffer, &shared);

        let interval = controller.lock().params().interval;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    debug!("Scaling controller stopped");
}

/// One evaluation, run entirely under the controller lock
fn tick(controller: &Mutex<ScalingController>, buffer: &RecordBuffer, shared: &SharedState) {
    let mut controller = controller.lock();
    let load = buffer.load();

    let Some(decision) = controller.evaluate(load, Instant::now()) else {
        return;
    };

    shared.with_state(|s| s.desired_workers = decision.desired);

    if decision.bootstrap {
        shared.metrics().set_desired_workers(decision.desired);
        debug!(desired = decision.desired, "Seeded desired worker count");
    } else {
        shared.metrics().record_scale_action(decision.desired);
        info!(
            load,
            from = decision.previous,
            to = decision.desired,
            "Scaling worker pool"
        );
    }

    shared.request_reconcile();
}
