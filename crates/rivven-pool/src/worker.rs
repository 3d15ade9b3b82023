//! Pool workers
//!
//! A worker drains the shared buffer in batches and pushes each batch through
//! the sink connector. A failed send is reported to the error window and the
//! same batch is retried with backoff; failures never end the loop. The exit
//! signal is observed between sends, so an in-flight send always completes.

use crate::buffer::RecordBuffer;
use crate::reconcile::WorkerId;
use crate::sink::{Batch, Sink, SinkConnector};
use crate::state::SharedState;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

const RETRY_INITIAL_DELAY: Duration = Duration::from_millis(100);

/// What a worker hands back when it stops
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerReport {
    /// Records delivered by this worker
    pub records_sent: u64,
    /// Failed send calls
    pub send_failures: u64,
    /// Batch taken from the buffer but not delivered when the stop arrived
    pub unsent: Vec<Bytes>,
}

/// A running worker task
pub struct Worker {
    id: WorkerId,
    cancel: CancellationToken,
    task: JoinHandle<WorkerReport>,
}

impl Worker {
    /// Start a worker draining `buffer` into `connector`
    pub fn spawn<S: Sink>(
        id: WorkerId,
        buffer: RecordBuffer,
        connector: Arc<SinkConnector<S>>,
        shared: Arc<SharedState>,
        cancel: CancellationToken,
    ) -> Self {
        let task = tokio::spawn(run(id, buffer, connector, shared, cancel.clone()));
        debug!(worker = id, "Worker started");
        Self { id, cancel, task }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Ask the worker to exit and wait for its acknowledgment
    pub async fn stop(self) -> WorkerReport {
        self.cancel.cancel();
        match self.task.await {
            Ok(report) => {
                debug!(
                    worker = self.id,
                    sent = report.records_sent,
                    unsent = report.unsent.len(),
                    "Worker stopped"
                );
                report
            }
            Err(e) => {
                error!(worker = self.id, error = %e, "Worker task failed");
                WorkerReport::default()
            }
        }
    }
}

async fn run<S: Sink>(
    id: WorkerId,
    buffer: RecordBuffer,
    connector: Arc<SinkConnector<S>>,
    shared: Arc<SharedState>,
    cancel: CancellationToken,
) -> WorkerReport {
    let mut report = WorkerReport::default();

    loop {
        let max_batch = shared.with_state(|s| s.config.max_batch_records);

        let records = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            records = buffer.pop_batch(max_batch) => match records {
                Some(records) => records,
                None => break,
            },
        };

        let batch = Batch::new(records);
        let len = batch.len() as u64;

        if deliver(id, &batch, &connector, &shared, &cancel, &mut report).await {
            report.records_sent += len;
        } else {
            report.unsent = batch.into_records();
            break;
        }
    }

    report
}

/// Send `batch` until it succeeds. Returns `false` if the worker was asked
/// to exit before the batch got through.
async fn deliver<S: Sink>(
    id: WorkerId,
    batch: &Batch,
    connector: &SinkConnector<S>,
    shared: &SharedState,
    cancel: &CancellationToken,
    report: &mut WorkerReport,
) -> bool {
    let mut delay = RETRY_INITIAL_DELAY;

    loop {
        match connector.send(batch.clone()).await {
            Ok(()) => {
                shared.metrics().record_sent(batch.len());
                return true;
            }
            Err(e) => {
                report.send_failures += 1;
                shared.metrics().record_send_failure(batch.len());
                if e.is_retryable() {
                    warn!(
                        worker = id,
                        sink = connector.name(),
                        records = batch.len(),
                        error = %e,
                        "Send failed, retrying"
                    );
                } else {
                    error!(
                        worker = id,
                        sink = connector.name(),
                        records = batch.len(),
                        error = %e,
                        "Send rejected by sink, retrying until reconnect"
                    );
                }
                shared.report_failure();
            }
        }

        let max_delay = shared.with_state(|s| s.config.connection_retry());
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return false,
            _ = tokio::time::sleep(delay) => {}
        }
        delay = (delay * 2).min(max_delay.max(RETRY_INITIAL_DELAY));
    }
}
