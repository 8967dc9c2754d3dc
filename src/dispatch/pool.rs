//! Worker pool over a shared task queue.
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │ Partitioner │────▶│  Workers    │────▶│ Coordinator │
//! │             │     │  (N tasks)  │     │  (merge)    │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        │                   │
//!     task queue        result channel
//! ```
//!
//! The coordinator waits for one outcome per dispatched partition. There is
//! no timeout: a transform that never returns blocks the job.

use super::group::panic_message;
use super::metrics::Metrics;
use super::reduce::merge;
use crate::bundle::{dispatch_units, ConfigBundle, DispatchUnit};
use crate::error::{Error, PartitionFailure, Result};
use crate::model::RecordingSet;
use crate::partition::partition;
use crate::transform::Transform;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

/// Options for [`pooled_process`].
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Number of concurrent workers
    pub worker_count: usize,

    /// Partitions per worker; the queue holds `worker_count * chunks_per_worker`
    pub chunks_per_worker: usize,

    /// Log progress at `info` instead of `debug`
    pub verbose: bool,

    /// Counters updated during the run
    pub metrics: Option<Arc<Metrics>>,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            worker_count: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            chunks_per_worker: 1,
            verbose: false,
            metrics: None,
        }
    }
}

impl PoolOptions {
    pub fn new(worker_count: usize) -> Self {
        Self {
            worker_count,
            ..Default::default()
        }
    }

    pub fn with_chunks_per_worker(mut self, chunks_per_worker: usize) -> Self {
        self.chunks_per_worker = chunks_per_worker;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Total partitions placed on the queue.
    pub fn chunk_count(&self) -> usize {
        self.worker_count.saturating_mul(self.chunks_per_worker)
    }
}

/// What a worker reports back for one partition.
#[derive(Debug)]
pub struct TaskOutcome {
    pub index: usize,
    pub result: std::result::Result<RecordingSet, String>,
}

/// Partition `recordings`, transform every partition on a pool of workers,
/// and merge the results in partition order.
///
/// Every failure is reported: if any partition errors, panics, or never
/// reports back, the whole job fails with [`Error::WorkersFailed`] naming
/// the affected partitions.
pub async fn pooled_process(
    recordings: &RecordingSet,
    config: &ConfigBundle,
    transform: Arc<dyn Transform>,
    options: PoolOptions,
) -> Result<RecordingSet> {
    if options.worker_count == 0 {
        return Err(Error::InvalidWorkerCount(options.worker_count));
    }
    if options.chunks_per_worker == 0 {
        return Err(Error::InvalidWorkerCount(options.chunks_per_worker));
    }

    let verbose = options.verbose;
    let metrics = options.metrics.clone().unwrap_or_else(Metrics::new);

    let partition_start = Instant::now();
    let partitions = partition(recordings, &config.catalog, options.chunk_count(), None)?;
    metrics.add_partition_time(partition_start.elapsed());
    metrics.add_recordings_in(partitions.recording_count() as u64);
    metrics.add_recordings_dropped(partitions.dropped() as u64);

    let units = dispatch_units(partitions, config);
    let expected = units.len();
    metrics.add_partitions_dispatched(expected as u64);

    progress!(
        verbose,
        "Dispatching {} partitions to {} workers (transform: {})",
        expected,
        options.worker_count,
        transform.name()
    );

    // Shared FIFO queue; closed once filled so workers stop when it drains
    let (work_tx, work_rx) = async_channel::bounded::<DispatchUnit>(expected.max(1));
    for unit in units {
        work_tx.send(unit).await.map_err(|e| {
            Error::Config(format!(
                "work queue closed before partition {} was queued",
                e.0.index()
            ))
        })?;
    }
    work_tx.close();

    let (result_tx, mut result_rx) = mpsc::channel::<TaskOutcome>(expected.max(1));

    let mut handles = Vec::with_capacity(options.worker_count);
    for worker in 0..options.worker_count {
        let work_rx = work_rx.clone();
        let result_tx = result_tx.clone();
        let transform = transform.clone();
        let metrics = metrics.clone();

        handles.push(tokio::spawn(async move {
            while let Ok(unit) = work_rx.recv().await {
                let outcome = run_unit(unit, transform.clone(), &metrics).await;
                progress!(
                    verbose,
                    "Worker {} finished partition {} ({})",
                    worker,
                    outcome.index,
                    if outcome.result.is_ok() { "ok" } else { "failed" }
                );
                if result_tx.send(outcome).await.is_err() {
                    tracing::debug!("Result receiver dropped, stopping worker {}", worker);
                    break;
                }
            }
        }));
    }
    drop(result_tx);

    let mut slots: Vec<Option<RecordingSet>> = (0..expected).map(|_| None).collect();
    let mut failures = Vec::new();
    let mut received = 0;

    while let Some(outcome) = result_rx.recv().await {
        received += 1;
        match outcome.result {
            Ok(set) => {
                if let Some(slot) = slots.get_mut(outcome.index) {
                    *slot = Some(set);
                }
            }
            Err(message) => {
                tracing::warn!("Partition {} failed: {}", outcome.index, message);
                failures.push(PartitionFailure {
                    partition: Some(outcome.index),
                    message,
                });
            }
        }
    }

    for (worker, handle) in handles.into_iter().enumerate() {
        if let Err(e) = handle.await {
            tracing::warn!("Worker {} did not finish cleanly: {}", worker, e);
        }
    }

    for (index, slot) in slots.iter().enumerate() {
        let reported = failures.iter().any(|f| f.partition == Some(index));
        if slot.is_none() && !reported {
            failures.push(PartitionFailure {
                partition: Some(index),
                message: "no result received".to_string(),
            });
        }
    }

    if !failures.is_empty() {
        failures.sort_by_key(|f| f.partition);
        return Err(Error::WorkersFailed {
            failures,
            expected,
            received,
        });
    }

    let merge_start = Instant::now();
    let merged = merge(slots.into_iter().flatten().collect());
    metrics.add_merge_time(merge_start.elapsed());
    metrics.add_recordings_out(merged.len() as u64);

    progress!(
        verbose,
        "Pool finished: {} partitions, {} recordings out",
        expected,
        merged.len()
    );

    Ok(merged)
}

/// Run the transform for one unit on the blocking pool.
async fn run_unit(unit: DispatchUnit, transform: Arc<dyn Transform>, metrics: &Metrics) -> TaskOutcome {
    let DispatchUnit { partition, config } = unit;
    let index = partition.index;

    let joined = tokio::task::spawn_blocking(move || {
        let start = Instant::now();
        let result = transform.apply(partition.recordings, &config);
        (result, start.elapsed())
    })
    .await;

    let result = match joined {
        Ok((Ok(set), elapsed)) => {
            metrics.add_transform_time(elapsed);
            metrics.add_partition_completed();
            Ok(set)
        }
        Ok((Err(e), elapsed)) => {
            metrics.add_transform_time(elapsed);
            metrics.add_partition_failed();
            Err(format!("{:#}", e))
        }
        Err(e) => {
            metrics.add_partition_failed();
            if e.is_panic() {
                Err(format!("transform panicked: {}", panic_message(e.into_panic().as_ref())))
            } else {
                Err(format!("transform task cancelled: {}", e))
            }
        }
    };

    TaskOutcome { index, result }
}
