//! Fixed-group dispatch: one partition per rank, moved with collectives.
//!
//! Rank [`ROOT`] holds the input. It partitions into exactly `size` chunks,
//! scatters them, broadcasts the config bundle, and after every rank has run
//! the transform it gathers and merges the results. Every rank must call
//! [`collective_process`]; only the root gets `Some` back.

use super::group::{panic_message, probe_collective, Communicator};
use super::metrics::Metrics;
use super::reduce::merge;
use crate::bundle::ConfigBundle;
use crate::error::{Error, Result};
use crate::model::RecordingSet;
use crate::partition::{partition, Partition};
use crate::transform::Transform;
use std::sync::Arc;
use std::time::Instant;

/// Rank that owns the input and the merged output.
pub const ROOT: usize = 0;

/// Options for [`collective_process`].
#[derive(Debug, Clone, Default)]
pub struct CollectiveOptions {
    /// Log progress at `info` instead of `debug`
    pub verbose: bool,

    /// Counters updated during the run
    pub metrics: Option<Arc<Metrics>>,
}

impl CollectiveOptions {
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

/// Run this rank's share of a collective job.
///
/// On the root, `recordings` and `config` are required; their absence fails
/// with [`Error::MissingInput`] before any collective is issued. Other ranks
/// ignore both. Any failure aborts the group so no peer is left waiting.
pub async fn collective_process<C: Communicator>(
    comm: &C,
    recordings: Option<RecordingSet>,
    config: Option<ConfigBundle>,
    transform: Arc<dyn Transform>,
    options: &CollectiveOptions,
) -> Result<Option<RecordingSet>> {
    let result = process_rank(comm, recordings, config, transform, options).await;
    if let Err(e) = &result {
        comm.abort(&format!("rank {} failed: {}", comm.rank(), e));
    }
    result
}

async fn process_rank<C: Communicator>(
    comm: &C,
    recordings: Option<RecordingSet>,
    config: Option<ConfigBundle>,
    transform: Arc<dyn Transform>,
    options: &CollectiveOptions,
) -> Result<Option<RecordingSet>> {
    let rank = comm.rank();
    let size = comm.size();
    let verbose = options.verbose;

    let (chunks, bundle) = if rank == ROOT {
        let recordings = recordings.ok_or(Error::MissingInput("recordings"))?;
        let config = config.ok_or(Error::MissingInput("config"))?;

        let start = Instant::now();
        let partitions = partition(&recordings, &config.catalog, size, None)?;
        if let Some(metrics) = &options.metrics {
            metrics.add_partition_time(start.elapsed());
            metrics.add_recordings_in(partitions.recording_count() as u64);
            metrics.add_recordings_dropped(partitions.dropped() as u64);
            metrics.add_partitions_dispatched(partitions.len() as u64);
        }

        progress!(
            verbose,
            "Scattering {} partitions across {} ranks (transform: {})",
            partitions.len(),
            size,
            transform.name()
        );
        (Some(partitions.into_inner()), Some(config))
    } else {
        (None, None)
    };

    let mine: Partition = comm.scatter(ROOT, chunks).await?;
    let bundle: ConfigBundle = comm.broadcast(ROOT, bundle).await?;

    let Partition {
        index,
        recordings,
        catalog,
        ..
    } = mine;
    let mut local = bundle;
    local.catalog = catalog;

    progress!(
        verbose,
        "Rank {} transforming partition {} ({} recordings)",
        rank,
        index,
        recordings.len()
    );

    let joined = tokio::task::spawn_blocking(move || {
        let start = Instant::now();
        let result = transform.apply(recordings, &local);
        (result, start.elapsed())
    })
    .await;

    let output = match joined {
        Ok((Ok(set), elapsed)) => {
            if let Some(metrics) = &options.metrics {
                metrics.add_transform_time(elapsed);
                metrics.add_partition_completed();
            }
            set
        }
        Ok((Err(e), _)) => {
            if let Some(metrics) = &options.metrics {
                metrics.add_partition_failed();
            }
            return Err(Error::Transform {
                partition: index,
                message: format!("{:#}", e),
            });
        }
        Err(e) => {
            if let Some(metrics) = &options.metrics {
                metrics.add_partition_failed();
            }
            let message = if e.is_panic() {
                format!("transform panicked: {}", panic_message(e.into_panic().as_ref()))
            } else {
                format!("transform task cancelled: {}", e)
            };
            return Err(Error::Transform {
                partition: index,
                message,
            });
        }
    };

    let Some(chunks) = comm.gather(ROOT, output).await? else {
        return Ok(None);
    };

    let start = Instant::now();
    let merged = merge(chunks);
    if let Some(metrics) = &options.metrics {
        metrics.add_merge_time(start.elapsed());
        metrics.add_recordings_out(merged.len() as u64);
    }

    progress!(verbose, "Gathered {} recordings from {} ranks", merged.len(), size);
    Ok(Some(merged))
}

/// Form a group of `size` ranks on the current runtime, run a collective job
/// on it, and return the root's merged output.
///
/// Fails with [`Error::RuntimeUnavailable`] when the group cannot be formed.
pub async fn run_collective(
    size: usize,
    recordings: RecordingSet,
    config: ConfigBundle,
    transform: Arc<dyn Transform>,
    options: CollectiveOptions,
) -> Result<RecordingSet> {
    let group = probe_collective(size)?;
    let mut inputs = Some((recordings, config));

    let outputs = group
        .run(|comm| {
            let inputs = if comm.rank() == ROOT { inputs.take() } else { None };
            let transform = transform.clone();
            let options = options.clone();

            async move {
                let (recordings, config) = match inputs {
                    Some((recordings, config)) => (Some(recordings), Some(config)),
                    None => (None, None),
                };
                collective_process(&comm, recordings, config, transform, &options).await
            }
        })
        .await?;

    outputs
        .into_iter()
        .next()
        .flatten()
        .ok_or(Error::MissingInput("root rank output"))
}
