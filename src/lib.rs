//! Station-parallel processing of seismic recordings.
//!
//! Parallelizes an opaque per-partition transform over a large set of
//! station recordings: partition by station, dispatch partitions to
//! workers, transform each one, and merge the results.
//!
//! # Architecture
//!
//! - **Model**: recordings, recording sets and the station catalog
//! - **Partition**: round-robin, station-aligned splitting
//! - **Bundle**: per-worker config copies with the catalog narrowed
//! - **Dispatch**: a fixed rank group using collectives, or a worker pool
//!   over a shared queue, plus the reducer and metrics
//! - **Transform**: the per-partition contract and built-in transforms
//!
//! # Usage
//!
//! ```no_run
//! use seispar::{run_job, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_file("job.yaml")?;
//!     let report = run_job(&config).await?;
//!     println!("{}", report);
//!     Ok(())
//! }
//! ```

pub mod bundle;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod io;
pub mod model;
pub mod partition;
pub mod timing;
pub mod transform;

pub use bundle::{broadcast, dispatch_units, ConfigBundle, DispatchUnit};
pub use config::Config;
pub use dispatch::{
    collective_process, merge, pooled_process, probe_collective, run_collective,
    CollectiveOptions, Communicator, LocalGroup, Metrics, MetricsSnapshot, PoolOptions, Strategy,
};
pub use error::{Error, PartitionFailure, Result};
pub use model::{Catalog, Recording, RecordingId, RecordingSet, StationId};
pub use partition::{partition, plan, Partition, Partitions};
pub use timing::{format_hms, Timer, TimerError, TimingContext};
pub use transform::{Transform, TransformSpec};

use dispatch::MetricsReporter;
use std::fmt;
use tokio::sync::mpsc;

/// Outcome of [`run_job`].
#[derive(Debug)]
pub struct JobReport {
    /// Strategy actually used (never `Auto`)
    pub strategy: Strategy,
    pub recordings_in: usize,
    pub recordings_out: usize,
    pub output_path: String,
    pub metrics: MetricsSnapshot,
    pub timing: TimingContext,
}

impl fmt::Display for JobReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Strategy: {}, Recordings: {} in, {} out, Output: {} | {}",
            self.strategy, self.recordings_in, self.recordings_out, self.output_path, self.timing
        )
    }
}

/// Pick the strategy to run. `Auto` becomes `Collective` when a group of
/// `workers` ranks can be formed, otherwise `Pool`.
pub fn resolve_strategy(requested: Strategy, workers: usize) -> Strategy {
    match requested {
        Strategy::Auto => match probe_collective(workers) {
            Ok(group) => {
                tracing::info!(
                    "Collective runtime available, using collective strategy with {} ranks",
                    group.size()
                );
                Strategy::Collective
            }
            Err(e) => {
                tracing::warn!("{}; falling back to worker pool", e);
                Strategy::Pool
            }
        },
        other => other,
    }
}

/// Load inputs, run the configured strategy, and write the merged output.
pub async fn run_job(config: &Config) -> anyhow::Result<JobReport> {
    config.validate()?;

    let mut timing = TimingContext::new();
    let processing = &config.processing;

    tracing::info!("Loading recordings from {}", config.input.recordings);
    let (recordings, catalog) = timing.time("load", || -> anyhow::Result<_> {
        Ok((
            io::read_recordings(&config.input.recordings)?,
            io::read_catalog(&config.input.catalog)?,
        ))
    })?;
    tracing::info!(
        "Loaded {} recordings and {} stations",
        recordings.len(),
        catalog.station_count()
    );

    let recordings_in = recordings.len();
    let bundle = config.bundle(catalog);
    let transform = config.transform.build();
    let metrics = Metrics::new();
    let strategy = resolve_strategy(processing.strategy, processing.workers);

    // Periodic progress while dispatching
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
    let reporter_handle = if processing.enable_metrics {
        let reporter = MetricsReporter::new(metrics.clone(), processing.metrics_interval_secs);
        Some(tokio::spawn(reporter.run(shutdown_rx)))
    } else {
        drop(shutdown_rx);
        None
    };

    tracing::info!(
        "Running {} with {} strategy, {} workers",
        transform.name(),
        strategy,
        processing.workers
    );

    let mut timer = Timer::named("process");
    timer.start()?;
    let result = match strategy {
        Strategy::Collective => {
            let options = CollectiveOptions::default()
                .verbose(processing.verbose)
                .with_metrics(metrics.clone());
            run_collective(processing.workers, recordings, bundle, transform, options).await
        }
        Strategy::Pool | Strategy::Auto => {
            let options = PoolOptions::new(processing.workers)
                .with_chunks_per_worker(processing.chunks_per_worker)
                .verbose(processing.verbose)
                .with_metrics(metrics.clone());
            pooled_process(&recordings, &bundle, transform, options).await
        }
    };
    timing.stop(&mut timer)?;

    let _ = shutdown_tx.send(()).await;
    if let Some(handle) = reporter_handle {
        let _ = handle.await;
    }

    let output = result?;

    timing.time("write", || io::write_recordings(&config.output.path, &output))?;
    tracing::info!("Wrote {} recordings to {}", output.len(), config.output.path);

    if processing.enable_metrics {
        MetricsReporter::new(metrics.clone(), processing.metrics_interval_secs).print_summary();

        if let Some(ref path) = processing.metrics_output_path {
            if let Err(e) = metrics.snapshot().save_to_file(path) {
                tracing::warn!("Failed to save metrics to {}: {}", path, e);
            }
        }
    }
    timing.report();

    Ok(JobReport {
        strategy,
        recordings_in,
        recordings_out: output.len(),
        output_path: config.output.path.clone(),
        metrics: metrics.snapshot(),
        timing,
    })
}

/// One bucket of a [`JobPlan`].
#[derive(Debug, Clone)]
pub struct BucketPlan {
    pub index: usize,
    pub stations: Vec<StationId>,
    pub recordings: usize,
    pub synthetics: Option<usize>,
}

/// Station assignment for a job, computed without running the transform.
#[derive(Debug, Clone)]
pub struct JobPlan {
    /// Strategy the plan was made for (never `Auto`)
    pub strategy: Strategy,
    pub buckets: Vec<BucketPlan>,
    pub dropped: usize,
}

impl JobPlan {
    pub fn recording_count(&self) -> usize {
        self.buckets.iter().map(|b| b.recordings).sum()
    }
}

impl fmt::Display for JobPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for bucket in &self.buckets {
            let stations: Vec<String> = bucket.stations.iter().map(ToString::to_string).collect();
            write!(
                f,
                "Bucket {:>3}: {:>5} recordings",
                bucket.index, bucket.recordings
            )?;
            if let Some(synthetics) = bucket.synthetics {
                write!(f, ", {:>5} synthetics", synthetics)?;
            }
            writeln!(f, " | {}", stations.join(" "))?;
        }
        write!(
            f,
            "Total: {} recordings in {} buckets, {} dropped (station not in catalog)",
            self.recording_count(),
            self.buckets.len(),
            self.dropped
        )
    }
}

/// Partition the configured inputs the way [`run_job`] would and report the
/// per-bucket assignment.
///
/// `Auto` is resolved exactly as in [`run_job`], so call this inside the
/// runtime the job would run on.
pub fn plan_job(config: &Config) -> anyhow::Result<JobPlan> {
    config.validate()?;

    let recordings = io::read_recordings(&config.input.recordings)?;
    let catalog = io::read_catalog(&config.input.catalog)?;
    let synthetics = config
        .input
        .synthetics
        .as_ref()
        .map(|path| io::read_recordings(path))
        .transpose()?;

    let processing = &config.processing;
    let strategy = resolve_strategy(processing.strategy, processing.workers);
    let chunk_count = match strategy {
        Strategy::Collective => processing.workers,
        Strategy::Pool | Strategy::Auto => PoolOptions::new(processing.workers)
            .with_chunks_per_worker(processing.chunks_per_worker)
            .chunk_count(),
    };

    let partitions = partition(&recordings, &catalog, chunk_count, synthetics.as_ref())?;
    let dropped = partitions.dropped();
    let buckets = partitions
        .into_iter()
        .map(|p| BucketPlan {
            index: p.index,
            recordings: p.recordings.len(),
            synthetics: p.synthetics.as_ref().map(RecordingSet::len),
            stations: p.stations,
        })
        .collect();

    Ok(JobPlan {
        strategy,
        buckets,
        dropped,
    })
}

/// Build a Tokio runtime with the specified configuration.
pub fn build_runtime(worker_threads: Option<usize>) -> anyhow::Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();

    if let Some(threads) = worker_threads {
        builder.worker_threads(threads);
    }

    builder.enable_all();

    Ok(builder.build()?)
}

/// Initialize the Rayon thread pool.
pub fn init_rayon(threads: Option<usize>) -> anyhow::Result<()> {
    if let Some(threads) = threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()?;
    }
    Ok(())
}
