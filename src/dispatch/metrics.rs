//! Dispatch counters and phase timing.

use serde::{Serialize, Serializer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::interval;

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Metrics for a dispatch run.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Partitions handed to workers or ranks
    pub partitions_dispatched: AtomicU64,

    /// Partitions whose transform succeeded
    pub partitions_completed: AtomicU64,

    /// Partitions whose transform failed
    pub partitions_failed: AtomicU64,

    /// Recordings assigned to partitions
    pub recordings_in: AtomicU64,

    /// Recordings in the merged output
    pub recordings_out: AtomicU64,

    /// Recordings left out because their station is not in the catalog
    pub recordings_dropped: AtomicU64,

    /// Start time
    start_time: Option<Instant>,

    /// Time spent partitioning (microseconds)
    pub partition_us: AtomicU64,

    /// Time spent inside transforms, summed across workers (microseconds)
    pub transform_us: AtomicU64,

    /// Time spent merging (microseconds)
    pub merge_us: AtomicU64,
}

impl Metrics {
    /// Create new metrics.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        })
    }

    pub fn add_partitions_dispatched(&self, count: u64) {
        self.partitions_dispatched.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_partition_completed(&self) {
        self.partitions_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_partition_failed(&self) {
        self.partitions_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_recordings_in(&self, count: u64) {
        self.recordings_in.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_recordings_out(&self, count: u64) {
        self.recordings_out.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_recordings_dropped(&self, count: u64) {
        self.recordings_dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_partition_time(&self, duration: Duration) {
        self.partition_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn add_transform_time(&self, duration: Duration) {
        self.transform_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn add_merge_time(&self, duration: Duration) {
        self.merge_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Get elapsed time since start.
    pub fn elapsed(&self) -> Duration {
        self.start_time.map_or(Duration::ZERO, |t| t.elapsed())
    }

    /// Completed partitions per second.
    pub fn partitions_per_second(&self) -> f64 {
        let done = self.partitions_completed.load(Ordering::Relaxed);
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            done as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            partitions_dispatched: self.partitions_dispatched.load(Ordering::Relaxed),
            partitions_completed: self.partitions_completed.load(Ordering::Relaxed),
            partitions_failed: self.partitions_failed.load(Ordering::Relaxed),
            recordings_in: self.recordings_in.load(Ordering::Relaxed),
            recordings_out: self.recordings_out.load(Ordering::Relaxed),
            recordings_dropped: self.recordings_dropped.load(Ordering::Relaxed),
            elapsed: self.elapsed(),
            partitions_per_second: self.partitions_per_second(),
            partition_secs: self.partition_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            transform_secs: self.transform_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            merge_secs: self.merge_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub partitions_dispatched: u64,
    pub partitions_completed: u64,
    pub partitions_failed: u64,
    pub recordings_in: u64,
    pub recordings_out: u64,
    pub recordings_dropped: u64,
    #[serde(serialize_with = "serialize_duration")]
    pub elapsed: Duration,
    pub partitions_per_second: f64,
    pub partition_secs: f64,
    /// Summed across workers, so may exceed wall time
    pub transform_secs: f64,
    pub merge_secs: f64,
}

impl MetricsSnapshot {
    /// Save metrics to a JSON file.
    pub fn save_to_file(&self, path: &str) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!("Metrics saved to {}", path);
        Ok(())
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Partitions: {}/{} done, {} failed | Recordings: {} in, {} out, {} dropped | \
             Rate: {:.1} partitions/s | Elapsed: {:.1}s | \
             Time: partition {:.2}s, transform {:.2}s, merge {:.2}s",
            self.partitions_completed,
            self.partitions_dispatched,
            self.partitions_failed,
            self.recordings_in,
            self.recordings_out,
            self.recordings_dropped,
            self.partitions_per_second,
            self.elapsed.as_secs_f64(),
            self.partition_secs,
            self.transform_secs,
            self.merge_secs,
        )
    }
}

/// Periodic metrics reporter.
pub struct MetricsReporter {
    metrics: Arc<Metrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<Metrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs: interval_secs.max(1),
        }
    }

    /// Log progress every interval until `shutdown` fires.
    pub async fn run(self, mut shutdown: mpsc::Receiver<()>) {
        let mut ticker = interval(Duration::from_secs(self.interval_secs));
        // First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let snapshot = self.metrics.snapshot();
                    let progress = if snapshot.partitions_dispatched > 0 {
                        (snapshot.partitions_completed + snapshot.partitions_failed) as f64
                            / snapshot.partitions_dispatched as f64
                            * 100.0
                    } else {
                        0.0
                    };
                    tracing::info!("[{:.1}%] {}", progress, snapshot);
                }
                _ = shutdown.recv() => {
                    tracing::debug!("Final: {}", self.metrics.snapshot());
                    break;
                }
            }
        }
    }

    /// Print a final summary.
    pub fn print_summary(&self) {
        let snapshot = self.metrics.snapshot();

        println!("\n=== Dispatch Summary ===");
        println!("Total time: {:.1}s", snapshot.elapsed.as_secs_f64());
        println!("Partitions dispatched: {}", snapshot.partitions_dispatched);
        println!("Partitions completed: {}", snapshot.partitions_completed);
        println!("Partitions failed: {}", snapshot.partitions_failed);
        println!("Recordings in: {}", snapshot.recordings_in);
        println!("Recordings out: {}", snapshot.recordings_out);
        if snapshot.recordings_dropped > 0 {
            println!(
                "Recordings dropped (station not in catalog): {}",
                snapshot.recordings_dropped
            );
        }

        let total = snapshot.partition_secs + snapshot.transform_secs + snapshot.merge_secs;
        if total > 0.0 {
            println!("\n--- Phase Time Breakdown ---");
            println!("Partition: {:>7.2}s ({:>5.1}%)", snapshot.partition_secs, snapshot.partition_secs / total * 100.0);
            println!("Transform: {:>7.2}s ({:>5.1}%)", snapshot.transform_secs, snapshot.transform_secs / total * 100.0);
            println!("Merge:     {:>7.2}s ({:>5.1}%)", snapshot.merge_secs, snapshot.merge_secs / total * 100.0);
        }
        println!("========================\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_increment() {
        let metrics = Metrics::new();

        metrics.add_recordings_in(10);
        metrics.add_recordings_in(5);
        metrics.add_partition_completed();
        metrics.add_partition_failed();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.recordings_in, 15);
        assert_eq!(snapshot.partitions_completed, 1);
        assert_eq!(snapshot.partitions_failed, 1);
    }

    #[test]
    fn test_timing_metrics() {
        let metrics = Metrics::new();

        metrics.add_partition_time(Duration::from_millis(100));
        metrics.add_transform_time(Duration::from_millis(50));
        metrics.add_transform_time(Duration::from_millis(50));
        metrics.add_merge_time(Duration::from_millis(25));

        let snapshot = metrics.snapshot();
        assert!((snapshot.partition_secs - 0.1).abs() < 0.001);
        assert!((snapshot.transform_secs - 0.1).abs() < 0.001);
        assert!((snapshot.merge_secs - 0.025).abs() < 0.001);
    }

    #[test]
    fn test_snapshot_display() {
        let metrics = Metrics::new();
        metrics.add_partitions_dispatched(4);
        metrics.add_partition_completed();
        metrics.add_partition_completed();
        metrics.add_recordings_dropped(3);

        let display = format!("{}", metrics.snapshot());
        assert!(display.contains("2/4 done"));
        assert!(display.contains("3 dropped"));
    }

    #[test]
    fn test_zero_elapsed_no_panic() {
        let metrics = Metrics {
            start_time: None,
            ..Default::default()
        };
        metrics.add_partition_completed();
        assert_eq!(metrics.partitions_per_second(), 0.0);
    }

    #[test]
    fn test_snapshot_serializes() {
        let snapshot = Metrics::new().snapshot();
        let json = serde_json::to_value(&snapshot).unwrap();
        assert!(json["elapsed"].is_f64());
        assert_eq!(json["partitions_failed"], 0);
    }

    #[tokio::test]
    async fn test_reporter_stops_on_shutdown() {
        let reporter = MetricsReporter::new(Metrics::new(), 60);
        let (tx, rx) = mpsc::channel(1);
        let handle = tokio::spawn(reporter.run(rx));
        tx.send(()).await.unwrap();
        handle.await.unwrap();
    }
}
