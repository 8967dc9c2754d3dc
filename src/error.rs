//! Error types for partitioning and dispatch.

use std::fmt;
use thiserror::Error;

/// Result type for library operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the partitioner and the dispatch strategies.
#[derive(Error, Debug)]
pub enum Error {
    /// A coordinator input was absent when required
    #[error("Missing required input: {0}")]
    MissingInput(&'static str),

    /// The fixed-group collective runtime cannot be used
    #[error("Collective runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    /// Station identifier is not exactly `network.station`
    #[error("Malformed station identifier '{0}': expected 'NETWORK.STATION'")]
    MalformedStationId(String),

    /// Worker or chunk count of zero
    #[error("Invalid worker count: {0} (must be > 0)")]
    InvalidWorkerCount(usize),

    /// A collective operation was interrupted because a peer rank failed
    #[error("Group aborted at rank {rank}: {reason}")]
    GroupAborted { rank: usize, reason: String },

    /// A rank panicked while running its share of the work
    #[error("Rank {rank} panicked: {message}")]
    RankPanicked { rank: usize, message: String },

    /// Ranks issued collective operations in a different order
    #[error("Collective mismatch: expected {expected}, received {found}")]
    CollectiveMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// The external transform failed on a partition
    #[error("Transform failed on partition {partition}: {message}")]
    Transform { partition: usize, message: String },

    /// One or more pool workers reported a failure, or results went missing
    #[error(
        "{} of {} partitions failed ({} results received): {}",
        .failures.len(),
        .expected,
        .received,
        PartitionFailures(.failures)
    )]
    WorkersFailed {
        failures: Vec<PartitionFailure>,
        expected: usize,
        received: usize,
    },

    /// Payload could not cross a rank boundary
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O operation error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// A single failed partition in a pooled run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionFailure {
    /// Partition index, or `None` when the result never arrived
    pub partition: Option<usize>,

    /// Failure description reported by the worker
    pub message: String,
}

impl fmt::Display for PartitionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.partition {
            Some(idx) => write!(f, "partition {}: {}", idx, self.message),
            None => write!(f, "unknown partition: {}", self.message),
        }
    }
}

struct PartitionFailures<'a>(&'a [PartitionFailure]);

impl fmt::Display for PartitionFailures<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", failure)?;
        }
        Ok(())
    }
}

impl Error {
    /// Indices of the partitions that failed, when known.
    pub fn failed_partitions(&self) -> Vec<usize> {
        match self {
            Error::WorkersFailed { failures, .. } => {
                failures.iter().filter_map(|f| f.partition).collect()
            }
            Error::Transform { partition, .. } => vec![*partition],
            _ => Vec::new(),
        }
    }
}
