//! Dispatch strategies: a fixed rank group driven by collectives, and a
//! worker pool pulling from a shared task queue.
//!
//! Both strategies partition the input by station, hand each worker its own
//! partition and config copy, run the transform, and merge the results.

/// Progress message at `info` when verbose, `debug` otherwise.
macro_rules! progress {
    ($verbose:expr, $($arg:tt)+) => {
        if $verbose {
            tracing::info!($($arg)+);
        } else {
            tracing::debug!($($arg)+);
        }
    };
}

pub mod collective;
pub mod group;
pub mod metrics;
pub mod pool;
pub mod reduce;

#[cfg(test)]
mod strategy_tests;

pub use collective::{collective_process, run_collective, CollectiveOptions, ROOT};
pub use group::{probe_collective, AbortHandle, Communicator, LocalComm, LocalGroup};
pub use metrics::{Metrics, MetricsReporter, MetricsSnapshot};
pub use pool::{pooled_process, PoolOptions, TaskOutcome};
pub use reduce::merge;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which dispatch strategy a job uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Worker pool over a shared task queue
    #[default]
    Pool,

    /// Fixed rank group, one partition per rank
    Collective,

    /// Collective when a group can be formed, else pool
    Auto,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strategy::Pool => "pool",
            Strategy::Collective => "collective",
            Strategy::Auto => "auto",
        };
        f.write_str(name)
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pool" => Ok(Strategy::Pool),
            "collective" => Ok(Strategy::Collective),
            "auto" => Ok(Strategy::Auto),
            other => Err(format!(
                "unknown strategy '{}': expected pool, collective or auto",
                other
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_parse() {
        assert_eq!("pool".parse::<Strategy>().unwrap(), Strategy::Pool);
        assert_eq!("Collective".parse::<Strategy>().unwrap(), Strategy::Collective);
        assert_eq!("auto".parse::<Strategy>().unwrap(), Strategy::Auto);
        assert!("mpi".parse::<Strategy>().is_err());
    }

    #[test]
    fn test_strategy_display_round_trips() {
        for s in [Strategy::Pool, Strategy::Collective, Strategy::Auto] {
            assert_eq!(s.to_string().parse::<Strategy>().unwrap(), s);
        }
    }

    #[test]
    fn test_strategy_serde() {
        let s: Strategy = serde_yaml::from_str("collective").unwrap();
        assert_eq!(s, Strategy::Collective);
        assert_eq!(serde_json::to_string(&Strategy::Auto).unwrap(), "\"auto\"");
    }
}
