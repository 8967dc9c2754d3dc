//! Station identifiers used as the partitioning key.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A `NETWORK.STATION` key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StationId {
    pub network: String,
    pub station: String,
}

impl StationId {
    /// Create a station identifier from its two codes.
    pub fn new(network: impl Into<String>, station: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            station: station.into(),
        }
    }
}

impl FromStr for StationId {
    type Err = Error;

    /// Parse `NETWORK.STATION`. Exactly two non-empty components are required.
    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split('.');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(network), Some(station), None) if !network.is_empty() && !station.is_empty() => {
                Ok(Self::new(network, station))
            }
            _ => Err(Error::MalformedStationId(s.to_string())),
        }
    }
}

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.network, self.station)
    }
}
