//! Hierarchical station metadata: network → station → channel.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::ops::AddAssign;

/// Instrument response summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Overall sensitivity (counts per input unit)
    pub sensitivity: f64,

    /// Frequency at which the sensitivity is valid (Hz)
    pub frequency: f64,

    /// Input units, e.g. "M/S"
    #[serde(default)]
    pub input_units: String,
}

/// A single recording channel of a station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub code: String,

    #[serde(default)]
    pub location: String,

    #[serde(default)]
    pub latitude: f64,

    #[serde(default)]
    pub longitude: f64,

    /// Elevation in meters
    #[serde(default)]
    pub elevation: f64,

    /// Burial depth in meters
    #[serde(default)]
    pub depth: f64,

    /// Degrees clockwise from north
    #[serde(default)]
    pub azimuth: f64,

    /// Degrees down from horizontal
    #[serde(default)]
    pub dip: f64,

    #[serde(default)]
    pub sample_rate: f64,

    #[serde(default)]
    pub response: Option<Response>,
}

/// A station and its channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub code: String,

    #[serde(default)]
    pub site_name: Option<String>,

    #[serde(default)]
    pub latitude: f64,

    #[serde(default)]
    pub longitude: f64,

    #[serde(default)]
    pub elevation: f64,

    #[serde(default)]
    pub channels: Vec<Channel>,
}

/// A network and its stations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    pub code: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub stations: Vec<Station>,
}

/// Station metadata catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub networks: Vec<Network>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_networks(networks: Vec<Network>) -> Self {
        Self { networks }
    }

    /// Distinct `NET.STA` identifiers in catalog order.
    ///
    /// Codes are joined verbatim; parsing them back into a
    /// [`StationId`](super::StationId) is where malformed codes are caught.
    pub fn station_ids(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        for network in &self.networks {
            for station in &network.stations {
                let id = format!("{}.{}", network.code, station.code);
                if seen.insert(id.clone()) {
                    ids.push(id);
                }
            }
        }
        ids
    }

    /// Sub-catalog holding only `network.station`.
    pub fn select(&self, network: &str, station: &str) -> Catalog {
        let networks = self
            .networks
            .iter()
            .filter(|n| n.code == network)
            .filter_map(|n| {
                let stations: Vec<Station> = n
                    .stations
                    .iter()
                    .filter(|s| s.code == station)
                    .cloned()
                    .collect();
                if stations.is_empty() {
                    None
                } else {
                    Some(Network {
                        code: n.code.clone(),
                        description: n.description.clone(),
                        stations,
                    })
                }
            })
            .collect();

        Catalog { networks }
    }

    /// Union with `other`. Stations of networks sharing a code are appended
    /// to the existing network entry.
    pub fn append(&mut self, other: Catalog) {
        for network in other.networks {
            match self.networks.iter_mut().find(|n| n.code == network.code) {
                Some(existing) => existing.stations.extend(network.stations),
                None => self.networks.push(network),
            }
        }
    }

    pub fn contains_station(&self, network: &str, station: &str) -> bool {
        self.networks
            .iter()
            .filter(|n| n.code == network)
            .any(|n| n.stations.iter().any(|s| s.code == station))
    }

    pub fn network_count(&self) -> usize {
        self.networks.len()
    }

    pub fn station_count(&self) -> usize {
        self.networks.iter().map(|n| n.stations.len()).sum()
    }

    pub fn channel_count(&self) -> usize {
        self.networks
            .iter()
            .flat_map(|n| &n.stations)
            .map(|s| s.channels.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.station_count() == 0
    }
}

impl AddAssign for Catalog {
    fn add_assign(&mut self, rhs: Catalog) {
        self.append(rhs);
    }
}

impl fmt::Display for Catalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Catalog: {} network(s), {} station(s), {} channel(s)",
            self.network_count(),
            self.station_count(),
            self.channel_count()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn station(code: &str, channels: &[&str]) -> Station {
        Station {
            code: code.to_string(),
            site_name: None,
            latitude: 0.0,
            longitude: 0.0,
            elevation: 0.0,
            channels: channels
                .iter()
                .map(|c| Channel {
                    code: c.to_string(),
                    location: "00".to_string(),
                    latitude: 0.0,
                    longitude: 0.0,
                    elevation: 0.0,
                    depth: 0.0,
                    azimuth: 0.0,
                    dip: 0.0,
                    sample_rate: 1.0,
                    response: None,
                })
                .collect(),
        }
    }

    fn catalog() -> Catalog {
        Catalog::from_networks(vec![
            Network {
                code: "IU".to_string(),
                description: Some("GSN".to_string()),
                stations: vec![
                    station("ANMO", &["BHZ", "BHN", "BHE"]),
                    station("HRV", &["BHZ"]),
                ],
            },
            Network {
                code: "II".to_string(),
                description: None,
                stations: vec![station("BFO", &["BHZ"])],
            },
        ])
    }

    #[test]
    fn test_station_ids_in_order() {
        assert_eq!(catalog().station_ids(), vec!["IU.ANMO", "IU.HRV", "II.BFO"]);
    }

    #[test]
    fn test_station_ids_are_distinct() {
        let mut cat = catalog();
        cat.networks[0].stations.push(station("ANMO", &["LHZ"]));
        assert_eq!(cat.station_ids().len(), 3);
    }

    #[test]
    fn test_select() {
        let sub = catalog().select("IU", "ANMO");
        assert_eq!(sub.network_count(), 1);
        assert_eq!(sub.station_count(), 1);
        assert_eq!(sub.channel_count(), 3);
        assert_eq!(sub.networks[0].description.as_deref(), Some("GSN"));

        assert!(catalog().select("IU", "BFO").is_empty());
    }

    #[test]
    fn test_append_merges_networks() {
        let cat = catalog();
        let mut merged = cat.select("IU", "ANMO");
        merged += cat.select("IU", "HRV");
        merged += cat.select("II", "BFO");

        assert_eq!(merged.network_count(), 2);
        assert_eq!(merged.station_count(), 3);
        assert!(merged.contains_station("IU", "HRV"));
        assert!(!merged.contains_station("II", "HRV"));
    }
}
