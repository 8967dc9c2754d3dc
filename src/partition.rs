//! Station-aligned partitioning of recordings and metadata.
//!
//! Stations are dealt round-robin into buckets: bucket `i` receives the
//! catalog stations at positions `i, i + n, i + 2n, ...`. Striding spreads
//! densely recorded stations across buckets regardless of catalog order.
//! Every recording of a station lands in the same bucket, so partitions are
//! disjoint and each worker can operate on whole stations.

use crate::error::{Error, Result};
use crate::model::{Catalog, RecordingSet, StationId};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One station group's share of the work.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Partition {
    /// Bucket index, also the rank/worker it is destined for
    pub index: usize,

    /// Stations assigned to this bucket
    pub stations: Vec<StationId>,

    /// Recordings of the assigned stations
    pub recordings: RecordingSet,

    /// Metadata of the assigned stations
    pub catalog: Catalog,

    /// Matching synthetics, when synthetics were supplied
    #[serde(default)]
    pub synthetics: Option<RecordingSet>,
}

impl Partition {
    pub fn is_empty(&self) -> bool {
        self.recordings.is_empty()
    }
}

/// Result of [`partition`]: one [`Partition`] per bucket, in bucket order.
#[derive(Debug, Clone, Default)]
pub struct Partitions {
    partitions: Vec<Partition>,
    dropped: usize,
}

impl Partitions {
    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Partition> {
        self.partitions.iter()
    }

    /// Input recordings whose station is missing from the catalog.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Recordings assigned across all partitions.
    pub fn recording_count(&self) -> usize {
        self.partitions.iter().map(|p| p.recordings.len()).sum()
    }

    pub fn into_inner(self) -> Vec<Partition> {
        self.partitions
    }

    /// Split into parallel lists of recordings, catalogs and (if supplied)
    /// synthetics.
    pub fn into_parts(self) -> (Vec<RecordingSet>, Vec<Catalog>, Option<Vec<RecordingSet>>) {
        let has_synthetics = self.partitions.iter().any(|p| p.synthetics.is_some());

        let mut recordings = Vec::with_capacity(self.partitions.len());
        let mut catalogs = Vec::with_capacity(self.partitions.len());
        let mut synthetics = has_synthetics.then(|| Vec::with_capacity(self.partitions.len()));

        for p in self.partitions {
            recordings.push(p.recordings);
            catalogs.push(p.catalog);
            if let Some(list) = synthetics.as_mut() {
                list.push(p.synthetics.unwrap_or_default());
            }
        }

        (recordings, catalogs, synthetics)
    }
}

impl IntoIterator for Partitions {
    type Item = Partition;
    type IntoIter = std::vec::IntoIter<Partition>;

    fn into_iter(self) -> Self::IntoIter {
        self.partitions.into_iter()
    }
}

/// Deal `items` into `count` strided buckets. Order inside a bucket follows
/// the input order.
pub fn split<T: Clone>(items: &[T], count: usize) -> Vec<Vec<T>> {
    (0..count)
        .map(|i| items.iter().skip(i).step_by(count.max(1)).cloned().collect())
        .collect()
}

/// Station assignment per bucket, without touching any recordings.
pub fn plan(catalog: &Catalog, worker_count: usize) -> Result<Vec<Vec<StationId>>> {
    if worker_count == 0 {
        return Err(Error::InvalidWorkerCount(worker_count));
    }

    let stations = catalog
        .station_ids()
        .iter()
        .map(|id| id.parse::<StationId>())
        .collect::<Result<Vec<_>>>()?;

    Ok(split(&stations, worker_count))
}

/// Partition `recordings` and `catalog` into `worker_count` station-aligned
/// chunks.
///
/// Recordings whose station is not in the catalog are left out of every
/// partition and counted in [`Partitions::dropped`]. Buckets that receive no
/// stations, or stations without recordings, come back as empty partitions.
pub fn partition(
    recordings: &RecordingSet,
    catalog: &Catalog,
    worker_count: usize,
    synthetics: Option<&RecordingSet>,
) -> Result<Partitions> {
    let buckets = plan(catalog, worker_count)?;

    let observed = StationIndex::build(recordings);
    let synthetic = synthetics.map(StationIndex::build);

    let partitions: Vec<Partition> = buckets
        .into_par_iter()
        .enumerate()
        .map(|(index, stations)| {
            let mut sub_catalog = Catalog::new();
            let mut sub_recordings = RecordingSet::new();
            let mut sub_synthetics = synthetics.map(|_| RecordingSet::new());

            for station in &stations {
                sub_catalog += catalog.select(&station.network, &station.station);
                sub_recordings += observed.select(recordings, station);

                if let (Some(all), Some(idx), Some(out)) =
                    (synthetics, synthetic.as_ref(), sub_synthetics.as_mut())
                {
                    *out += idx.select(all, station);
                }
            }

            Partition {
                index,
                stations,
                recordings: sub_recordings,
                catalog: sub_catalog,
                synthetics: sub_synthetics,
            }
        })
        .collect();

    let assigned: usize = partitions.iter().map(|p| p.recordings.len()).sum();
    let dropped = recordings.len() - assigned;

    if dropped > 0 {
        tracing::warn!(
            "{} of {} recordings belong to stations missing from the catalog and were not partitioned",
            dropped,
            recordings.len()
        );
    }

    tracing::debug!(
        "Partitioned {} recordings from {} stations into {} chunks",
        assigned,
        catalog.station_ids().len(),
        partitions.len()
    );

    Ok(Partitions {
        partitions,
        dropped,
    })
}

/// Positions of each station's recordings, in input order.
struct StationIndex {
    positions: HashMap<StationId, Vec<usize>>,
}

impl StationIndex {
    fn build(recordings: &RecordingSet) -> Self {
        let mut positions: HashMap<StationId, Vec<usize>> = HashMap::new();
        for (i, recording) in recordings.iter().enumerate() {
            positions.entry(recording.id.station_id()).or_default().push(i);
        }
        Self { positions }
    }

    fn select(&self, recordings: &RecordingSet, station: &StationId) -> RecordingSet {
        let all = recordings.as_slice();
        self.positions
            .get(station)
            .map(|idx| idx.iter().map(|&i| all[i].clone()).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::{Channel, Network, Recording, RecordingId, Station, TraceStats};
    use chrono::{TimeZone, Utc};
    use std::collections::HashSet;

    pub(crate) fn recording(network: &str, station: &str, channel: &str) -> Recording {
        Recording::new(
            RecordingId::new(network, station, "00", channel),
            TraceStats {
                starttime: Utc.with_ymd_and_hms(2008, 11, 24, 9, 2, 58).unwrap(),
                sampling_rate: 1.0,
            },
            vec![1.0, -2.0, 3.0, 0.5],
        )
    }

    pub(crate) fn catalog(stations: &[(&str, &str)]) -> Catalog {
        let mut cat = Catalog::new();
        for (net, sta) in stations {
            cat += Catalog::from_networks(vec![Network {
                code: net.to_string(),
                description: None,
                stations: vec![Station {
                    code: sta.to_string(),
                    site_name: None,
                    latitude: 0.0,
                    longitude: 0.0,
                    elevation: 0.0,
                    channels: vec![Channel {
                        code: "BHZ".to_string(),
                        location: "00".to_string(),
                        latitude: 0.0,
                        longitude: 0.0,
                        elevation: 0.0,
                        depth: 0.0,
                        azimuth: 0.0,
                        dip: -90.0,
                        sample_rate: 1.0,
                        response: None,
                    }],
                }],
            }]);
        }
        cat
    }

    /// Five stations, twelve recordings: S1 and S4 have none, the rest
    /// have three or more.
    pub(crate) fn scenario() -> (RecordingSet, Catalog) {
        let cat = catalog(&[
            ("XX", "S0"),
            ("XX", "S1"),
            ("XX", "S2"),
            ("YY", "S3"),
            ("YY", "S4"),
        ]);

        let mut set = RecordingSet::new();
        for cha in ["BHZ", "BHN", "BHE"] {
            set.push(recording("XX", "S0", cha));
            set.push(recording("XX", "S2", cha));
            set.push(recording("YY", "S3", cha));
        }
        for cha in ["HHZ", "HHN", "HHE"] {
            set.push(recording("YY", "S3", cha));
        }
        (set, cat)
    }

    pub(crate) fn sorted_ids(set: &RecordingSet) -> Vec<RecordingId> {
        let mut ids: Vec<_> = set.iter().map(|r| r.id.clone()).collect();
        ids.sort();
        ids
    }

    #[test]
    fn test_split_is_strided() {
        let items: Vec<usize> = (0..7).collect();
        let buckets = split(&items, 3);
        assert_eq!(buckets, vec![vec![0, 3, 6], vec![1, 4], vec![2, 5]]);
    }

    #[test]
    fn test_split_more_buckets_than_items() {
        let buckets = split(&[1, 2], 4);
        assert_eq!(buckets.len(), 4);
        assert!(buckets[2].is_empty());
        assert!(buckets[3].is_empty());
    }

    #[test]
    fn test_scenario_round_robin() {
        let (set, cat) = scenario();
        assert_eq!(set.len(), 12);

        let parts = partition(&set, &cat, 3, None).unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts.recording_count(), 12);
        assert_eq!(parts.dropped(), 0);

        let names: Vec<Vec<String>> = parts
            .iter()
            .map(|p| p.stations.iter().map(|s| s.station.clone()).collect())
            .collect();
        assert_eq!(
            names,
            vec![
                vec!["S0".to_string(), "S3".to_string()],
                vec!["S1".to_string(), "S4".to_string()],
                vec!["S2".to_string()],
            ]
        );

        // S1 and S4 have no recordings
        assert!(parts.iter().nth(1).unwrap().is_empty());
        assert_eq!(parts.iter().next().unwrap().recordings.len(), 9);
        assert_eq!(parts.iter().nth(2).unwrap().recordings.len(), 3);
    }

    #[test]
    fn test_partitions_are_disjoint_and_complete() {
        let (set, cat) = scenario();

        for n in [1, 2, 3, 5, 8] {
            let parts = partition(&set, &cat, n, None).unwrap();
            assert_eq!(parts.len(), n);

            let mut seen_stations = HashSet::new();
            for p in parts.iter() {
                for station in p.recordings.stations() {
                    assert!(seen_stations.insert(station), "station in two partitions");
                }
            }

            let mut merged = RecordingSet::new();
            for p in parts {
                merged += p.recordings;
            }
            assert_eq!(sorted_ids(&merged), sorted_ids(&set));
        }
    }

    #[test]
    fn test_sub_catalog_matches_stations() {
        let (set, cat) = scenario();
        let parts = partition(&set, &cat, 2, None).unwrap();

        for p in parts.iter() {
            assert_eq!(p.catalog.station_count(), p.stations.len());
            for s in &p.stations {
                assert!(p.catalog.contains_station(&s.network, &s.station));
            }
        }
    }

    #[test]
    fn test_excess_workers_yield_trailing_empty_partitions() {
        let (set, cat) = scenario();
        let parts = partition(&set, &cat, 8, None).unwrap();

        assert_eq!(parts.len(), 8);
        for p in parts.iter().skip(5) {
            assert!(p.stations.is_empty());
            assert!(p.recordings.is_empty());
            assert!(p.catalog.is_empty());
        }
        assert_eq!(parts.recording_count(), 12);
    }

    #[test]
    fn test_unknown_station_is_dropped() {
        let (mut set, cat) = scenario();
        set.push(recording("ZZ", "GONE", "BHZ"));

        let parts = partition(&set, &cat, 2, None).unwrap();
        assert_eq!(parts.recording_count(), 12);
        assert_eq!(parts.dropped(), 1);
    }

    #[test]
    fn test_malformed_station_code_is_an_error() {
        let (set, _) = scenario();
        let cat = catalog(&[("XX", "S0"), ("XX", "BAD.CODE")]);

        let err = partition(&set, &cat, 2, None).unwrap_err();
        assert!(matches!(err, Error::MalformedStationId(ref id) if id == "XX.BAD.CODE"));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let (set, cat) = scenario();
        assert!(matches!(
            partition(&set, &cat, 0, None),
            Err(Error::InvalidWorkerCount(0))
        ));
    }

    #[test]
    fn test_synthetics_follow_stations() {
        let (set, cat) = scenario();
        let synt: RecordingSet = vec![
            recording("XX", "S0", "MXZ"),
            recording("XX", "S2", "MXZ"),
            recording("YY", "S4", "MXZ"),
        ]
        .into();

        let parts = partition(&set, &cat, 3, Some(&synt)).unwrap();
        let (obsd, catalogs, synthetics) = parts.into_parts();
        let synthetics = synthetics.unwrap();

        assert_eq!(obsd.len(), 3);
        assert_eq!(catalogs.len(), 3);
        assert_eq!(synthetics[0].len(), 1);
        assert_eq!(synthetics[1].len(), 1);
        assert_eq!(synthetics[2].len(), 1);
        assert_eq!(synthetics[1].as_slice()[0].id.station, "S4");
    }

    #[test]
    fn test_into_parts_without_synthetics() {
        let (set, cat) = scenario();
        let (_, _, synthetics) = partition(&set, &cat, 2, None).unwrap().into_parts();
        assert!(synthetics.is_none());
    }
}
