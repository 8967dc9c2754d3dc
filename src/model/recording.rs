//! Labeled time series and ordered recording sets.

use super::station::StationId;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::AddAssign;

/// SEED-style identity of a recording.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordingId {
    pub network: String,
    pub station: String,
    #[serde(default)]
    pub location: String,
    pub channel: String,
}

impl RecordingId {
    pub fn new(
        network: impl Into<String>,
        station: impl Into<String>,
        location: impl Into<String>,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            network: network.into(),
            station: station.into(),
            location: location.into(),
            channel: channel.into(),
        }
    }

    /// The station this recording belongs to.
    pub fn station_id(&self) -> StationId {
        StationId::new(self.network.clone(), self.station.clone())
    }
}

impl fmt::Display for RecordingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.network, self.station, self.location, self.channel
        )
    }
}

/// Timing metadata for a recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceStats {
    /// Time of the first sample
    pub starttime: DateTime<Utc>,

    /// Samples per second
    pub sampling_rate: f64,
}

/// A single labeled time series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    pub id: RecordingId,
    pub stats: TraceStats,
    #[serde(default)]
    pub data: Vec<f64>,
}

impl Recording {
    pub fn new(id: RecordingId, stats: TraceStats, data: Vec<f64>) -> Self {
        Self { id, stats, data }
    }

    /// Number of samples.
    pub fn npts(&self) -> usize {
        self.data.len()
    }

    /// Time of the last sample.
    pub fn endtime(&self) -> DateTime<Utc> {
        if self.data.len() < 2 || self.stats.sampling_rate <= 0.0 {
            return self.stats.starttime;
        }
        let span_secs = (self.data.len() - 1) as f64 / self.stats.sampling_rate;
        self.stats.starttime + Duration::microseconds((span_secs * 1e6).round() as i64)
    }
}

/// Label filter; `None` fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    pub network: Option<String>,
    pub station: Option<String>,
    pub location: Option<String>,
    pub channel: Option<String>,
}

impl Selector {
    /// Match every recording of one station.
    pub fn station(network: impl Into<String>, station: impl Into<String>) -> Self {
        Self {
            network: Some(network.into()),
            station: Some(station.into()),
            ..Default::default()
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    /// Whether `id` passes the filter. Codes compare exactly.
    pub fn matches(&self, id: &RecordingId) -> bool {
        fn field(want: &Option<String>, have: &str) -> bool {
            want.as_deref().map_or(true, |w| w == have)
        }
        field(&self.network, &id.network)
            && field(&self.station, &id.station)
            && field(&self.location, &id.location)
            && field(&self.channel, &id.channel)
    }
}

/// Ordered collection of recordings. Concatenation never deduplicates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordingSet {
    recordings: Vec<Recording>,
}

impl RecordingSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.recordings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recordings.is_empty()
    }

    pub fn push(&mut self, recording: Recording) {
        self.recordings.push(recording);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Recording> {
        self.recordings.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Recording> {
        self.recordings.iter_mut()
    }

    pub fn as_slice(&self) -> &[Recording] {
        &self.recordings
    }

    /// Copy out every recording matching `selector`, preserving order.
    pub fn select(&self, selector: &Selector) -> RecordingSet {
        self.recordings
            .iter()
            .filter(|r| selector.matches(&r.id))
            .cloned()
            .collect()
    }

    /// Copy out every recording of one station.
    pub fn select_station(&self, station: &StationId) -> RecordingSet {
        self.select(&Selector::station(
            station.network.clone(),
            station.station.clone(),
        ))
    }

    /// Append all recordings of `other`.
    pub fn append(&mut self, other: RecordingSet) {
        self.recordings.extend(other.recordings);
    }

    /// Distinct stations in first-seen order.
    pub fn stations(&self) -> Vec<StationId> {
        let mut seen = std::collections::HashSet::new();
        self.recordings
            .iter()
            .map(|r| r.id.station_id())
            .filter(|id| seen.insert(id.clone()))
            .collect()
    }

    /// Scale every sample by `factor`.
    pub fn multiply(&mut self, factor: f64) {
        for recording in &mut self.recordings {
            for sample in &mut recording.data {
                *sample *= factor;
            }
        }
    }

    /// Total samples across all recordings.
    pub fn total_samples(&self) -> usize {
        self.recordings.iter().map(Recording::npts).sum()
    }
}

impl AddAssign for RecordingSet {
    fn add_assign(&mut self, rhs: RecordingSet) {
        self.append(rhs);
    }
}

impl FromIterator<Recording> for RecordingSet {
    fn from_iter<I: IntoIterator<Item = Recording>>(iter: I) -> Self {
        Self {
            recordings: iter.into_iter().collect(),
        }
    }
}

impl Extend<Recording> for RecordingSet {
    fn extend<I: IntoIterator<Item = Recording>>(&mut self, iter: I) {
        self.recordings.extend(iter);
    }
}

impl IntoIterator for RecordingSet {
    type Item = Recording;
    type IntoIter = std::vec::IntoIter<Recording>;

    fn into_iter(self) -> Self::IntoIter {
        self.recordings.into_iter()
    }
}

impl<'a> IntoIterator for &'a RecordingSet {
    type Item = &'a Recording;
    type IntoIter = std::slice::Iter<'a, Recording>;

    fn into_iter(self) -> Self::IntoIter {
        self.recordings.iter()
    }
}

impl From<Vec<Recording>> for RecordingSet {
    fn from(recordings: Vec<Recording>) -> Self {
        Self { recordings }
    }
}

impl fmt::Display for RecordingSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} recording(s)", self.len())?;
        for recording in &self.recordings {
            write!(
                f,
                "\n{} | {} | {} Hz, {} samples",
                recording.id,
                recording.stats.starttime.to_rfc3339(),
                recording.stats.sampling_rate,
                recording.npts()
            )?;
        }
        Ok(())
    }
}
