//! In-memory recordings and station metadata.

mod catalog;
mod recording;
mod station;

pub use catalog::{Catalog, Channel, Network, Response, Station};
pub use recording::{Recording, RecordingId, RecordingSet, Selector, TraceStats};
pub use station::StationId;
