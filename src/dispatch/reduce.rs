//! Recombining transformed partitions.

use crate::model::RecordingSet;

/// Concatenate `chunks` in list order.
///
/// Empty chunks contribute nothing. Nothing is deduplicated or sorted, so the
/// output order is the concatenation order, not the pre-partition order.
pub fn merge(chunks: Vec<RecordingSet>) -> RecordingSet {
    let total = chunks.iter().map(RecordingSet::len).sum();
    let mut merged = Vec::with_capacity(total);
    for chunk in chunks {
        merged.extend(chunk);
    }
    RecordingSet::from(merged)
}
