//! Exact-match cache stage of the cascade.

use crate::cascade::prediction::{PredictionResult, PredictionSource};
use crate::history::move_record::HistoryTable;

/// Most frequent recorded continuation of exactly `partial_sequence`.
///
/// `None` is a miss, the normal signal to try the next strategy. The empty
/// string is a valid key and matches the records of a game's first move.
pub fn cache_search(partial_sequence: &str, table: &HistoryTable) -> Option<PredictionResult> {
    table
        .most_frequent_target(partial_sequence)
        .map(|target| PredictionResult::new(target, PredictionSource::Cache))
}
