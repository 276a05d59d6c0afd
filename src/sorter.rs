//! Orders aggregated patterns by frequency, highest first.
//!
//! The sort runs as a map/reduce stage: [`to_sortable`] moves the frequency
//! into the key, the shuffle groups and orders keys, and [`from_sortable`]
//! restores the `(pattern, frequency)` shape. The descending direction lives
//! in the key type itself, so it holds for any executor that orders keys by
//! `Ord`.

use crate::error::Result;
use crate::record::{MatchEntry, SortedEntry};
use crate::stage::Stage;
use std::cmp::Ordering;

/// Frequency key whose `Ord` is the reverse of the numeric order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescendingFrequency(pub u64);

impl Ord for DescendingFrequency {
    fn cmp(&self, other: &Self) -> Ordering {
        descending(self.0, other.0)
    }
}

impl PartialOrd for DescendingFrequency {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Compare two frequencies as numbers, largest first
pub fn descending(a: u64, b: u64) -> Ordering {
    b.cmp(&a)
}

pub fn to_sortable(entry: &MatchEntry) -> (DescendingFrequency, String) {
    (DescendingFrequency(entry.frequency), entry.pattern.clone())
}

pub fn from_sortable(key: DescendingFrequency, pattern: String) -> SortedEntry {
    SortedEntry::new(pattern, key.0)
}

/// Emits every match entry, non-increasing in frequency. Patterns sharing a
/// frequency stay adjacent; their order among themselves is not specified.
#[derive(Debug, Clone, Copy, Default)]
pub struct DescendingSorter;

impl Stage for DescendingSorter {
    type Input = MatchEntry;
    type Key = DescendingFrequency;
    type Value = String;
    type Output = SortedEntry;

    fn name(&self) -> &str {
        "descending_sorter"
    }

    fn map(&self, input: &MatchEntry) -> Result<Vec<(DescendingFrequency, String)>> {
        Ok(vec![to_sortable(input)])
    }

    fn reduce(&self, key: DescendingFrequency, values: Vec<String>) -> Result<Vec<SortedEntry>> {
        Ok(values
            .into_iter()
            .map(|pattern| from_sortable(key, pattern))
            .collect())
    }

    // A total order across all keys needs a single partition
    fn max_reduce_tasks(&self) -> Option<usize> {
        Some(1)
    }
}
