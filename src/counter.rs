use crate::error::Result;
use crate::record::CountEntry;
use crate::stage::Stage;

/// Counts occurrences of each distinct line. Lines are keys as-is: no
/// trimming, no case folding, and the empty line is a line like any other.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineCounter;

impl Stage for LineCounter {
    type Input = String;
    type Key = String;
    type Value = u64;
    type Output = CountEntry;

    fn name(&self) -> &str {
        "line_counter"
    }

    fn map(&self, input: &String) -> Result<Vec<(String, u64)>> {
        Ok(vec![(input.clone(), 1)])
    }

    fn reduce(&self, key: String, values: Vec<u64>) -> Result<Vec<CountEntry>> {
        Ok(vec![CountEntry::new(key, values.iter().sum())])
    }
}
