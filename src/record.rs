//! Records exchanged between stages and their tab-separated text encoding.

use crate::error::{PipelineError, Result};

/// A value that can be written to and read back from one line of a stage file
pub trait Record: Sized {
    /// Encode as a single line, without the trailing newline
    fn encode(&self) -> String;

    /// Decode one line produced by [`Record::encode`]
    fn decode(line: &str) -> Result<Self>;
}

/// Raw corpus lines pass through unchanged
impl Record for String {
    fn encode(&self) -> String {
        self.clone()
    }

    fn decode(line: &str) -> Result<Self> {
        Ok(line.to_string())
    }
}

/// Output of the line counter: a distinct line and its occurrence count
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CountEntry {
    pub line: String,
    pub count: u64,
}

impl CountEntry {
    pub fn new(line: impl Into<String>, count: u64) -> Self {
        Self {
            line: line.into(),
            count,
        }
    }
}

/// Encoded as `line<TAB>count`
impl Record for CountEntry {
    fn encode(&self) -> String {
        format!("{}\t{}", self.line, self.count)
    }

    fn decode(line: &str) -> Result<Self> {
        // The count is always the last field, so a stray tab inside the
        // line itself stays part of the line.
        let (text, count) = line
            .rsplit_once('\t')
            .ok_or_else(|| PipelineError::malformed(line, "missing count field"))?;
        Ok(Self::new(text, parse_frequency(line, count)?))
    }
}

/// Output of the pattern matcher: a pattern and its aggregate frequency
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MatchEntry {
    pub pattern: String,
    pub frequency: u64,
}

impl MatchEntry {
    pub fn new(pattern: impl Into<String>, frequency: u64) -> Self {
        Self {
            pattern: pattern.into(),
            frequency,
        }
    }
}

/// Encoded frequency first (`frequency<TAB>pattern`) so the sort key leads
impl Record for MatchEntry {
    fn encode(&self) -> String {
        format!("{}\t{}", self.frequency, self.pattern)
    }

    fn decode(line: &str) -> Result<Self> {
        let (frequency, pattern) = line
            .split_once('\t')
            .ok_or_else(|| PipelineError::malformed(line, "missing pattern field"))?;
        Ok(Self::new(pattern, parse_frequency(line, frequency)?))
    }
}

/// Final output row: a pattern and its frequency, in descending order
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SortedEntry {
    pub pattern: String,
    pub frequency: u64,
}

impl SortedEntry {
    pub fn new(pattern: impl Into<String>, frequency: u64) -> Self {
        Self {
            pattern: pattern.into(),
            frequency,
        }
    }
}

/// Encoded as `pattern<TAB>frequency`
impl Record for SortedEntry {
    fn encode(&self) -> String {
        format!("{}\t{}", self.pattern, self.frequency)
    }

    fn decode(line: &str) -> Result<Self> {
        let (pattern, frequency) = line
            .rsplit_once('\t')
            .ok_or_else(|| PipelineError::malformed(line, "missing frequency field"))?;
        Ok(Self::new(pattern, parse_frequency(line, frequency)?))
    }
}

fn parse_frequency(line: &str, field: &str) -> Result<u64> {
    field
        .trim()
        .parse::<u64>()
        .map_err(|e| PipelineError::malformed(line, format!("bad number {field:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_entry_layout() {
        let entry = CountEntry::new("cat", 3);
        assert_eq!(entry.encode(), "cat\t3");
        assert_eq!(CountEntry::decode("cat\t3").unwrap(), entry);
    }

    #[test]
    fn test_count_entry_empty_line() {
        let entry = CountEntry::decode("\t7").unwrap();
        assert_eq!(entry.line, "");
        assert_eq!(entry.count, 7);
    }

    #[test]
    fn test_count_entry_keeps_inner_tab() {
        let entry = CountEntry::decode("a\tb\t2").unwrap();
        assert_eq!(entry.line, "a\tb");
        assert_eq!(entry.count, 2);
    }

    #[test]
    fn test_match_entry_is_frequency_first() {
        let entry = MatchEntry::new("c.t", 3);
        assert_eq!(entry.encode(), "3\tc.t");
        assert_eq!(MatchEntry::decode("3\tc.t").unwrap(), entry);
    }

    #[test]
    fn test_match_entry_pattern_with_tab() {
        let entry = MatchEntry::decode("4\ta\tb").unwrap();
        assert_eq!(entry.pattern, "a\tb");
        assert_eq!(entry.frequency, 4);
    }

    #[test]
    fn test_sorted_entry_is_pattern_first() {
        assert_eq!(SortedEntry::new("d.g", 1).encode(), "d.g\t1");
    }

    #[test]
    fn test_missing_field_is_malformed() {
        assert!(matches!(
            CountEntry::decode("no tab here"),
            Err(PipelineError::MalformedRecord { .. })
        ));
        assert!(matches!(
            MatchEntry::decode("12"),
            Err(PipelineError::MalformedRecord { .. })
        ));
    }

    #[test]
    fn test_non_numeric_count_is_malformed() {
        let err = CountEntry::decode("cat\tmany").unwrap_err();
        assert!(err.to_string().contains("bad number"));
    }
}
