//! Pattern list loading and whole-line matching.

use crate::error::{PipelineError, Result};
use regex::{Regex, RegexSet};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use tracing::{debug, warn};

/// What to do when the pattern file cannot be opened or read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PatternLoadPolicy {
    /// Log the failure and continue with an empty set (no matches)
    #[default]
    Degrade,
    /// Fail the task, and with it the stage
    FailFast,
}

/// Deduplicated, compiled set of patterns. Every pattern must match a whole
/// line, not a substring of it.
#[derive(Debug, Clone)]
pub struct PatternSet {
    patterns: Vec<String>,
    matcher: RegexSet,
}

impl PatternSet {
    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
            matcher: RegexSet::empty(),
        }
    }

    /// Build a set from pattern strings. Empty strings are skipped and
    /// duplicates keep their first position.
    pub fn from_patterns<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let patterns: Vec<String> = patterns
            .into_iter()
            .map(Into::<String>::into)
            .filter(|p| !p.is_empty() && seen.insert(p.clone()))
            .collect();

        // Each pattern must parse alone, or a stray `)` could escape the anchors
        for pattern in &patterns {
            Regex::new(pattern).map_err(|source| invalid(pattern.clone(), source))?;
        }

        let anchored: Vec<String> = patterns.iter().map(|p| anchor(p)).collect();
        let matcher = RegexSet::new(&anchored).map_err(|source| {
            invalid(format!("<set of {} patterns>", patterns.len()), source)
        })?;

        Ok(Self { patterns, matcher })
    }

    /// Read one pattern per line from `path`
    pub fn load(path: &Path, policy: PatternLoadPolicy) -> Result<Self> {
        match read_lines(path) {
            Ok(lines) => {
                let set = Self::from_patterns(lines)?;
                debug!(path = %path.display(), patterns = set.len(), "Loaded pattern set");
                Ok(set)
            }
            Err(source) => match policy {
                PatternLoadPolicy::Degrade => {
                    warn!(
                        path = %path.display(),
                        error = %source,
                        "Cannot read pattern file, continuing with an empty pattern set"
                    );
                    Ok(Self::empty())
                }
                PatternLoadPolicy::FailFast => Err(PipelineError::PatternFile {
                    path: path.to_path_buf(),
                    source,
                }),
            },
        }
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Patterns in load order
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Every pattern that matches the entire `line`, in load order
    pub fn matching<'a>(&'a self, line: &str) -> impl Iterator<Item = &'a str> + 'a {
        self.matcher
            .matches(line)
            .into_iter()
            .map(move |index| self.patterns[index].as_str())
    }
}

impl Default for PatternSet {
    fn default() -> Self {
        Self::empty()
    }
}

fn anchor(pattern: &str) -> String {
    format!(r"\A(?:{pattern})\z")
}

fn read_lines(path: &Path) -> io::Result<Vec<String>> {
    let file = File::open(path)?;
    BufReader::new(file).lines().collect()
}

fn invalid(pattern: String, source: regex::Error) -> PipelineError {
    PipelineError::InvalidPattern {
        pattern,
        source: Box::new(source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_full_line_semantics() {
        let set = PatternSet::from_patterns(["c.t"]).unwrap();
        assert_eq!(set.matching("cat").collect::<Vec<_>>(), vec!["c.t"]);
        assert_eq!(set.matching("cats").count(), 0);
        assert_eq!(set.matching("a cat").count(), 0);
    }

    #[test]
    fn test_alternation_stays_anchored() {
        let set = PatternSet::from_patterns(["a|b"]).unwrap();
        assert_eq!(set.matching("a").count(), 1);
        assert_eq!(set.matching("ab").count(), 0);
        assert_eq!(set.matching("xb").count(), 0);
    }

    #[test]
    fn test_line_matching_several_patterns() {
        let set = PatternSet::from_patterns(["a.c", "ab.", "x"]).unwrap();
        assert_eq!(set.matching("abc").collect::<Vec<_>>(), vec!["a.c", "ab."]);
    }

    #[test]
    fn test_duplicates_and_blank_lines_collapse() {
        let set = PatternSet::from_patterns(["a+", "", "b", "a+"]).unwrap();
        assert_eq!(set.patterns(), ["a+".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_invalid_pattern_is_named() {
        let err = PatternSet::from_patterns(["ok", "(unclosed"]).unwrap_err();
        match err {
            PipelineError::InvalidPattern { pattern, .. } => assert_eq!(pattern, "(unclosed"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unbalanced_group_cannot_escape_anchors() {
        let err = PatternSet::from_patterns(["a)|(?:b"]).unwrap_err();
        match err {
            PipelineError::InvalidPattern { pattern, .. } => assert_eq!(pattern, "a)|(?:b"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(PatternSet::from_patterns(["c.t", "(?:x)|y"]).is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "c.t").unwrap();
        writeln!(file, "d.g").unwrap();
        writeln!(file, "c.t").unwrap();
        writeln!(file).unwrap();

        let set = PatternSet::load(file.path(), PatternLoadPolicy::FailFast).unwrap();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_missing_file_degrades_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("patterns.txt");
        let set = PatternSet::load(&missing, PatternLoadPolicy::Degrade).unwrap();
        assert!(set.is_empty());
        assert_eq!(set.matching("anything").count(), 0);
    }

    #[test]
    fn test_missing_file_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("patterns.txt");
        assert!(matches!(
            PatternSet::load(&missing, PatternLoadPolicy::FailFast),
            Err(PipelineError::PatternFile { .. })
        ));
    }
}
