use crate::error::Result;
use crate::patterns::{PatternLoadPolicy, PatternSet};
use crate::record::{CountEntry, MatchEntry};
use crate::stage::{Stage, TaskContext, TaskKind};
use std::path::PathBuf;
use tracing::debug;

/// Where a [`PatternMatcher`] gets its patterns from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternSource {
    /// One regular expression per line in a file
    File {
        path: PathBuf,
        policy: PatternLoadPolicy,
    },
    /// Patterns supplied directly, mostly for in-memory runs
    Inline(Vec<String>),
}

impl PatternSource {
    pub fn load(&self) -> Result<PatternSet> {
        match self {
            Self::File { path, policy } => PatternSet::load(path, *policy),
            Self::Inline(patterns) => PatternSet::from_patterns(patterns.iter().cloned()),
        }
    }
}

/// Sums line counts per matching pattern.
///
/// Each map task builds its own [`PatternSet`] in [`Stage::on_start`]; the set
/// is never shared between tasks.
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    source: PatternSource,
    patterns: PatternSet,
}

impl PatternMatcher {
    pub fn new(source: PatternSource) -> Self {
        Self {
            source,
            patterns: PatternSet::empty(),
        }
    }

    pub fn from_file(path: impl Into<PathBuf>, policy: PatternLoadPolicy) -> Self {
        Self::new(PatternSource::File {
            path: path.into(),
            policy,
        })
    }

    pub fn from_patterns<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(PatternSource::Inline(
            patterns.into_iter().map(Into::<String>::into).collect(),
        ))
    }
}

impl Stage for PatternMatcher {
    type Input = CountEntry;
    type Key = String;
    type Value = u64;
    type Output = MatchEntry;

    fn name(&self) -> &str {
        "pattern_matcher"
    }

    fn on_start(&mut self, task: &TaskContext) -> Result<()> {
        if task.kind == TaskKind::Map {
            self.patterns = self.source.load()?;
            debug!(%task, patterns = self.patterns.len(), "Pattern set ready");
        }
        Ok(())
    }

    fn map(&self, input: &CountEntry) -> Result<Vec<(String, u64)>> {
        Ok(self
            .patterns
            .matching(&input.line)
            .map(|pattern| (pattern.to_string(), input.count))
            .collect())
    }

    fn reduce(&self, key: String, values: Vec<u64>) -> Result<Vec<MatchEntry>> {
        Ok(vec![MatchEntry::new(key, values.iter().sum())])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::executor::{Executor, SequentialExecutor, StageConfig, ThreadedExecutor};

    fn counts() -> Vec<CountEntry> {
        vec![
            CountEntry::new("cat", 3),
            CountEntry::new("dog", 1),
            CountEntry::new("cot", 2),
            CountEntry::new("bird", 5),
        ]
    }

    #[test]
    fn test_map_before_start_matches_nothing() {
        let matcher = PatternMatcher::from_patterns(["c.t"]);
        assert!(matcher.map(&CountEntry::new("cat", 3)).unwrap().is_empty());
    }

    #[test]
    fn test_map_emits_count_per_matching_pattern() {
        let mut matcher = PatternMatcher::from_patterns(["a.c", "ab.", "zzz"]);
        matcher.on_start(&TaskContext::map(0, 1)).unwrap();
        let pairs = matcher.map(&CountEntry::new("abc", 4)).unwrap();
        assert_eq!(pairs, vec![("a.c".to_string(), 4), ("ab.".to_string(), 4)]);
    }

    #[test]
    fn test_reduce_task_skips_pattern_load() {
        let mut matcher = PatternMatcher::from_file("/nonexistent/patterns", PatternLoadPolicy::FailFast);
        assert!(matcher.on_start(&TaskContext::reduce(0, 1)).is_ok());
        assert!(matches!(
            matcher.on_start(&TaskContext::map(0, 1)),
            Err(PipelineError::PatternFile { .. })
        ));
    }

    #[test]
    fn test_aggregates_and_drops_unmatched_patterns() {
        let matcher = PatternMatcher::from_patterns(["c.t", "d.g", "fish"]);
        let output = SequentialExecutor
            .run(&matcher, counts(), &StageConfig::default())
            .unwrap();
        assert_eq!(
            output.records,
            vec![MatchEntry::new("c.t", 5), MatchEntry::new("d.g", 1)]
        );
    }

    #[test]
    fn test_parallel_tasks_agree() {
        let matcher = PatternMatcher::from_patterns(["c.t", "d.g", ".*"]);
        let config = StageConfig {
            map_tasks: 4,
            reduce_tasks: 2,
            max_task_attempts: 1,
        };
        let mut records = ThreadedExecutor::new(4)
            .run(&matcher, counts(), &config)
            .unwrap()
            .records;
        records.sort_by(|a, b| a.pattern.cmp(&b.pattern));
        assert_eq!(
            records,
            vec![
                MatchEntry::new(".*", 11),
                MatchEntry::new("c.t", 5),
                MatchEntry::new("d.g", 1),
            ]
        );
    }

    #[test]
    fn test_run_loads_patterns_per_task_copy() {
        let matcher = PatternMatcher::from_patterns(["c.t"]);
        let output = SequentialExecutor
            .run(&matcher, counts(), &StageConfig::default())
            .unwrap();
        assert_eq!(output.records, vec![MatchEntry::new("c.t", 5)]);
        assert!(matcher.map(&CountEntry::new("cat", 3)).unwrap().is_empty());
    }

    #[test]
    fn test_unreadable_file_degrades() {
        let matcher = PatternMatcher::from_file("/nonexistent/patterns", PatternLoadPolicy::Degrade);
        let output = SequentialExecutor
            .run(&matcher, counts(), &StageConfig::default())
            .unwrap();
        assert!(output.records.is_empty());
    }
}
