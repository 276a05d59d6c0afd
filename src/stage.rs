use crate::error::Result;
use std::fmt;
use std::hash::Hash;

/// Which half of a stage a task runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Map,
    Reduce,
}

/// Identity of a single task attempt, handed to [`Stage::on_start`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskContext {
    pub kind: TaskKind,
    pub index: usize,
    pub attempt: u32,
}

impl TaskContext {
    pub fn map(index: usize, attempt: u32) -> Self {
        Self {
            kind: TaskKind::Map,
            index,
            attempt,
        }
    }

    pub fn reduce(index: usize, attempt: u32) -> Self {
        Self {
            kind: TaskKind::Reduce,
            index,
            attempt,
        }
    }
}

impl fmt::Display for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            TaskKind::Map => "map",
            TaskKind::Reduce => "reduce",
        };
        write!(f, "{} task {}", kind, self.index)
    }
}

/// One map/reduce step of the pipeline.
///
/// An executor clones the stage once per task attempt and calls
/// [`Stage::on_start`] on the clone before feeding it records, so every task
/// owns its state and nothing mutable is shared between tasks.
///
/// Reduce input is grouped by key and visited in ascending `Ord` order of
/// [`Stage::Key`]; a stage that needs another order encodes it in its key
/// type. The order of values inside one group is unspecified.
pub trait Stage: Clone + Send + Sync + 'static {
    /// Record consumed by the map side
    type Input: Send + Sync;
    /// Grouping key emitted by the map side
    type Key: Ord + Hash + Clone + Send + Sync;
    /// Value emitted by the map side
    type Value: Clone + Send + Sync;
    /// Record produced by the reduce side
    type Output: Send;

    /// Get a human-readable name for this stage
    fn name(&self) -> &str;

    /// Per-task initialization, called on a fresh clone before any record
    fn on_start(&mut self, _task: &TaskContext) -> Result<()> {
        Ok(())
    }

    /// Turn one input record into zero or more key/value pairs
    fn map(&self, input: &Self::Input) -> Result<Vec<(Self::Key, Self::Value)>>;

    /// Fold every value emitted for `key` into output records
    fn reduce(&self, key: Self::Key, values: Vec<Self::Value>) -> Result<Vec<Self::Output>>;

    /// Upper bound on reduce partitions this stage tolerates
    fn max_reduce_tasks(&self) -> Option<usize> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Clone)]
    struct LengthStage {
        starts: Arc<AtomicUsize>,
    }

    impl Stage for LengthStage {
        type Input = String;
        type Key = usize;
        type Value = String;
        type Output = (usize, usize);

        fn name(&self) -> &str {
            "length"
        }

        fn on_start(&mut self, _task: &TaskContext) -> Result<()> {
            self.starts.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        fn map(&self, input: &String) -> Result<Vec<(usize, String)>> {
            Ok(vec![(input.len(), input.clone())])
        }

        fn reduce(&self, key: usize, values: Vec<String>) -> Result<Vec<(usize, usize)>> {
            Ok(vec![(key, values.len())])
        }
    }

    #[test]
    fn test_stage_defaults() {
        let mut stage = LengthStage {
            starts: Arc::new(AtomicUsize::new(0)),
        };
        stage.on_start(&TaskContext::map(0, 1)).unwrap();
        assert_eq!(stage.starts.load(Ordering::Relaxed), 1);
        assert_eq!(stage.max_reduce_tasks(), None);
        assert_eq!(stage.map(&"abc".to_string()).unwrap(), vec![(3, "abc".to_string())]);
        assert_eq!(
            stage.reduce(3, vec!["abc".into(), "xyz".into()]).unwrap(),
            vec![(3, 2)]
        );
    }

    #[test]
    fn test_task_context_display() {
        assert_eq!(TaskContext::map(2, 1).to_string(), "map task 2");
        assert_eq!(TaskContext::reduce(0, 3).to_string(), "reduce task 0");
    }
}
