//! Execution substrate for [`Stage`]s.
//!
//! [`Executor::run`] splits the input into map tasks, partitions every
//! emitted pair by key hash, waits for all map tasks to commit, groups each
//! partition by key and hands every group to reduce. A task attempt either
//! commits its whole output or none of it, and failed attempts are retried up
//! to [`StageConfig::max_task_attempts`].

use crate::error::{PipelineError, Result};
use crate::metrics::StageMetrics;
use crate::stage::{Stage, TaskContext, TaskKind};
use crossbeam::queue::ArrayQueue;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, warn};

/// Parallelism and retry settings for one stage run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageConfig {
    pub map_tasks: usize,
    pub reduce_tasks: usize,
    pub max_task_attempts: u32,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            map_tasks: 5,
            reduce_tasks: 1,
            max_task_attempts: 4,
        }
    }
}

impl StageConfig {
    pub fn validate(&self) -> Result<()> {
        if self.map_tasks == 0 {
            return Err(PipelineError::Config("map_tasks must be at least 1".into()));
        }
        if self.reduce_tasks == 0 {
            return Err(PipelineError::Config("reduce_tasks must be at least 1".into()));
        }
        if self.max_task_attempts == 0 {
            return Err(PipelineError::Config(
                "max_task_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Records produced by a stage together with its metrics
#[derive(Debug)]
pub struct StageOutput<T> {
    /// Reduce output, partition after partition
    pub records: Vec<T>,
    /// Number of records each reduce partition contributed to `records`
    pub partition_sizes: Vec<usize>,
    pub metrics: StageMetrics,
}

/// Runs stages. Implementors only decide how independent tasks are scheduled.
pub trait Executor: Send + Sync {
    /// Run tasks `0..count` and return their results in task order.
    /// The first failing task fails the batch.
    fn run_tasks<T, F>(&self, count: usize, task: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(usize) -> Result<T> + Sync;

    /// Run one full map/shuffle/reduce pass of `stage` over `inputs`
    fn run<S: Stage>(
        &self,
        stage: &S,
        inputs: Vec<S::Input>,
        config: &StageConfig,
    ) -> Result<StageOutput<S::Output>> {
        config.validate()?;
        let metrics = StageMetrics::new();
        let partitions = reduce_partitions(stage, config);
        let splits = split_inputs(inputs, config.map_tasks);
        debug!(
            stage = stage.name(),
            map_tasks = splits.len(),
            reduce_tasks = partitions,
            "Starting stage"
        );

        let map_outputs = self.run_tasks(splits.len(), |index| {
            let output = with_attempts(stage, TaskKind::Map, index, config, &metrics, |ctx| {
                run_map_task(stage, &splits[index], ctx, partitions)
            })?;
            metrics.record_read(splits[index].len() as u64);
            metrics.record_emitted(output.emitted);
            Ok(output)
        })?;

        let groups = shuffle(map_outputs, partitions);

        let reduced = self.run_tasks(groups.len(), |index| {
            let group = &groups[index];
            let records = with_attempts(stage, TaskKind::Reduce, index, config, &metrics, |ctx| {
                run_reduce_task(stage, group, ctx)
            })?;
            metrics.record_keys(group.len() as u64);
            metrics.record_written(records.len() as u64);
            Ok(records)
        })?;

        Ok(StageOutput {
            partition_sizes: reduced.iter().map(Vec::len).collect(),
            records: reduced.into_iter().flatten().collect(),
            metrics,
        })
    }
}

/// Runs every task on the calling thread, in order
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialExecutor;

impl Executor for SequentialExecutor {
    fn run_tasks<T, F>(&self, count: usize, task: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(usize) -> Result<T> + Sync,
    {
        (0..count).map(task).collect()
    }
}

/// Runs tasks on a fixed set of worker threads pulling task ids from a
/// lock-free queue
#[derive(Debug, Clone, Copy)]
pub struct ThreadedExecutor {
    workers: usize,
}

impl ThreadedExecutor {
    /// Create an executor with `workers` threads (at least one)
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    /// One worker per available CPU
    pub fn with_available_parallelism() -> Self {
        Self::new(
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        )
    }
}

impl Default for ThreadedExecutor {
    fn default() -> Self {
        Self::with_available_parallelism()
    }
}

impl Executor for ThreadedExecutor {
    fn run_tasks<T, F>(&self, count: usize, task: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(usize) -> Result<T> + Sync,
    {
        if count == 0 {
            return Ok(Vec::new());
        }

        let queue = ArrayQueue::new(count);
        for index in 0..count {
            queue.push(index).map_err(|rejected| {
                PipelineError::Thread(format!("task queue full at task {rejected}"))
            })?;
        }
        let slots: Vec<Mutex<Option<Result<T>>>> = (0..count).map(|_| Mutex::new(None)).collect();
        let aborted = AtomicBool::new(false);

        let panicked = std::thread::scope(|scope| {
            let mut handles = Vec::with_capacity(self.workers);
            for _ in 0..self.workers.min(count) {
                handles.push(scope.spawn(|| {
                    while !aborted.load(Ordering::Relaxed) {
                        let Some(index) = queue.pop() else {
                            break;
                        };
                        let result = task(index);
                        if result.is_err() {
                            aborted.store(true, Ordering::Relaxed);
                        }
                        *slots[index].lock() = Some(result);
                    }
                }));
            }

            handles
                .into_iter()
                .map(|handle| handle.join())
                .filter(|joined| joined.is_err())
                .count()
        });

        if panicked > 0 {
            return Err(PipelineError::Thread(format!(
                "{panicked} worker thread(s) panicked"
            )));
        }

        let mut results = Vec::with_capacity(count);
        let mut skipped = false;
        for slot in slots {
            match slot.into_inner() {
                Some(Ok(value)) => results.push(value),
                Some(Err(e)) => return Err(e),
                None => skipped = true,
            }
        }
        if skipped {
            return Err(PipelineError::Thread("task was never scheduled".into()));
        }
        Ok(results)
    }
}

/// Pairs emitted by one committed map task, bucketed by reduce partition
#[derive(Debug)]
struct MapTaskOutput<K, V> {
    buckets: Vec<Vec<(K, V)>>,
    emitted: u64,
}

fn reduce_partitions<S: Stage>(stage: &S, config: &StageConfig) -> usize {
    match stage.max_reduce_tasks() {
        Some(cap) if cap < config.reduce_tasks => {
            debug!(
                stage = stage.name(),
                requested = config.reduce_tasks,
                cap,
                "Capping reduce tasks"
            );
            cap.max(1)
        }
        _ => config.reduce_tasks,
    }
}

/// Split inputs into at most `tasks` contiguous, non-empty chunks.
/// An empty input still yields one (empty) split so per-task setup runs.
fn split_inputs<I>(inputs: Vec<I>, tasks: usize) -> Vec<Vec<I>> {
    if inputs.is_empty() {
        return vec![Vec::new()];
    }
    let tasks = tasks.clamp(1, inputs.len());
    let chunk = inputs.len().div_ceil(tasks);

    let mut splits = Vec::with_capacity(tasks);
    let mut rest = inputs.into_iter();
    loop {
        let split: Vec<I> = rest.by_ref().take(chunk).collect();
        if split.is_empty() {
            break;
        }
        splits.push(split);
    }
    splits
}

fn partition_for<K: Hash>(key: &K, partitions: usize) -> usize {
    if partitions <= 1 {
        return 0;
    }
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % partitions as u64) as usize
}

fn with_attempts<S, T, F>(
    stage: &S,
    kind: TaskKind,
    index: usize,
    config: &StageConfig,
    metrics: &StageMetrics,
    mut attempt_fn: F,
) -> Result<T>
where
    S: Stage,
    F: FnMut(TaskContext) -> Result<T>,
{
    let mut attempt = 1;
    loop {
        let ctx = TaskContext {
            kind,
            index,
            attempt,
        };
        let start = Instant::now();
        let result = attempt_fn(ctx);
        metrics.record_task(start.elapsed());

        match result {
            Ok(value) => {
                debug!(stage = stage.name(), %ctx, attempt, "Task committed");
                return Ok(value);
            }
            Err(e) if attempt < config.max_task_attempts => {
                warn!(stage = stage.name(), %ctx, attempt, error = %e, "Task attempt failed, retrying");
                metrics.record_retry();
                attempt += 1;
            }
            Err(e) => {
                return Err(PipelineError::TaskFailed {
                    stage: stage.name().to_string(),
                    task: ctx.to_string(),
                    attempts: attempt,
                    source: Box::new(e),
                });
            }
        }
    }
}

fn run_map_task<S: Stage>(
    stage: &S,
    split: &[S::Input],
    ctx: TaskContext,
    partitions: usize,
) -> Result<MapTaskOutput<S::Key, S::Value>> {
    let mut worker = stage.clone();
    worker.on_start(&ctx)?;

    let mut buckets: Vec<Vec<(S::Key, S::Value)>> = (0..partitions).map(|_| Vec::new()).collect();
    let mut emitted = 0u64;
    for record in split {
        for (key, value) in worker.map(record)? {
            buckets[partition_for(&key, partitions)].push((key, value));
            emitted += 1;
        }
    }
    Ok(MapTaskOutput { buckets, emitted })
}

/// Group committed map output per partition, keeping map-task order within a key
fn shuffle<K: Ord, V>(
    outputs: Vec<MapTaskOutput<K, V>>,
    partitions: usize,
) -> Vec<BTreeMap<K, Vec<V>>> {
    let mut groups: Vec<BTreeMap<K, Vec<V>>> = (0..partitions).map(|_| BTreeMap::new()).collect();
    for output in outputs {
        for (partition, bucket) in output.buckets.into_iter().enumerate() {
            for (key, value) in bucket {
                groups[partition].entry(key).or_default().push(value);
            }
        }
    }
    groups
}

fn run_reduce_task<S: Stage>(
    stage: &S,
    groups: &BTreeMap<S::Key, Vec<S::Value>>,
    ctx: TaskContext,
) -> Result<Vec<S::Output>> {
    let mut worker = stage.clone();
    worker.on_start(&ctx)?;

    let mut records = Vec::new();
    for (key, values) in groups {
        records.extend(worker.reduce(key.clone(), values.clone())?);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    /// Counts characters; optionally fails the first attempt of map task 0
    #[derive(Clone)]
    struct CharCount {
        flaky: bool,
        always_fail: bool,
        single_reducer: bool,
        starts: Arc<AtomicUsize>,
    }

    impl CharCount {
        fn new() -> Self {
            Self {
                flaky: false,
                always_fail: false,
                single_reducer: false,
                starts: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl Stage for CharCount {
        type Input = String;
        type Key = char;
        type Value = u64;
        type Output = (char, u64);

        fn name(&self) -> &str {
            "char_count"
        }

        fn on_start(&mut self, task: &TaskContext) -> Result<()> {
            self.starts.fetch_add(1, Ordering::Relaxed);
            if task.kind == TaskKind::Map
                && (self.always_fail || (self.flaky && task.index == 0 && task.attempt == 1))
            {
                return Err(PipelineError::Config("injected failure".into()));
            }
            Ok(())
        }

        fn map(&self, input: &String) -> Result<Vec<(char, u64)>> {
            Ok(input.chars().map(|c| (c, 1)).collect())
        }

        fn reduce(&self, key: char, values: Vec<u64>) -> Result<Vec<(char, u64)>> {
            Ok(vec![(key, values.iter().sum())])
        }

        fn max_reduce_tasks(&self) -> Option<usize> {
            self.single_reducer.then_some(1)
        }
    }

    fn inputs() -> Vec<String> {
        ["abc", "aab", "c", "", "ba"].iter().map(|s| s.to_string()).collect()
    }

    fn sorted(mut records: Vec<(char, u64)>) -> Vec<(char, u64)> {
        records.sort();
        records
    }

    #[test]
    fn test_split_inputs() {
        let splits = split_inputs((0..7).collect::<Vec<_>>(), 3);
        assert_eq!(splits, vec![vec![0, 1, 2], vec![3, 4, 5], vec![6]]);

        let splits = split_inputs(vec![1, 2], 5);
        assert_eq!(splits.len(), 2);

        let splits: Vec<Vec<u8>> = split_inputs(Vec::new(), 5);
        assert_eq!(splits, vec![Vec::<u8>::new()]);
    }

    #[test]
    fn test_partition_is_stable() {
        let p = partition_for(&"pattern", 4);
        assert!(p < 4);
        assert_eq!(partition_for(&"pattern", 4), p);
        assert_eq!(partition_for(&"anything", 1), 0);
    }

    #[test]
    fn test_sequential_run() {
        let config = StageConfig::default();
        let output = SequentialExecutor.run(&CharCount::new(), inputs(), &config).unwrap();
        assert_eq!(output.records, vec![('a', 4), ('b', 3), ('c', 2)]);
        assert_eq!(output.metrics.records_read(), 5);
        assert_eq!(output.metrics.pairs_emitted(), 9);
        assert_eq!(output.metrics.keys_reduced(), 3);
        assert_eq!(output.partition_sizes, vec![3]);
    }

    #[test]
    fn test_threaded_matches_sequential() {
        let config = StageConfig {
            map_tasks: 3,
            reduce_tasks: 3,
            max_task_attempts: 1,
        };
        let threaded = ThreadedExecutor::new(4)
            .run(&CharCount::new(), inputs(), &config)
            .unwrap();
        let sequential = SequentialExecutor
            .run(&CharCount::new(), inputs(), &config)
            .unwrap();
        assert_eq!(sorted(threaded.records), sorted(sequential.records));
    }

    #[test]
    fn test_threaded_runs_every_task_once_in_order() {
        let runs = AtomicUsize::new(0);
        let results = ThreadedExecutor::new(3)
            .run_tasks(37, |index| {
                runs.fetch_add(1, Ordering::Relaxed);
                Ok(index * 2)
            })
            .unwrap();
        assert_eq!(results, (0..37).map(|i| i * 2).collect::<Vec<_>>());
        assert_eq!(runs.load(Ordering::Relaxed), 37);
    }

    #[test]
    fn test_every_task_gets_its_own_start() {
        let stage = CharCount::new();
        let config = StageConfig {
            map_tasks: 3,
            reduce_tasks: 2,
            max_task_attempts: 1,
        };
        ThreadedExecutor::new(2).run(&stage, inputs(), &config).unwrap();
        assert_eq!(stage.starts.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn test_failed_attempt_is_retried() {
        let stage = CharCount {
            flaky: true,
            ..CharCount::new()
        };
        let output = SequentialExecutor
            .run(&stage, inputs(), &StageConfig::default())
            .unwrap();
        assert_eq!(output.records, vec![('a', 4), ('b', 3), ('c', 2)]);
        assert_eq!(output.metrics.task_retries(), 1);
    }

    #[test]
    fn test_exhausted_attempts_fail_the_stage() {
        let stage = CharCount {
            always_fail: true,
            ..CharCount::new()
        };
        let config = StageConfig {
            max_task_attempts: 2,
            ..StageConfig::default()
        };
        let err = ThreadedExecutor::new(2).run(&stage, inputs(), &config).unwrap_err();
        match err {
            PipelineError::TaskFailed { attempts, task, .. } => {
                assert_eq!(attempts, 2);
                assert!(task.starts_with("map task"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_reduce_cap_gives_global_order() {
        let stage = CharCount {
            single_reducer: true,
            ..CharCount::new()
        };
        let config = StageConfig {
            reduce_tasks: 4,
            ..StageConfig::default()
        };
        let output = ThreadedExecutor::new(4).run(&stage, inputs(), &config).unwrap();
        assert_eq!(output.records, vec![('a', 4), ('b', 3), ('c', 2)]);
    }

    #[test]
    fn test_invalid_config() {
        let config = StageConfig {
            map_tasks: 0,
            ..StageConfig::default()
        };
        assert!(matches!(
            SequentialExecutor.run(&CharCount::new(), inputs(), &config),
            Err(PipelineError::Config(_))
        ));
    }
}
