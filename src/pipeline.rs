use crate::config::PipelineConfig;
use crate::counter::LineCounter;
use crate::error::{PipelineError, Result};
use crate::executor::{Executor, SequentialExecutor, StageConfig, StageOutput, ThreadedExecutor};
use crate::matcher::{PatternMatcher, PatternSource};
use crate::metrics::MetricsSnapshot;
use crate::patterns::PatternLoadPolicy;
use crate::record::{CountEntry, MatchEntry, Record, SortedEntry};
use crate::sorter::DescendingSorter;
use crate::stage::Stage;
use crate::storage;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Where a pipeline run currently is. A failed run stays in the state of the
/// stage that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Start,
    Counting,
    Matching,
    Sorting,
    Done,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start => "starting",
            Self::Counting => "counting",
            Self::Matching => "matching",
            Self::Sorting => "sorting",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// Builder for constructing pipelines
pub struct PipelineBuilder {
    config: PipelineConfig,
    inline_patterns: Option<Vec<String>>,
}

impl PipelineBuilder {
    /// Create a new pipeline builder with default settings
    pub fn new() -> Self {
        Self::from_config(PipelineConfig::default())
    }

    /// Start from an existing configuration
    pub fn from_config(config: PipelineConfig) -> Self {
        Self {
            config,
            inline_patterns: None,
        }
    }

    pub fn map_tasks(mut self, tasks: usize) -> Self {
        self.config.map_tasks = tasks;
        self
    }

    pub fn reduce_tasks(mut self, tasks: usize) -> Self {
        self.config.reduce_tasks = tasks;
        self
    }

    pub fn max_task_attempts(mut self, attempts: u32) -> Self {
        self.config.max_task_attempts = attempts;
        self
    }

    pub fn pattern_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pattern_file = path.into();
        self
    }

    pub fn pattern_load_policy(mut self, policy: PatternLoadPolicy) -> Self {
        self.config.pattern_load_policy = policy;
        self
    }

    /// Use these patterns instead of reading the pattern file
    pub fn patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inline_patterns = Some(patterns.into_iter().map(Into::<String>::into).collect());
        self
    }

    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.work_dir = dir.into();
        self
    }

    pub fn keep_intermediate(mut self, keep: bool) -> Self {
        self.config.keep_intermediate = keep;
        self
    }

    /// Run tasks on worker threads (default) or on the calling thread
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.config.parallel = parallel;
        self
    }

    /// Build the pipeline
    pub fn build(self) -> Result<Pipeline> {
        self.config.validate()?;

        let source = match self.inline_patterns {
            Some(patterns) => PatternSource::Inline(patterns),
            None => PatternSource::File {
                path: self.config.pattern_file.clone(),
                policy: self.config.pattern_load_policy,
            },
        };

        Ok(Pipeline {
            matcher: PatternMatcher::new(source),
            config: self.config,
            state: PipelineState::Start,
        })
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Metrics of one finished stage
#[derive(Debug, Clone)]
pub struct StageReport {
    pub state: PipelineState,
    pub metrics: MetricsSnapshot,
}

/// Outcome of a file-based run
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub output: PathBuf,
    pub stages: Vec<StageReport>,
    /// Intermediate directories still on disk
    pub intermediates: Vec<PathBuf>,
}

impl PipelineReport {
    /// Get a summary of all stage metrics
    pub fn summary(&self) -> String {
        let mut summary = String::from("Pipeline Metrics Summary:\n");
        for stage in &self.stages {
            summary.push_str(&format!("  {}: {}\n", stage.state, stage.metrics.format()));
        }
        summary
    }
}

/// Every stage's output of an in-memory run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InMemoryRun {
    pub counts: Vec<CountEntry>,
    pub matches: Vec<MatchEntry>,
    pub sorted: Vec<SortedEntry>,
}

/// Runs line counting, pattern matching and the descending sort, strictly
/// one after another
pub struct Pipeline {
    config: PipelineConfig,
    matcher: PatternMatcher,
    state: PipelineState,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run all stages over the corpus at `input`, writing ranked patterns to
    /// the stage directory `output`, which must not exist yet
    pub fn run(&mut self, input: &Path, output: &Path) -> Result<PipelineReport> {
        if self.config.parallel {
            let executor = ThreadedExecutor::new(self.config.map_tasks);
            self.run_with(&executor, input, output)
        } else {
            self.run_with(&SequentialExecutor, input, output)
        }
    }

    /// Like [`Pipeline::run`], on a caller-supplied executor
    pub fn run_with<E: Executor>(
        &mut self,
        executor: &E,
        input: &Path,
        output: &Path,
    ) -> Result<PipelineReport> {
        self.state = PipelineState::Start;
        if output.exists() {
            return Err(PipelineError::OutputExists(output.to_path_buf()));
        }
        fs::metadata(input).map_err(|e| PipelineError::io(input, e))?;
        fs::create_dir_all(&self.config.work_dir)
            .map_err(|e| PipelineError::io(&self.config.work_dir, e))?;

        let counts_dir = storage::intermediate_dir(&self.config.work_dir, "wcs-temp");
        let matches_dir = storage::intermediate_dir(&self.config.work_dir, "sorted-temp");
        let stage_config = self.config.stage_config();
        let mut stages = Vec::with_capacity(3);

        info!(input = %input.display(), output = %output.display(), "Starting pipeline");

        self.enter(PipelineState::Counting);
        let counted = self.attempt(|| {
            let lines = storage::read_input(input)?;
            materialize(executor, &LineCounter, lines, &stage_config, &counts_dir)
        })?;
        stages.push(self.report(counted));

        self.enter(PipelineState::Matching);
        let matched = self.attempt(|| {
            let counts = storage::read_stage::<CountEntry>(&counts_dir)?;
            materialize(executor, &self.matcher, counts, &stage_config, &matches_dir)
        })?;
        stages.push(self.report(matched));

        self.enter(PipelineState::Sorting);
        let sorted = self.attempt(|| {
            let matches = storage::read_stage::<MatchEntry>(&matches_dir)?;
            materialize(executor, &DescendingSorter, matches, &stage_config, output)
        })?;
        stages.push(self.report(sorted));

        let mut intermediates = vec![counts_dir, matches_dir];
        if !self.config.keep_intermediate {
            for dir in intermediates.drain(..) {
                storage::remove_stage(&dir);
            }
        }

        self.enter(PipelineState::Done);
        Ok(PipelineReport {
            output: output.to_path_buf(),
            stages,
            intermediates,
        })
    }

    /// Run all stages over `lines` without touching storage
    pub fn run_in_memory(&mut self, lines: Vec<String>) -> Result<InMemoryRun> {
        if self.config.parallel {
            let executor = ThreadedExecutor::new(self.config.map_tasks);
            self.run_in_memory_with(&executor, lines)
        } else {
            self.run_in_memory_with(&SequentialExecutor, lines)
        }
    }

    pub fn run_in_memory_with<E: Executor>(
        &mut self,
        executor: &E,
        lines: Vec<String>,
    ) -> Result<InMemoryRun> {
        let stage_config = self.config.stage_config();

        self.enter(PipelineState::Counting);
        let counts = self.attempt(|| executor.run(&LineCounter, lines, &stage_config))?;
        let counts = counts.records;

        self.enter(PipelineState::Matching);
        let inputs = counts.clone();
        let matches = self
            .attempt(|| executor.run(&self.matcher, inputs, &stage_config))?
            .records;

        self.enter(PipelineState::Sorting);
        let inputs = matches.clone();
        let sorted = self
            .attempt(|| executor.run(&DescendingSorter, inputs, &stage_config))?
            .records;

        self.enter(PipelineState::Done);
        Ok(InMemoryRun {
            counts,
            matches,
            sorted,
        })
    }

    fn enter(&mut self, state: PipelineState) {
        info!(from = %self.state, to = %state, "Pipeline transition");
        self.state = state;
    }

    /// Run one stage body, tagging any failure with the current state
    fn attempt<T>(&self, body: impl FnOnce() -> Result<T>) -> Result<T> {
        body().map_err(|source| {
            error!(state = %self.state, error = %source, "Pipeline halted");
            PipelineError::StageFailed {
                state: self.state,
                source: Box::new(source),
            }
        })
    }

    fn report<T>(&self, output: StageOutput<T>) -> StageReport {
        let metrics = output.metrics.snapshot();
        info!(state = %self.state, "{}", metrics.format());
        StageReport {
            state: self.state,
            metrics,
        }
    }
}

/// Run a stage and write its output as a completed stage directory
fn materialize<S, E>(
    executor: &E,
    stage: &S,
    inputs: Vec<S::Input>,
    config: &StageConfig,
    dir: &Path,
) -> Result<StageOutput<S::Output>>
where
    S: Stage,
    S::Output: Record,
    E: Executor,
{
    let output = executor.run(stage, inputs, config)?;
    storage::write_stage(dir, &output.records, &output.partition_sizes)?;
    Ok(output)
}
