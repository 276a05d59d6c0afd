//! Batch pattern-frequency pipeline over a corpus of text lines.
//!
//! The pipeline runs three map/reduce stages one after another:
//!
//! 1. [`LineCounter`] counts each distinct line.
//! 2. [`PatternMatcher`] tests every distinct line against a set of regular
//!    expressions (whole-line match) and sums line counts per pattern.
//! 3. [`DescendingSorter`] orders patterns by that sum, highest first.
//!
//! Stages only describe map and reduce; an [`Executor`] schedules their
//! tasks, shuffles pairs by key and retries failed attempts. Between stages
//! the [`Pipeline`] materializes output as tab-separated part files.
//!
//! # Features
//!
//! - Explicit [`Stage`] trait, runnable on a sequential or threaded executor
//! - Per-task pattern loading with a configurable degrade/fail-fast policy
//! - Bounded per-task retries with all-or-nothing task commits
//! - Per-stage metrics: records, key groups, retries, task latency percentiles
//!
//! # Example
//!
//! ```
//! use pattern_count::Pipeline;
//!
//! let mut pipeline = Pipeline::builder()
//!     .patterns(["c.t", "d.g"])
//!     .build()?;
//!
//! let lines = ["cat", "dog", "cat", "cat"].map(String::from).to_vec();
//! let run = pipeline.run_in_memory(lines)?;
//!
//! assert_eq!(run.sorted[0].pattern, "c.t");
//! assert_eq!(run.sorted[0].frequency, 3);
//! # Ok::<(), pattern_count::PipelineError>(())
//! ```

pub mod config;
pub mod counter;
pub mod error;
pub mod executor;
pub mod matcher;
pub mod metrics;
pub mod patterns;
pub mod pipeline;
pub mod record;
pub mod sorter;
pub mod stage;
pub mod storage;

// Re-exports for convenience
pub use config::PipelineConfig;
pub use counter::LineCounter;
pub use error::{PipelineError, Result};
pub use executor::{Executor, SequentialExecutor, StageConfig, StageOutput, ThreadedExecutor};
pub use matcher::{PatternMatcher, PatternSource};
pub use metrics::{MetricsSnapshot, StageMetrics};
pub use patterns::{PatternLoadPolicy, PatternSet};
pub use pipeline::{InMemoryRun, Pipeline, PipelineBuilder, PipelineReport, PipelineState, StageReport};
pub use record::{CountEntry, MatchEntry, Record, SortedEntry};
pub use sorter::{from_sortable, to_sortable, DescendingFrequency, DescendingSorter};
pub use stage::{Stage, TaskContext, TaskKind};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
