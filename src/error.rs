use std::path::PathBuf;
use thiserror::Error;

use crate::pipeline::PipelineState;

/// Result type for pattern-count operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can occur while building or running the pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Filesystem access failed
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A tab-separated record could not be decoded
    #[error("Malformed record {line:?}: {reason}")]
    MalformedRecord { line: String, reason: String },

    /// A pattern is not a valid regular expression
    #[error("Invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: Box<regex::Error>,
    },

    /// The pattern file could not be read (fail-fast policy only)
    #[error("Cannot read pattern file {path}: {source}")]
    PatternFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A map or reduce task kept failing after all attempts
    #[error("Stage {stage}: {task} failed after {attempts} attempt(s): {source}")]
    TaskFailed {
        stage: String,
        task: String,
        attempts: u32,
        #[source]
        source: Box<PipelineError>,
    },

    /// The pipeline halted in the given state
    #[error("Pipeline halted while {state}: {source}")]
    StageFailed {
        state: PipelineState,
        #[source]
        source: Box<PipelineError>,
    },

    /// The final output location is already present
    #[error("Output location already exists: {0}")]
    OutputExists(PathBuf),

    /// A stage directory has no completion marker
    #[error("Stage output is incomplete (no _SUCCESS marker): {0}")]
    IncompleteStage(PathBuf),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A worker thread panicked
    #[error("Worker thread error: {0}")]
    Thread(String),
}

impl PipelineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn malformed(line: &str, reason: impl Into<String>) -> Self {
        Self::MalformedRecord {
            line: line.to_string(),
            reason: reason.into(),
        }
    }
}
