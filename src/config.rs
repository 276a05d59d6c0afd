use crate::error::{PipelineError, Result};
use crate::executor::StageConfig;
use crate::patterns::PatternLoadPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Pipeline settings, loadable from TOML. Every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Pattern list, one regular expression per line
    pub pattern_file: PathBuf,
    /// Behaviour when the pattern file cannot be read
    pub pattern_load_policy: PatternLoadPolicy,
    /// Map tasks per stage
    pub map_tasks: usize,
    /// Reduce tasks per stage (the sort stage always uses one)
    pub reduce_tasks: usize,
    /// Attempts per task before the stage fails
    pub max_task_attempts: u32,
    /// Parent of the intermediate stage directories
    pub work_dir: PathBuf,
    /// Keep intermediate directories after a successful run
    pub keep_intermediate: bool,
    /// Run tasks on worker threads instead of the calling thread
    pub parallel: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pattern_file: PathBuf::from("patterns.txt"),
            pattern_load_policy: PatternLoadPolicy::Degrade,
            map_tasks: 5,
            reduce_tasks: 1,
            max_task_attempts: 4,
            work_dir: std::env::temp_dir(),
            keep_intermediate: false,
            parallel: true,
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| PipelineError::Config(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        self.stage_config().validate()
    }

    pub fn stage_config(&self) -> StageConfig {
        StageConfig {
            map_tasks: self.map_tasks,
            reduce_tasks: self.reduce_tasks,
            max_task_attempts: self.max_task_attempts,
        }
    }
}
