use anyhow::Context;
use clap::Parser;
use pattern_count::{PatternLoadPolicy, PipelineBuilder, PipelineConfig};
use std::path::PathBuf;
use tracing::{debug, error, info, trace};
use tracing_subscriber::EnvFilter;

/// Count distinct lines, match them against regex patterns and rank the
/// patterns by how many lines they cover
#[derive(Parser)]
#[command(name = "pattern-count", version, long_about = None)]
struct Cli {
    /// Input corpus: a file, or a directory of files
    input: PathBuf,

    /// Output directory for the ranked patterns (must not exist)
    output: PathBuf,

    /// Pattern file, one regular expression per line
    #[arg(short, long)]
    patterns: Option<PathBuf>,

    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Map tasks per stage
    #[arg(long)]
    map_tasks: Option<usize>,

    /// Reduce tasks per stage
    #[arg(long)]
    reduce_tasks: Option<usize>,

    /// Attempts per task before a stage fails
    #[arg(long)]
    max_task_attempts: Option<u32>,

    /// Directory for intermediate stage output
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Fail instead of running with no patterns when the pattern file is unreadable
    #[arg(long)]
    fail_fast: bool,

    /// Keep intermediate stage directories after a successful run
    #[arg(long)]
    keep_intermediate: bool,

    /// Run every task on the main thread
    #[arg(long)]
    sequential: bool,

    /// Enable verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn pipeline_config(&self) -> anyhow::Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::load(path)
                .with_context(|| format!("loading configuration from {}", path.display()))?,
            None => PipelineConfig::default(),
        };

        if let Some(patterns) = &self.patterns {
            config.pattern_file = patterns.clone();
        }
        if let Some(tasks) = self.map_tasks {
            config.map_tasks = tasks;
        }
        if let Some(tasks) = self.reduce_tasks {
            config.reduce_tasks = tasks;
        }
        if let Some(attempts) = self.max_task_attempts {
            config.max_task_attempts = attempts;
        }
        if let Some(dir) = &self.work_dir {
            config.work_dir = dir.clone();
        }
        if self.fail_fast {
            config.pattern_load_policy = PatternLoadPolicy::FailFast;
        }
        if self.keep_intermediate {
            config.keep_intermediate = true;
        }
        if self.sequential {
            config.parallel = false;
        }
        Ok(config)
    }
}

fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(cli.verbose >= 2)
        .with_thread_ids(cli.verbose >= 2)
        .init();

    debug!("pattern-count started with verbosity level: {}", cli.verbose);
    trace!("Full CLI args: {:?}", std::env::args().collect::<Vec<_>>());

    if let Err(e) = run(&cli) {
        error!("Fatal error: {:#}", e);
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let config = cli.pipeline_config()?;
    debug!(?config, "Effective configuration");

    let mut pipeline = PipelineBuilder::from_config(config).build()?;
    let report = pipeline
        .run(&cli.input, &cli.output)
        .with_context(|| format!("running pipeline over {}", cli.input.display()))?;

    info!("{}", report.summary().trim_end());
    for dir in &report.intermediates {
        info!(dir = %dir.display(), "Kept intermediate output");
    }
    info!(output = %report.output.display(), "Pipeline finished");
    Ok(())
}
