//! Textflow Pipeline CLI
//!
//! Normalize, summarize and compact text documents in object storage.

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use textflow::{build_runtime, pipeline, run_all, run_stage, Config, StageKind};

#[derive(Parser)]
#[command(name = "textflow")]
#[command(about = "Normalize, summarize and compact text documents in object storage", long_about = None)]
struct Cli {
    /// Path to configuration file (defaults plus environment when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override concurrency level
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one stage, or all of them in order (default if no command specified)
    Run {
        #[arg(value_enum, default_value_t = RunTarget::All)]
        stage: RunTarget,
    },

    /// List the keys a stage would process, without processing them
    List {
        #[arg(value_enum)]
        stage: StageArg,
    },

    /// Validate configuration
    Validate,

    /// Generate a sample configuration file
    GenerateConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config.yaml")]
        output: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StageArg {
    Preprocess,
    Summarize,
    Compact,
}

impl From<StageArg> for StageKind {
    fn from(arg: StageArg) -> Self {
        match arg {
            StageArg::Preprocess => StageKind::Preprocess,
            StageArg::Summarize => StageKind::Summarize,
            StageArg::Compact => StageKind::Compact,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RunTarget {
    Preprocess,
    Summarize,
    Compact,
    All,
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        None => run_command(cli.config, cli.concurrency, RunTarget::All)?,

        Some(Commands::Run { stage }) => run_command(cli.config, cli.concurrency, stage)?,

        Some(Commands::List { stage }) => list_command(cli.config, stage.into())?,

        Some(Commands::Validate) => validate_command(cli.config)?,

        Some(Commands::GenerateConfig { output }) => generate_config_command(output)?,
    }

    Ok(())
}

/// File (if given), then environment overrides.
fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    let mut config = match config_path {
        Some(path) => Config::from_file(&path)?,
        None => Config::default(),
    };
    config.apply_env_overrides()?;
    Ok(config)
}

fn run_command(config_path: Option<PathBuf>, concurrency: Option<usize>, target: RunTarget) -> Result<()> {
    let mut config = load_config(config_path)?;

    // Apply overrides
    if let Some(c) = concurrency {
        config.processing.concurrency = c;
    }

    config.validate()?;

    let runtime = build_runtime(config.processing.worker_threads)?;
    runtime.block_on(async {
        let reports = match target {
            RunTarget::All => run_all(&config).await?,
            RunTarget::Preprocess => vec![run_stage(&config, StageKind::Preprocess).await?],
            RunTarget::Summarize => vec![run_stage(&config, StageKind::Summarize).await?],
            RunTarget::Compact => vec![run_stage(&config, StageKind::Compact).await?],
        };
        for report in reports {
            println!("{}", report);
        }
        Ok::<_, anyhow::Error>(())
    })?;

    Ok(())
}

fn list_command(config_path: Option<PathBuf>, kind: StageKind) -> Result<()> {
    let config = load_config(config_path)?;
    config.validate()?;

    let runtime = build_runtime(None)?;
    let keys = runtime.block_on(pipeline::list_stage_keys(&config, kind))?;

    for key in &keys {
        println!("{}", key);
    }
    tracing::info!("{} keys selected for {}", keys.len(), kind);
    Ok(())
}

fn validate_command(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;
    config.validate()?;
    println!("Configuration is valid");
    Ok(())
}

fn generate_config_command(output: PathBuf) -> Result<()> {
    // Generate a commented YAML config
    let yaml = r#"# Textflow Pipeline Configuration
#
# Every value below is a default. Environment variables override the file:
#   RAW_BUCKET, S3_INPUT_PREFIX, PROCESSED_BUCKET, PREPROC_BUCKET, PREPROC_PREFIX,
#   MAX_PREPROC_CHARS, S3_OUTPUT_PREFIX, SUMMARIZER_URL, SUM_MAX_LEN, SUM_MIN_LEN,
#   COMPACT_PREFIX, COMPACT_MAX_FILES

# === STORAGE: Where buckets live ===
storage:
  # AWS region (null = from environment)
  # region: "us-east-1"

  # Custom S3 endpoint (for LocalStack, MinIO, etc.)
  # endpoint_url: "http://localhost:4566"

  # Allow plain HTTP to a custom endpoint
  allow_http: false

  # Use a local directory instead of S3; each bucket is a subdirectory
  # local_root: "/tmp/textflow"

# === PREPROCESS: raw -> normalized text ===
preprocess:
  source_bucket: "your-raw-bucket"
  source_prefix: "raw/"
  dest_bucket: "your-processed-bucket"
  dest_prefix: "preprocessed/"
  suffix: ".txt"

  # Characters kept after whitespace normalization
  max_chars: 8000

# === SUMMARIZE: normalized text -> summaries ===
summarize:
  source_bucket: "your-processed-bucket"
  source_prefix: "preprocessed/"
  dest_bucket: "your-processed-bucket"
  dest_prefix: "processed/"
  suffix: ".txt"

  # Summarization endpoint (Hugging Face inference API shape)
  endpoint: "http://localhost:8080/summarize"

  # Environment variable holding a bearer token (optional)
  # api_token_env: "HF_API_TOKEN"

  max_length: 128
  min_length: 30

  # Input characters sent to the model (null = unbounded)
  max_input_chars: 100000

  request_timeout_secs: 120

# === COMPACT: summaries -> one gzip archive per day ===
compact:
  bucket: "your-processed-bucket"
  source_prefix: "processed/"
  compact_prefix: "compact/"
  suffix: ".txt"

  # Ceiling on files per archive
  max_files: 5000

# === PROCESSING: Performance tuning ===
processing:
  # Keys transformed concurrently
  concurrency: 16

  # Keys per listing request (max 1000)
  page_size: 1000

  # fail_fast: first failing key aborts the stage, no manifest is written
  # skip_and_record: failures are listed in the manifest, the stage completes
  failure_policy: fail_fast

  # Tokio async worker threads (null = num CPUs)
  # worker_threads: 8

  # Print throughput metrics during processing
  enable_metrics: true

  # Metrics reporting interval in seconds
  metrics_interval_secs: 10

  # Save per-stage metrics JSON (stage name is appended)
  # metrics_output_path: "metrics.json"
"#;

    std::fs::write(&output, yaml)?;
    println!("Generated sample configuration at: {}", output.display());

    Ok(())
}
