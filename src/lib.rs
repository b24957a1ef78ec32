//! Textflow Pipeline
//!
//! Batch ETL over object storage: raw text documents are normalized,
//! summarized by an external model endpoint, and compacted into one gzip
//! archive per day.
//!
//! # Architecture
//!
//! The pipeline consists of:
//!
//! - **I/O**: Bucket handles over `object_store` (S3 or local disk)
//! - **Transform**: Text normalization and HTTP summarization
//! - **Pipeline**: Paginated enumeration, bounded fan-out, run manifests and compaction
//!
//! # Usage
//!
//! ```no_run
//! use textflow::{run_all, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = Config::from_file(&"config.yaml".into())?;
//!     config.apply_env_overrides()?;
//!     run_all(&config).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod io;
pub mod pipeline;
pub mod transform;

pub use config::{Config, FailurePolicy};
pub use io::{open_bucket, Bucket};
pub use pipeline::{Metrics, StageKind, StageReport};
pub use transform::{DocumentTransform, HttpSummarizer, Normalizer};

use anyhow::Result;
use pipeline::{CompactStage, TransformStage};
use std::sync::Arc;

/// Run a single stage with the given configuration.
pub async fn run_stage(config: &Config, kind: StageKind) -> Result<StageReport> {
    config.validate()?;

    tracing::info!("Starting stage {}", kind);

    let report = match kind {
        StageKind::Preprocess => {
            let stage = TransformStage::preprocess(config)?;
            let transform = Arc::new(Normalizer::new(config.preprocess.max_chars));
            pipeline::run_transform_stage(stage, transform, &config.processing).await?
        }
        StageKind::Summarize => {
            let stage = TransformStage::summarize(config)?;
            let transform = Arc::new(HttpSummarizer::from_config(&config.summarize)?);
            pipeline::run_transform_stage(stage, transform, &config.processing).await?
        }
        StageKind::Compact => {
            let stage = CompactStage::from_config(config)?;
            pipeline::run_compact_stage(stage, &config.processing).await?
        }
    };

    tracing::info!("Stage complete: {}", report);
    Ok(report)
}

/// Run every stage in order, stopping at the first failure.
pub async fn run_all(config: &Config) -> Result<Vec<StageReport>> {
    let mut reports = Vec::with_capacity(StageKind::ALL.len());
    for kind in StageKind::ALL {
        reports.push(run_stage(config, kind).await?);
    }
    Ok(reports)
}

/// Build a Tokio runtime with the specified configuration.
pub fn build_runtime(worker_threads: Option<usize>) -> Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();

    if let Some(threads) = worker_threads {
        builder.worker_threads(threads);
    }

    builder.enable_all();

    Ok(builder.build()?)
}
