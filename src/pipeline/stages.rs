//! The three pipeline stages wired from their parts.
//!
//! ```text
//! preprocess:  raw/          ─▶ Enumerator ─▶ Scheduler(Normalizer)  ─▶ preprocessed/ + _audit
//! summarize:   preprocessed/ ─▶ Enumerator ─▶ Scheduler(Summarizer)  ─▶ processed/    + _audit
//! compact:     processed/    ─▶ Enumerator(max_files) ─▶ Compactor   ─▶ compact/      + _audit
//! ```
//!
//! Stages share nothing but the object store namespace; each one can be run
//! on its own schedule.

use crate::config::{Config, ProcessingConfig};
use crate::io::{open_bucket, Bucket};
use crate::pipeline::audit::{AuditWriter, RunManifest};
use crate::pipeline::{
    Compactor, Enumerator, KeyFilter, Metrics, MetricsReporter, MetricsSnapshot, RunnerTarget,
    Scheduler, SchedulerConfig, TransformRunner,
};
use crate::transform::DocumentTransform;
use anyhow::Result;
use std::sync::Arc;

/// Stage selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Preprocess,
    Summarize,
    Compact,
}

impl StageKind {
    /// All stages in pipeline order.
    pub const ALL: [StageKind; 3] = [StageKind::Preprocess, StageKind::Summarize, StageKind::Compact];

    /// Name used in manifest keys and logs.
    pub fn name(&self) -> &'static str {
        match self {
            StageKind::Preprocess => "ingest_preprocess",
            StageKind::Summarize => "summarize",
            StageKind::Compact => "audit_compact",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A transform stage: where to read, where to write, what to select.
#[derive(Debug, Clone)]
pub struct TransformStage {
    pub kind: StageKind,
    pub target: RunnerTarget,
    pub filter: KeyFilter,
}

impl TransformStage {
    /// Normalization stage from configuration.
    pub fn preprocess(config: &Config) -> Result<Self> {
        let stage = &config.preprocess;
        Ok(Self {
            kind: StageKind::Preprocess,
            target: RunnerTarget {
                source: open_bucket(&stage.source_bucket, &config.storage)?,
                source_prefix: stage.source_prefix.clone(),
                dest: open_bucket(&stage.dest_bucket, &config.storage)?,
                dest_prefix: stage.dest_prefix.clone(),
                timestamp_field: "processed_at".to_string(),
                content_type: "text/plain".to_string(),
            },
            filter: KeyFilter::with_suffix(stage.suffix.clone()),
        })
    }

    /// Summarization stage from configuration.
    pub fn summarize(config: &Config) -> Result<Self> {
        let stage = &config.summarize;
        Ok(Self {
            kind: StageKind::Summarize,
            target: RunnerTarget {
                source: open_bucket(&stage.source_bucket, &config.storage)?,
                source_prefix: stage.source_prefix.clone(),
                dest: open_bucket(&stage.dest_bucket, &config.storage)?,
                dest_prefix: stage.dest_prefix.clone(),
                timestamp_field: "summarized_at".to_string(),
                content_type: "text/plain".to_string(),
            },
            filter: KeyFilter::with_suffix(stage.suffix.clone()),
        })
    }
}

/// The compaction stage.
#[derive(Debug, Clone)]
pub struct CompactStage {
    pub bucket: Bucket,
    pub source_prefix: String,
    pub compact_prefix: String,
    pub filter: KeyFilter,
    pub max_files: usize,
}

impl CompactStage {
    /// Compaction stage from configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let stage = &config.compact;
        Ok(Self {
            bucket: open_bucket(&stage.bucket, &config.storage)?,
            source_prefix: stage.source_prefix.clone(),
            compact_prefix: stage.compact_prefix.clone(),
            filter: KeyFilter::with_suffix(stage.suffix.clone()),
            max_files: stage.max_files,
        })
    }
}

/// Outcome of one stage run.
#[derive(Debug, Clone)]
pub struct StageReport {
    pub stage: StageKind,
    /// Keys the enumerator selected
    pub keys_selected: usize,
    /// Keys written (transform stages) or compacted
    pub processed: usize,
    /// Keys skipped under the skip-and-record policy
    pub failed: usize,
    /// Manifest location (transform stages) or archive location (compaction)
    pub location: String,
    pub metrics: MetricsSnapshot,
}

impl std::fmt::Display for StageReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: selected {}, processed {}, failed {} -> {}",
            self.stage, self.keys_selected, self.processed, self.failed, self.location
        )
    }
}

/// Enumerate, fan out, and write the run manifest.
///
/// Under the fail-fast policy a key failure aborts the stage before the
/// manifest is written.
pub async fn run_transform_stage(
    stage: TransformStage,
    transform: Arc<dyn DocumentTransform>,
    processing: &ProcessingConfig,
) -> Result<StageReport> {
    let metrics = Metrics::new();
    let target = stage.target;

    tracing::info!(
        "Stage {}: {} -> {}",
        stage.kind,
        target.source.location(&target.source_prefix),
        target.dest.location(&target.dest_prefix)
    );

    let enumerator = Enumerator::new(target.source.clone(), processing.page_size, metrics.clone());
    let keys = enumerator.list(&target.source_prefix, &stage.filter).await?;
    let keys_selected = keys.len();

    let audit = AuditWriter::new(target.dest.clone(), target.dest_prefix.clone());
    let runner = Arc::new(TransformRunner::new(target, transform, metrics.clone()));
    let scheduler = Scheduler::new(
        runner,
        metrics.clone(),
        SchedulerConfig {
            concurrency: processing.concurrency,
            failure_policy: processing.failure_policy,
            enable_metrics: processing.enable_metrics,
            metrics_interval_secs: processing.metrics_interval_secs,
        },
    );
    let fan_out = scheduler.run(keys).await?;

    let processed = fan_out.results.len();
    let failed = fan_out.failures.len();
    let manifest = RunManifest::new(fan_out.results, fan_out.failures);
    let location = audit.report(stage.kind.name(), &manifest).await?;

    finish_metrics(stage.kind, &metrics, processing, keys_selected);

    Ok(StageReport {
        stage: stage.kind,
        keys_selected,
        processed,
        failed,
        location,
        metrics: metrics.snapshot(),
    })
}

/// Enumerate up to `max_files` outputs and compact them into today's archive.
pub async fn run_compact_stage(stage: CompactStage, processing: &ProcessingConfig) -> Result<StageReport> {
    let metrics = Metrics::new();

    tracing::info!(
        "Stage {}: {} -> {}",
        StageKind::Compact,
        stage.bucket.location(&stage.source_prefix),
        stage.bucket.location(&stage.compact_prefix)
    );

    let enumerator = Enumerator::new(stage.bucket.clone(), processing.page_size, metrics.clone())
        .with_max_keys(stage.max_files);
    let keys = enumerator.list(&stage.source_prefix, &stage.filter).await?;

    let compactor = Compactor::new(
        stage.bucket,
        stage.source_prefix,
        stage.compact_prefix,
        metrics.clone(),
    );
    let outcome = compactor.compact(&keys).await?;

    finish_metrics(StageKind::Compact, &metrics, processing, keys.len());

    Ok(StageReport {
        stage: StageKind::Compact,
        keys_selected: keys.len(),
        processed: outcome.files_compacted,
        failed: 0,
        location: outcome.archive_location,
        metrics: metrics.snapshot(),
    })
}

/// Dry run: the keys a stage would process right now.
pub async fn list_stage_keys(config: &Config, kind: StageKind) -> Result<Vec<String>> {
    let metrics = Metrics::new();
    let page_size = config.processing.page_size;

    let keys = match kind {
        StageKind::Preprocess | StageKind::Summarize => {
            let stage = if kind == StageKind::Preprocess {
                TransformStage::preprocess(config)?
            } else {
                TransformStage::summarize(config)?
            };
            let enumerator = Enumerator::new(stage.target.source.clone(), page_size, metrics);
            enumerator.list(&stage.target.source_prefix, &stage.filter).await?
        }
        StageKind::Compact => {
            let stage = CompactStage::from_config(config)?;
            let enumerator = Enumerator::new(stage.bucket.clone(), page_size, metrics)
                .with_max_keys(stage.max_files);
            enumerator.list(&stage.source_prefix, &stage.filter).await?
        }
    };
    Ok(keys)
}

fn finish_metrics(kind: StageKind, metrics: &Arc<Metrics>, processing: &ProcessingConfig, total: usize) {
    if !processing.enable_metrics {
        return;
    }

    let reporter = MetricsReporter::new(metrics.clone(), processing.metrics_interval_secs, total as u64);
    reporter.print_summary();

    if let Some(path) = &processing.metrics_output_path {
        let path = stage_metrics_path(path, kind);
        if let Err(e) = metrics.snapshot().save_to_file(&path) {
            tracing::warn!("Failed to save metrics to {}: {}", path, e);
        }
    }
}

/// `metrics.json` -> `metrics_summarize.json`, so stages run together keep separate files.
fn stage_metrics_path(path: &str, kind: StageKind) -> String {
    match path.strip_suffix(".json") {
        Some(stem) => format!("{}_{}.json", stem, kind.name()),
        None => format!("{}_{}", path, kind.name()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names() {
        assert_eq!(StageKind::Preprocess.name(), "ingest_preprocess");
        assert_eq!(StageKind::Summarize.name(), "summarize");
        assert_eq!(StageKind::Compact.to_string(), "audit_compact");
        assert_eq!(StageKind::ALL.len(), 3);
    }

    #[test]
    fn test_stage_metrics_path() {
        assert_eq!(
            stage_metrics_path("out/metrics.json", StageKind::Summarize),
            "out/metrics_summarize.json"
        );
        assert_eq!(
            stage_metrics_path("metrics", StageKind::Compact),
            "metrics_audit_compact"
        );
    }

    #[test]
    fn test_stages_from_config() {
        let root = std::env::temp_dir().join("textflow-stages-test");
        let mut config = Config::default();
        config.storage.local_root = Some(root.to_string_lossy().to_string());

        let preprocess = TransformStage::preprocess(&config).unwrap();
        assert_eq!(preprocess.target.source.name(), "your-raw-bucket");
        assert_eq!(preprocess.target.timestamp_field, "processed_at");
        assert_eq!(preprocess.filter.suffix, ".txt");

        let summarize = TransformStage::summarize(&config).unwrap();
        assert_eq!(summarize.target.source_prefix, "preprocessed/");
        assert_eq!(summarize.target.dest_prefix, "processed/");
        assert_eq!(summarize.target.timestamp_field, "summarized_at");

        let compact = CompactStage::from_config(&config).unwrap();
        assert_eq!(compact.max_files, 5000);
        assert_eq!(compact.compact_prefix, "compact/");
    }
}
