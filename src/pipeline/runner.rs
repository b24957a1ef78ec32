//! Per-key read, transform, write.

use crate::io::Bucket;
use crate::pipeline::Metrics;
use crate::transform::{Document, DocumentTransform};
use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// One processed input and the key it was written to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformResult {
    pub in_key: String,
    pub out_key: String,
}

/// Map an input key to its output key.
///
/// The first occurrence of `source_prefix` is replaced by `dest_prefix`. The
/// result depends on nothing else, so a re-run targets the same object.
pub fn derive_output_key(key: &str, source_prefix: &str, dest_prefix: &str) -> String {
    match key.strip_prefix(source_prefix) {
        Some(rest) => format!("{}{}", dest_prefix, rest),
        None => key.replacen(source_prefix, dest_prefix, 1),
    }
}

/// Where a runner reads from and writes to.
#[derive(Debug, Clone)]
pub struct RunnerTarget {
    pub source: Bucket,
    pub source_prefix: String,
    pub dest: Bucket,
    pub dest_prefix: String,
    /// Metadata field stamped with the processing time
    pub timestamp_field: String,
    pub content_type: String,
}

/// Applies a transform to single keys.
pub struct TransformRunner {
    target: RunnerTarget,
    transform: Arc<dyn DocumentTransform>,
    metrics: Arc<Metrics>,
}

impl TransformRunner {
    pub fn new(
        target: RunnerTarget,
        transform: Arc<dyn DocumentTransform>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            target,
            transform,
            metrics,
        }
    }

    pub fn target(&self) -> &RunnerTarget {
        &self.target
    }

    /// Output key for `key` under this runner's prefixes.
    pub fn output_key(&self, key: &str) -> String {
        derive_output_key(key, &self.target.source_prefix, &self.target.dest_prefix)
    }

    /// Read `key`, transform it, and write the output object.
    ///
    /// Nothing is written unless the read and the transform both succeed.
    pub async fn apply(&self, key: &str) -> Result<TransformResult> {
        let out_key = self.output_key(key);

        let read_start = Instant::now();
        let body = self.target.source.get(key).await?;
        self.metrics.add_read_time(read_start.elapsed());
        self.metrics.add_bytes_read(body.len() as u64);

        let transform_start = Instant::now();
        let output = self
            .transform
            .transform(Document::new(body))
            .await
            .with_context(|| format!("{} failed for {}", self.transform.name(), key))?;
        self.metrics.add_transform_time(transform_start.elapsed());

        let mut metadata = output.metadata;
        metadata.insert("source_bucket".to_string(), self.target.source.name().to_string());
        metadata.insert("source_key".to_string(), key.to_string());
        metadata.insert(
            self.target.timestamp_field.clone(),
            Utc::now().naive_utc().format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
        );

        let bytes_written = output.body.len() as u64;
        let write_start = Instant::now();
        self.target
            .dest
            .put(&out_key, output.body, &self.target.content_type, &metadata)
            .await?;
        self.metrics.add_write_time(write_start.elapsed());
        self.metrics.add_bytes_written(bytes_written);
        self.metrics.add_object_processed();

        tracing::debug!("{} -> {}", key, self.target.dest.location(&out_key));

        Ok(TransformResult {
            in_key: key.to_string(),
            out_key,
        })
    }
}
