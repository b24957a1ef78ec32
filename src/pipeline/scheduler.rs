//! Fan-out of the transform runner over a key set.
//!
//! Keys are processed with bounded concurrency; results come back in the
//! order of the input keys.

use crate::config::FailurePolicy;
use crate::pipeline::audit::KeyFailure;
use crate::pipeline::{Metrics, MetricsReporter, TransformResult, TransformRunner};
use anyhow::Result;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Configuration for the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of keys in flight
    pub concurrency: usize,

    /// Per-key failure handling
    pub failure_policy: FailurePolicy,

    /// Enable progress reporting
    pub enable_metrics: bool,

    /// Metrics reporting interval in seconds
    pub metrics_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: 16,
            failure_policy: FailurePolicy::FailFast,
            enable_metrics: true,
            metrics_interval_secs: 10,
        }
    }
}

/// Collected results of one fan-out.
#[derive(Debug, Default)]
pub struct FanOutResult {
    /// Successful keys, in input order
    pub results: Vec<TransformResult>,

    /// Failed keys (skip-and-record only)
    pub failures: Vec<KeyFailure>,
}

/// Scheduler for distributing keys across async tasks.
pub struct Scheduler {
    runner: Arc<TransformRunner>,
    metrics: Arc<Metrics>,
    config: SchedulerConfig,
}

impl Scheduler {
    /// Create a new scheduler.
    pub fn new(runner: Arc<TransformRunner>, metrics: Arc<Metrics>, config: SchedulerConfig) -> Self {
        Self {
            runner,
            metrics,
            config,
        }
    }

    /// Run the transform over every key and join the results.
    pub async fn run(&self, keys: Vec<String>) -> Result<FanOutResult> {
        let total_keys = keys.len();

        tracing::info!(
            "Scheduling {} keys for processing ({} concurrent)",
            total_keys,
            self.config.concurrency
        );

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let reporter_handle = if self.config.enable_metrics && total_keys > 0 {
            let reporter = MetricsReporter::new(
                self.metrics.clone(),
                self.config.metrics_interval_secs,
                total_keys as u64,
            );
            Some(tokio::spawn(reporter.run(shutdown_rx)))
        } else {
            drop(shutdown_rx);
            None
        };

        let outcome = match self.config.failure_policy {
            FailurePolicy::FailFast => self.run_fail_fast(keys).await,
            FailurePolicy::SkipAndRecord => Ok(self.run_skip_and_record(keys).await),
        };

        let _ = shutdown_tx.send(()).await;
        if let Some(handle) = reporter_handle {
            let _ = handle.await;
        }

        outcome
    }

    /// Stop at the first failing key. Outputs already written stay in place.
    async fn run_fail_fast(&self, keys: Vec<String>) -> Result<FanOutResult> {
        let runner = self.runner.clone();
        let metrics = self.metrics.clone();

        let results: Vec<TransformResult> = stream::iter(keys)
            .map(|key| {
                let runner = runner.clone();
                let metrics = metrics.clone();
                async move {
                    runner.apply(&key).await.inspect_err(|e| {
                        metrics.add_failure();
                        tracing::error!("Key {} failed: {:#}", key, e);
                    })
                }
            })
            .buffered(self.config.concurrency)
            .try_collect()
            .await?;

        Ok(FanOutResult {
            results,
            failures: Vec::new(),
        })
    }

    /// Process every key, recording failures instead of aborting.
    async fn run_skip_and_record(&self, keys: Vec<String>) -> FanOutResult {
        let runner = self.runner.clone();

        let outcomes: Vec<(String, Result<TransformResult>)> = stream::iter(keys)
            .map(|key| {
                let runner = runner.clone();
                async move {
                    let result = runner.apply(&key).await;
                    (key, result)
                }
            })
            .buffered(self.config.concurrency)
            .collect()
            .await;

        let mut fan_out = FanOutResult::default();
        for (key, outcome) in outcomes {
            match outcome {
                Ok(result) => fan_out.results.push(result),
                Err(e) => {
                    self.metrics.add_failure();
                    tracing::warn!("Skipping {}: {:#}", key, e);
                    fan_out.failures.push(KeyFailure {
                        key,
                        error: format!("{:#}", e),
                    });
                }
            }
        }
        fan_out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::Bucket;
    use crate::pipeline::RunnerTarget;
    use crate::transform::{Document, DocumentTransform};
    use async_trait::async_trait;
    use bytes::Bytes;
    use object_store::memory::InMemory;
    use std::collections::BTreeMap;
    use std::time::Duration;

    /// Uppercases bodies; rejects bodies containing "poison".
    /// Sleeps longer for earlier keys so completion order differs from input order.
    struct Shout;

    #[async_trait]
    impl DocumentTransform for Shout {
        fn name(&self) -> &str {
            "shout"
        }

        async fn transform(&self, input: Document) -> Result<Document> {
            let text = String::from_utf8_lossy(&input.body).to_string();
            if text.contains("poison") {
                anyhow::bail!("poisoned document");
            }
            let delay = 30u64.saturating_sub(text.len() as u64);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(Document::new(text.to_uppercase()))
        }
    }

    async fn runner_with(objects: &[(&str, &str)]) -> (Arc<TransformRunner>, Bucket) {
        let bucket = Bucket::new("b", Arc::new(InMemory::new()));
        for (key, body) in objects {
            bucket
                .put(key, Bytes::from(body.to_string()), "text/plain", &BTreeMap::new())
                .await
                .unwrap();
        }
        let target = RunnerTarget {
            source: bucket.clone(),
            source_prefix: "in/".to_string(),
            dest: bucket.clone(),
            dest_prefix: "out/".to_string(),
            timestamp_field: "processed_at".to_string(),
            content_type: "text/plain".to_string(),
        };
        let runner = Arc::new(TransformRunner::new(target, Arc::new(Shout), Metrics::new()));
        (runner, bucket)
    }

    fn config(policy: FailurePolicy) -> SchedulerConfig {
        SchedulerConfig {
            concurrency: 4,
            failure_policy: policy,
            enable_metrics: false,
            metrics_interval_secs: 1,
        }
    }

    #[test]
    fn test_scheduler_config_default() {
        let config = SchedulerConfig::default();
        assert_eq!(config.concurrency, 16);
        assert_eq!(config.failure_policy, FailurePolicy::FailFast);
        assert!(config.enable_metrics);
    }

    #[tokio::test]
    async fn test_results_keep_input_order() {
        let (runner, bucket) =
            runner_with(&[("in/1.txt", "a"), ("in/2.txt", "bbbbbbbbbbbb"), ("in/3.txt", "cc")]).await;
        let scheduler = Scheduler::new(runner, Metrics::new(), config(FailurePolicy::FailFast));

        let keys: Vec<String> = vec!["in/1.txt".into(), "in/2.txt".into(), "in/3.txt".into()];
        let fan_out = scheduler.run(keys.clone()).await.unwrap();

        let in_keys: Vec<_> = fan_out.results.iter().map(|r| r.in_key.clone()).collect();
        assert_eq!(in_keys, keys);
        assert_eq!(bucket.get("out/2.txt").await.unwrap().as_ref(), b"BBBBBBBBBBBB");
    }

    #[tokio::test]
    async fn test_fail_fast_aborts() {
        let (runner, _) = runner_with(&[("in/1.txt", "ok"), ("in/2.txt", "poison")]).await;
        let metrics = Metrics::new();
        let scheduler = Scheduler::new(runner, metrics.clone(), config(FailurePolicy::FailFast));

        let err = scheduler
            .run(vec!["in/1.txt".into(), "in/2.txt".into()])
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("poisoned"));
        assert_eq!(metrics.snapshot().objects_failed, 1);
    }

    #[tokio::test]
    async fn test_skip_and_record_isolates_failures() {
        let (runner, bucket) = runner_with(&[
            ("in/1.txt", "ok"),
            ("in/2.txt", "poison"),
            ("in/3.txt", "fine"),
        ])
        .await;
        let scheduler = Scheduler::new(runner, Metrics::new(), config(FailurePolicy::SkipAndRecord));

        let fan_out = scheduler
            .run(vec!["in/1.txt".into(), "in/2.txt".into(), "in/3.txt".into()])
            .await
            .unwrap();

        assert_eq!(fan_out.results.len(), 2);
        assert_eq!(fan_out.failures.len(), 1);
        assert_eq!(fan_out.failures[0].key, "in/2.txt");
        assert!(fan_out.failures[0].error.contains("poisoned"));
        assert!(!bucket.exists("out/2.txt").await.unwrap());
        assert_eq!(bucket.get("out/3.txt").await.unwrap().as_ref(), b"FINE");
    }

    #[tokio::test]
    async fn test_empty_key_set() {
        let (runner, _) = runner_with(&[]).await;
        let scheduler = Scheduler::new(runner, Metrics::new(), SchedulerConfig::default());
        let fan_out = scheduler.run(Vec::new()).await.unwrap();
        assert!(fan_out.results.is_empty());
        assert!(fan_out.failures.is_empty());
    }
}
