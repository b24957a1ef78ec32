//! Run manifests for the transform stages.

use crate::io::Bucket;
use crate::pipeline::TransformResult;
use anyhow::{Context, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Audit sub-prefix under a stage's destination prefix.
pub const AUDIT_DIR: &str = "_audit";

/// A key that failed under the skip-and-record policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyFailure {
    pub key: String,
    pub error: String,
}

/// Manifest of one transform stage run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunManifest {
    pub count: usize,
    pub items: Vec<TransformResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<KeyFailure>,
}

impl RunManifest {
    pub fn new(items: Vec<TransformResult>, failures: Vec<KeyFailure>) -> Self {
        Self {
            count: items.len(),
            items,
            failures,
        }
    }
}

/// Run timestamp used in manifest names, `YYYYMMDDTHHMMSSZ`.
pub fn run_stamp(now: DateTime<Utc>) -> String {
    now.format("%Y%m%dT%H%M%SZ").to_string()
}

/// `{prefix}/_audit/{name}_{stamp}.json`
pub fn audit_key(prefix: &str, name: &str, stamp: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        format!("{}/{}_{}.json", AUDIT_DIR, name, stamp)
    } else {
        format!("{}/{}/{}_{}.json", prefix, AUDIT_DIR, name, stamp)
    }
}

/// Writes JSON manifests to a bucket.
#[derive(Debug, Clone)]
pub struct AuditWriter {
    bucket: Bucket,
    prefix: String,
}

impl AuditWriter {
    pub fn new(bucket: Bucket, prefix: impl Into<String>) -> Self {
        Self {
            bucket,
            prefix: prefix.into(),
        }
    }

    /// Write a manifest for `stage`, stamped with the current time.
    pub async fn report(&self, stage: &str, manifest: &RunManifest) -> Result<String> {
        self.report_at(stage, manifest, Utc::now()).await
    }

    /// Write a manifest for `stage`, stamped with `now`. Returns its location.
    pub async fn report_at(
        &self,
        stage: &str,
        manifest: &RunManifest,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let key = audit_key(&self.prefix, stage, &run_stamp(now));
        self.write_json(&key, manifest).await?;

        let location = self.bucket.location(&key);
        tracing::info!("Wrote {} manifest ({} items) to {}", stage, manifest.count, location);
        Ok(location)
    }

    /// Serialize `value` and write it to `key` as `application/json`.
    pub async fn write_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let body = serde_json::to_vec(value).context("Failed to serialize manifest")?;
        self.bucket
            .put(key, Bytes::from(body), "application/json", &BTreeMap::new())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use object_store::memory::InMemory;
    use std::sync::Arc;

    fn results(n: usize) -> Vec<TransformResult> {
        (0..n)
            .map(|i| TransformResult {
                in_key: format!("raw/{}.txt", i),
                out_key: format!("preprocessed/{}.txt", i),
            })
            .collect()
    }

    #[test]
    fn test_run_stamp_format() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(run_stamp(now), "20240309T070501Z");
    }

    #[test]
    fn test_audit_key() {
        assert_eq!(
            audit_key("preprocessed/", "ingest_preprocess", "20240309T070501Z"),
            "preprocessed/_audit/ingest_preprocess_20240309T070501Z.json"
        );
        assert_eq!(audit_key("processed", "summarize", "S"), "processed/_audit/summarize_S.json");
        assert_eq!(audit_key("", "summarize", "S"), "_audit/summarize_S.json");
    }

    #[test]
    fn test_manifest_json_shape() {
        let manifest = RunManifest::new(results(1), Vec::new());
        let json = serde_json::to_value(&manifest).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "count": 1,
                "items": [{"in_key": "raw/0.txt", "out_key": "preprocessed/0.txt"}]
            })
        );
    }

    #[tokio::test]
    async fn test_report_accuracy() {
        let bucket = Bucket::new("processed-bucket", Arc::new(InMemory::new()));
        let writer = AuditWriter::new(bucket.clone(), "preprocessed/");
        let items = results(5);
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();

        let location = writer
            .report_at("ingest_preprocess", &RunManifest::new(items.clone(), Vec::new()), now)
            .await
            .unwrap();
        assert_eq!(
            location,
            "s3://processed-bucket/preprocessed/_audit/ingest_preprocess_20240102T030405Z.json"
        );

        let stored = bucket
            .get_object("preprocessed/_audit/ingest_preprocess_20240102T030405Z.json")
            .await
            .unwrap();
        assert_eq!(stored.content_type.as_deref(), Some("application/json"));

        let manifest: RunManifest = serde_json::from_slice(&stored.body).unwrap();
        assert_eq!(manifest.count, 5);
        assert_eq!(manifest.items, items);
        assert!(manifest.failures.is_empty());
    }

    #[tokio::test]
    async fn test_report_records_failures() {
        let bucket = Bucket::new("b", Arc::new(InMemory::new()));
        let writer = AuditWriter::new(bucket.clone(), "processed/");
        let failures = vec![KeyFailure {
            key: "preprocessed/bad.txt".to_string(),
            error: "timeout".to_string(),
        }];
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();

        writer
            .report_at("summarize", &RunManifest::new(results(2), failures.clone()), now)
            .await
            .unwrap();

        let body = bucket
            .get("processed/_audit/summarize_20240102T030405Z.json")
            .await
            .unwrap();
        let manifest: RunManifest = serde_json::from_slice(&body).unwrap();
        assert_eq!(manifest.count, 2);
        assert_eq!(manifest.failures, failures);
    }
}
