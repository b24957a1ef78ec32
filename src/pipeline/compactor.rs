//! Daily compaction of stage outputs into one gzip archive.
//!
//! Bodies are streamed chunk by chunk into a single gzip encoder running on a
//! blocking thread, so resident memory is a few in-flight chunks plus the
//! compressed output, never the sum of all inputs.

use crate::io::Bucket;
use crate::pipeline::audit::{audit_key, run_stamp, AuditWriter};
use crate::pipeline::Metrics;
use anyhow::{Context, Result};
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

/// Chunks buffered between the readers and the encoder.
const CHUNK_BUFFER: usize = 16;

/// Manifest of one compaction run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactManifest {
    /// UTC date of the run, `YYYYMMDD`
    pub date: String,
    pub count: usize,
    /// Archive key (without bucket)
    pub compact_key: String,
    pub files: Vec<String>,
}

/// Where the archive and manifest ended up.
#[derive(Debug, Clone)]
pub struct CompactOutcome {
    pub archive_location: String,
    pub manifest_location: String,
    pub files_compacted: usize,
    pub archive_bytes: u64,
}

/// `{compact_prefix}/summaries_{YYYYMMDD}.txt.gz`
pub fn archive_key(compact_prefix: &str, date: &str) -> String {
    let prefix = compact_prefix.trim_end_matches('/');
    if prefix.is_empty() {
        format!("summaries_{}.txt.gz", date)
    } else {
        format!("{}/summaries_{}.txt.gz", prefix, date)
    }
}

/// Builds the daily archive and its manifest.
pub struct Compactor {
    bucket: Bucket,
    source_prefix: String,
    compact_prefix: String,
    metrics: Arc<Metrics>,
}

impl Compactor {
    pub fn new(
        bucket: Bucket,
        source_prefix: impl Into<String>,
        compact_prefix: impl Into<String>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            bucket,
            source_prefix: source_prefix.into(),
            compact_prefix: compact_prefix.into(),
            metrics,
        }
    }

    /// Compact `keys` into today's archive.
    pub async fn compact(&self, keys: &[String]) -> Result<CompactOutcome> {
        self.compact_at(keys, Utc::now()).await
    }

    /// Compact `keys` into the archive for `now`'s UTC date.
    ///
    /// Re-running on the same date replaces the archive; each run still gets
    /// its own manifest.
    pub async fn compact_at(&self, keys: &[String], now: DateTime<Utc>) -> Result<CompactOutcome> {
        let date = now.format("%Y%m%d").to_string();
        let compact_key = archive_key(&self.compact_prefix, &date);

        let archive = self.build_archive(keys).await?;
        let archive_bytes = archive.len() as u64;
        self.metrics.set_archive_bytes(archive_bytes);

        if self.bucket.exists(&compact_key).await? {
            tracing::warn!(
                "Replacing existing archive {}",
                self.bucket.location(&compact_key)
            );
        }

        let mut metadata = BTreeMap::new();
        metadata.insert("files_compacted".to_string(), keys.len().to_string());
        metadata.insert(
            "generated_at".to_string(),
            now.to_rfc3339_opts(SecondsFormat::Micros, false),
        );

        let write_start = Instant::now();
        self.bucket
            .put(&compact_key, archive, "application/gzip", &metadata)
            .await?;
        self.metrics.add_write_time(write_start.elapsed());
        self.metrics.add_bytes_written(archive_bytes);

        let archive_location = self.bucket.location(&compact_key);
        tracing::info!(
            "Compacted {} files into {} ({} bytes)",
            keys.len(),
            archive_location,
            archive_bytes
        );

        let manifest = CompactManifest {
            date,
            count: keys.len(),
            compact_key,
            files: keys.to_vec(),
        };
        let manifest_key = audit_key(&self.source_prefix, "manifest", &run_stamp(now));
        AuditWriter::new(self.bucket.clone(), self.source_prefix.clone())
            .write_json(&manifest_key, &manifest)
            .await?;
        let manifest_location = self.bucket.location(&manifest_key);
        tracing::info!("Wrote compaction manifest to {}", manifest_location);

        Ok(CompactOutcome {
            archive_location,
            manifest_location,
            files_compacted: keys.len(),
            archive_bytes,
        })
    }

    /// Stream every body, newline-terminated, through one gzip encoder.
    async fn build_archive(&self, keys: &[String]) -> Result<Bytes> {
        let (tx, mut rx) = mpsc::channel::<Bytes>(CHUNK_BUFFER);

        let encoder = tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            while let Some(chunk) = rx.blocking_recv() {
                encoder
                    .write_all(&chunk)
                    .context("Failed to compress archive chunk")?;
            }
            encoder.finish().context("Failed to finalize gzip stream")
        });

        let fed = self.feed_archive(keys, &tx).await;
        drop(tx);

        let compressed = encoder.await.context("Compression task panicked")??;
        fed?;
        Ok(Bytes::from(compressed))
    }

    /// Send every body to the encoder, each followed by a newline.
    async fn feed_archive(&self, keys: &[String], tx: &mpsc::Sender<Bytes>) -> Result<()> {
        for key in keys {
            let read_start = Instant::now();
            let mut body = self.bucket.get_stream(key).await?;
            let mut size = 0u64;

            while let Some(chunk) = body.next().await {
                let chunk = chunk?;
                size += chunk.len() as u64;
                send_chunk(tx, chunk).await?;
            }
            send_chunk(tx, Bytes::from_static(b"\n")).await?;

            self.metrics.add_read_time(read_start.elapsed());
            self.metrics.add_bytes_read(size);
            self.metrics.add_object_processed();
            tracing::debug!("Appended {} ({} bytes)", key, size);
        }
        Ok(())
    }
}

async fn send_chunk(tx: &mpsc::Sender<Bytes>, chunk: Bytes) -> Result<()> {
    tx.send(chunk)
        .await
        .map_err(|_| anyhow::anyhow!("Compression task stopped early"))
}
