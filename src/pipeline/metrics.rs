//! Throughput monitoring and metrics collection.

use serde::{Serialize, Serializer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::interval;

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Metrics for one stage run.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Listing pages requested
    pub pages_listed: AtomicU64,

    /// Listing entries seen, before filtering
    pub objects_listed: AtomicU64,

    /// Keys that passed the selection filter
    pub keys_selected: AtomicU64,

    /// Keys transformed and written
    pub objects_processed: AtomicU64,

    /// Keys that failed
    pub objects_failed: AtomicU64,

    /// Total bytes read from the store
    pub bytes_read: AtomicU64,

    /// Total bytes written to the store
    pub bytes_written: AtomicU64,

    /// Compressed archive size
    pub archive_bytes: AtomicU64,

    /// Start time
    start_time: Option<Instant>,

    // Per-phase timing (in microseconds for precision)
    /// Time spent reading objects (microseconds)
    pub read_us: AtomicU64,

    /// Time spent in transforms (microseconds)
    pub transform_us: AtomicU64,

    /// Time spent writing objects (microseconds)
    pub write_us: AtomicU64,
}

impl Metrics {
    /// Create new metrics.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        })
    }

    /// Record a listing page request.
    pub fn add_page_listed(&self, entries: u64) {
        self.pages_listed.fetch_add(1, Ordering::Relaxed);
        self.objects_listed.fetch_add(entries, Ordering::Relaxed);
    }

    /// Record a selected key.
    pub fn add_key_selected(&self) {
        self.keys_selected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a processed object.
    pub fn add_object_processed(&self) {
        self.objects_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed object.
    pub fn add_failure(&self) {
        self.objects_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record bytes read.
    pub fn add_bytes_read(&self, bytes: u64) {
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record bytes written.
    pub fn add_bytes_written(&self, bytes: u64) {
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Set the compressed archive size.
    pub fn set_archive_bytes(&self, bytes: u64) {
        self.archive_bytes.store(bytes, Ordering::Relaxed);
    }

    /// Record time spent reading (in microseconds).
    pub fn add_read_time(&self, duration: Duration) {
        self.read_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record time spent transforming (in microseconds).
    pub fn add_transform_time(&self, duration: Duration) {
        self.transform_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record time spent writing (in microseconds).
    pub fn add_write_time(&self, duration: Duration) {
        self.write_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Get elapsed time since start.
    pub fn elapsed(&self) -> Duration {
        self.start_time.map_or(Duration::ZERO, |t| t.elapsed())
    }

    /// Get objects processed per second.
    pub fn objects_per_second(&self) -> f64 {
        let objects = self.objects_processed.load(Ordering::Relaxed);
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            objects as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            pages_listed: self.pages_listed.load(Ordering::Relaxed),
            objects_listed: self.objects_listed.load(Ordering::Relaxed),
            keys_selected: self.keys_selected.load(Ordering::Relaxed),
            objects_processed: self.objects_processed.load(Ordering::Relaxed),
            objects_failed: self.objects_failed.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            archive_bytes: self.archive_bytes.load(Ordering::Relaxed),
            elapsed: self.elapsed(),
            objects_per_second: self.objects_per_second(),
            read_secs: self.read_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            transform_secs: self.transform_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            write_secs: self.write_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub pages_listed: u64,
    pub objects_listed: u64,
    pub keys_selected: u64,
    pub objects_processed: u64,
    pub objects_failed: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub archive_bytes: u64,
    #[serde(serialize_with = "serialize_duration")]
    pub elapsed: Duration,
    pub objects_per_second: f64,
    /// Total time spent reading (seconds, summed across tasks)
    pub read_secs: f64,
    /// Total time spent in transforms (seconds, summed across tasks)
    pub transform_secs: f64,
    /// Total time spent writing (seconds, summed across tasks)
    pub write_secs: f64,
}

impl MetricsSnapshot {
    /// Save metrics to a JSON file.
    pub fn save_to_file(&self, path: &str) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!("Metrics saved to {}", path);
        Ok(())
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let total = self.read_secs + self.transform_secs + self.write_secs;
        let (read_pct, transform_pct, write_pct) = if total > 0.0 {
            (
                self.read_secs / total * 100.0,
                self.transform_secs / total * 100.0,
                self.write_secs / total * 100.0,
            )
        } else {
            (0.0, 0.0, 0.0)
        };

        write!(
            f,
            "Objects: {} processed, {} failed | Selected: {} of {} listed ({} pages) | \
             Read: {:.2} MB | Write: {:.2} MB | Rate: {:.1} objects/s | Elapsed: {:.1}s | \
             Time: read {:.0}% | transform {:.0}% | write {:.0}%",
            self.objects_processed,
            self.objects_failed,
            self.keys_selected,
            self.objects_listed,
            self.pages_listed,
            self.bytes_read as f64 / (1024.0 * 1024.0),
            self.bytes_written as f64 / (1024.0 * 1024.0),
            self.objects_per_second,
            self.elapsed.as_secs_f64(),
            read_pct,
            transform_pct,
            write_pct,
        )
    }
}

/// Periodic metrics reporter.
pub struct MetricsReporter {
    metrics: Arc<Metrics>,
    interval_secs: u64,
    total_objects: u64,
}

impl MetricsReporter {
    /// Create a new metrics reporter.
    pub fn new(metrics: Arc<Metrics>, interval_secs: u64, total_objects: u64) -> Self {
        Self {
            metrics,
            interval_secs,
            total_objects,
        }
    }

    /// Start the periodic reporter.
    pub async fn run(self, mut shutdown: mpsc::Receiver<()>) {
        let mut ticker = interval(Duration::from_secs(self.interval_secs.max(1)));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let snapshot = self.metrics.snapshot();
                    let progress = if self.total_objects > 0 {
                        (snapshot.objects_processed + snapshot.objects_failed) as f64
                            / self.total_objects as f64
                            * 100.0
                    } else {
                        0.0
                    };

                    tracing::info!("[{:.1}%] {}", progress, snapshot);
                }
                _ = shutdown.recv() => {
                    let snapshot = self.metrics.snapshot();
                    tracing::info!("Final: {}", snapshot);
                    break;
                }
            }
        }
    }

    /// Print a final summary.
    pub fn print_summary(&self) {
        let snapshot = self.metrics.snapshot();

        println!("\n=== Stage Summary ===");
        println!("Total time: {:.1}s", snapshot.elapsed.as_secs_f64());
        println!("Pages listed: {}", snapshot.pages_listed);
        println!("Objects listed: {}", snapshot.objects_listed);
        println!("Keys selected: {}", snapshot.keys_selected);
        println!("Objects processed: {}", snapshot.objects_processed);
        println!("Objects failed: {}", snapshot.objects_failed);
        println!("Data read: {:.2} MB", snapshot.bytes_read as f64 / (1024.0 * 1024.0));
        println!("Data written: {:.2} MB", snapshot.bytes_written as f64 / (1024.0 * 1024.0));
        if snapshot.archive_bytes > 0 {
            println!("Archive size: {:.2} MB", snapshot.archive_bytes as f64 / (1024.0 * 1024.0));
        }
        println!("Processing rate: {:.1} objects/s", snapshot.objects_per_second);
        println!("=====================\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_increment() {
        let metrics = Metrics::new();

        metrics.add_bytes_read(1000);
        metrics.add_bytes_read(500);

        assert_eq!(metrics.bytes_read.load(Ordering::Relaxed), 1500);
    }

    #[test]
    fn test_all_counters() {
        let metrics = Metrics::new();

        metrics.add_page_listed(10);
        metrics.add_page_listed(3);
        metrics.add_key_selected();
        metrics.add_key_selected();
        metrics.add_object_processed();
        metrics.add_failure();
        metrics.add_bytes_read(1024);
        metrics.add_bytes_written(2048);
        metrics.set_archive_bytes(512);

        let snapshot = metrics.snapshot();

        assert_eq!(snapshot.pages_listed, 2);
        assert_eq!(snapshot.objects_listed, 13);
        assert_eq!(snapshot.keys_selected, 2);
        assert_eq!(snapshot.objects_processed, 1);
        assert_eq!(snapshot.objects_failed, 1);
        assert_eq!(snapshot.bytes_read, 1024);
        assert_eq!(snapshot.bytes_written, 2048);
        assert_eq!(snapshot.archive_bytes, 512);
    }

    #[test]
    fn test_timing_metrics() {
        let metrics = Metrics::new();

        metrics.add_read_time(Duration::from_millis(100));
        metrics.add_transform_time(Duration::from_millis(50));
        metrics.add_write_time(Duration::from_millis(25));

        let snapshot = metrics.snapshot();

        assert!((snapshot.read_secs - 0.1).abs() < 0.001);
        assert!((snapshot.transform_secs - 0.05).abs() < 0.001);
        assert!((snapshot.write_secs - 0.025).abs() < 0.001);
    }

    #[test]
    fn test_snapshot_display() {
        let metrics = Metrics::new();
        metrics.add_page_listed(40);
        for _ in 0..12 {
            metrics.add_key_selected();
        }
        for _ in 0..10 {
            metrics.add_object_processed();
        }
        metrics.add_failure();
        metrics.add_failure();

        let display = format!("{}", metrics.snapshot());

        assert!(display.contains("10 processed"));
        assert!(display.contains("2 failed"));
        assert!(display.contains("12 of 40 listed"));
    }

    #[test]
    fn test_snapshot_serializes_elapsed_as_seconds() {
        let metrics = Metrics::new();
        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert!(json["elapsed"].is_f64());
    }

    #[test]
    fn test_zero_elapsed_no_panic() {
        let metrics = Metrics {
            start_time: None,
            ..Default::default()
        };

        metrics.add_object_processed();

        assert_eq!(metrics.objects_per_second(), 0.0);
    }

    #[test]
    fn test_metrics_reporter_new() {
        let metrics = Metrics::new();
        let reporter = MetricsReporter::new(metrics, 10, 1000);

        assert_eq!(reporter.interval_secs, 10);
        assert_eq!(reporter.total_objects, 1000);
    }
}
