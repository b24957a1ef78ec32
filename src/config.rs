//! Configuration for the textflow pipeline.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration for the pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Object store connection settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Stage 1: raw -> preprocessed
    #[serde(default)]
    pub preprocess: PreprocessConfig,

    /// Stage 2: preprocessed -> processed (summaries)
    #[serde(default)]
    pub summarize: SummarizeConfig,

    /// Stage 3: processed -> daily archive
    #[serde(default)]
    pub compact: CompactConfig,

    /// Processing configuration
    #[serde(default)]
    pub processing: ProcessingConfig,
}

/// Object store connection settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// AWS region. Falls back to the environment when unset.
    #[serde(default)]
    pub region: Option<String>,

    /// Custom S3 endpoint (LocalStack, MinIO, ...)
    #[serde(default)]
    pub endpoint_url: Option<String>,

    /// Allow plain HTTP to the endpoint
    #[serde(default)]
    pub allow_http: bool,

    /// Local directory standing in for S3.
    /// Each bucket becomes a subdirectory of this root.
    #[serde(default)]
    pub local_root: Option<String>,
}

/// Normalization stage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessConfig {
    /// Bucket holding raw documents
    #[serde(default = "default_raw_bucket")]
    pub source_bucket: String,

    /// Prefix of raw documents
    #[serde(default = "default_raw_prefix")]
    pub source_prefix: String,

    /// Bucket receiving normalized documents
    #[serde(default = "default_processed_bucket")]
    pub dest_bucket: String,

    /// Prefix receiving normalized documents
    #[serde(default = "default_preproc_prefix")]
    pub dest_prefix: String,

    /// Only keys ending with this suffix are selected
    #[serde(default = "default_suffix")]
    pub suffix: String,

    /// Maximum characters kept after normalization
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            source_bucket: default_raw_bucket(),
            source_prefix: default_raw_prefix(),
            dest_bucket: default_processed_bucket(),
            dest_prefix: default_preproc_prefix(),
            suffix: default_suffix(),
            max_chars: default_max_chars(),
        }
    }
}

/// Summarization stage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizeConfig {
    /// Bucket holding preprocessed documents
    #[serde(default = "default_processed_bucket")]
    pub source_bucket: String,

    /// Prefix of preprocessed documents
    #[serde(default = "default_preproc_prefix")]
    pub source_prefix: String,

    /// Bucket receiving summaries
    #[serde(default = "default_processed_bucket")]
    pub dest_bucket: String,

    /// Prefix receiving summaries
    #[serde(default = "default_processed_prefix")]
    pub dest_prefix: String,

    /// Only keys ending with this suffix are selected
    #[serde(default = "default_suffix")]
    pub suffix: String,

    /// Summarization model endpoint
    #[serde(default = "default_summarizer_url")]
    pub endpoint: String,

    /// Name of the environment variable holding a bearer token for the endpoint
    #[serde(default)]
    pub api_token_env: Option<String>,

    /// Maximum summary length in model tokens
    #[serde(default = "default_sum_max_len")]
    pub max_length: usize,

    /// Minimum summary length in model tokens
    #[serde(default = "default_sum_min_len")]
    pub min_length: usize,

    /// Input is truncated to this many characters before the model call
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: Option<usize>,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for SummarizeConfig {
    fn default() -> Self {
        Self {
            source_bucket: default_processed_bucket(),
            source_prefix: default_preproc_prefix(),
            dest_bucket: default_processed_bucket(),
            dest_prefix: default_processed_prefix(),
            suffix: default_suffix(),
            endpoint: default_summarizer_url(),
            api_token_env: None,
            max_length: default_sum_max_len(),
            min_length: default_sum_min_len(),
            max_input_chars: default_max_input_chars(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Audit and compaction stage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactConfig {
    /// Bucket holding summaries; the archive is written here too
    #[serde(default = "default_processed_bucket")]
    pub bucket: String,

    /// Prefix of summaries to compact
    #[serde(default = "default_processed_prefix")]
    pub source_prefix: String,

    /// Prefix receiving daily archives
    #[serde(default = "default_compact_prefix")]
    pub compact_prefix: String,

    /// Only keys ending with this suffix are compacted
    #[serde(default = "default_suffix")]
    pub suffix: String,

    /// Safety guard on the number of files per archive
    #[serde(default = "default_compact_max_files")]
    pub max_files: usize,
}

impl Default for CompactConfig {
    fn default() -> Self {
        Self {
            bucket: default_processed_bucket(),
            source_prefix: default_processed_prefix(),
            compact_prefix: default_compact_prefix(),
            suffix: default_suffix(),
            max_files: default_compact_max_files(),
        }
    }
}

/// How a transform stage reacts to a single key failing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// First failing key aborts the stage; no manifest is written.
    #[default]
    FailFast,

    /// Failing keys are recorded in the manifest and the stage completes.
    SkipAndRecord,
}

/// Processing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Number of keys transformed concurrently
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Keys requested per listing page
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Per-key failure handling
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Number of Tokio worker threads
    #[serde(default)]
    pub worker_threads: Option<usize>,

    /// Enable metrics reporting
    #[serde(default = "default_true")]
    pub enable_metrics: bool,

    /// Metrics reporting interval in seconds
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,

    /// Optional path to save metrics JSON after a stage completes
    #[serde(default)]
    pub metrics_output_path: Option<String>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            page_size: default_page_size(),
            failure_policy: FailurePolicy::default(),
            worker_threads: None,
            enable_metrics: true,
            metrics_interval_secs: default_metrics_interval(),
            metrics_output_path: None,
        }
    }
}

/// Largest page a single listing request may ask for (S3 caps `MaxKeys` at 1000).
pub const MAX_PAGE_SIZE: usize = 1000;

impl Config {
    /// Load configuration from a YAML or JSON file.
    /// Format is auto-detected from file extension (.yaml, .yml, or .json).
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config: Config = match ext {
            "yaml" | "yml" => serde_yaml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => serde_yaml::from_str(&contents)?,
        };
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Load configuration from a JSON string.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        Ok(config)
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        self.apply_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from a variable lookup.
    ///
    /// Variable names match the ones the hourly/daily jobs are deployed with.
    /// `PREPROC_BUCKET` falls back to `PROCESSED_BUCKET`.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bucket) = lookup("RAW_BUCKET") {
            self.preprocess.source_bucket = bucket;
        }
        if let Some(prefix) = lookup("S3_INPUT_PREFIX") {
            self.preprocess.source_prefix = prefix;
        }

        if let Some(bucket) = lookup("PROCESSED_BUCKET") {
            self.summarize.dest_bucket = bucket.clone();
            self.compact.bucket = bucket.clone();
            self.preprocess.dest_bucket = bucket.clone();
            self.summarize.source_bucket = bucket;
        }
        if let Some(bucket) = lookup("PREPROC_BUCKET") {
            self.preprocess.dest_bucket = bucket.clone();
            self.summarize.source_bucket = bucket;
        }
        if let Some(prefix) = lookup("PREPROC_PREFIX") {
            self.preprocess.dest_prefix = prefix.clone();
            self.summarize.source_prefix = prefix;
        }
        if let Some(prefix) = lookup("S3_OUTPUT_PREFIX") {
            self.summarize.dest_prefix = prefix.clone();
            self.compact.source_prefix = prefix;
        }
        if let Some(prefix) = lookup("COMPACT_PREFIX") {
            self.compact.compact_prefix = prefix;
        }
        if let Some(url) = lookup("SUMMARIZER_URL") {
            self.summarize.endpoint = url;
        }

        if let Some(value) = lookup("MAX_PREPROC_CHARS") {
            self.preprocess.max_chars = parse_var("MAX_PREPROC_CHARS", &value)?;
        }
        if let Some(value) = lookup("SUM_MAX_LEN") {
            self.summarize.max_length = parse_var("SUM_MAX_LEN", &value)?;
        }
        if let Some(value) = lookup("SUM_MIN_LEN") {
            self.summarize.min_length = parse_var("SUM_MIN_LEN", &value)?;
        }
        if let Some(value) = lookup("COMPACT_MAX_FILES") {
            self.compact.max_files = parse_var("COMPACT_MAX_FILES", &value)?;
        }

        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        let buckets = [
            &self.preprocess.source_bucket,
            &self.preprocess.dest_bucket,
            &self.summarize.source_bucket,
            &self.summarize.dest_bucket,
            &self.compact.bucket,
        ];
        if buckets.iter().any(|b| b.trim().is_empty()) {
            anyhow::bail!("Bucket names must not be empty");
        }

        let prefixes = [
            ("preprocess.source_prefix", &self.preprocess.source_prefix),
            ("preprocess.dest_prefix", &self.preprocess.dest_prefix),
            ("summarize.source_prefix", &self.summarize.source_prefix),
            ("summarize.dest_prefix", &self.summarize.dest_prefix),
            ("compact.source_prefix", &self.compact.source_prefix),
            ("compact.compact_prefix", &self.compact.compact_prefix),
        ];
        for (field, prefix) in prefixes {
            // Listing matches whole path segments, so `raw/2024-` would select nothing
            if !prefix.is_empty() && !prefix.ends_with('/') {
                anyhow::bail!("{} '{}' must be empty or end with '/'", field, prefix);
            }
        }

        if self.preprocess.source_bucket == self.preprocess.dest_bucket
            && same_prefix(&self.preprocess.source_prefix, &self.preprocess.dest_prefix)
        {
            anyhow::bail!("Preprocess source and destination prefixes must differ");
        }
        if self.summarize.source_bucket == self.summarize.dest_bucket
            && same_prefix(&self.summarize.source_prefix, &self.summarize.dest_prefix)
        {
            anyhow::bail!("Summarize source and destination prefixes must differ");
        }

        if self.preprocess.max_chars == 0 {
            anyhow::bail!("max_chars must be > 0");
        }
        if self.summarize.min_length > self.summarize.max_length {
            anyhow::bail!(
                "Summary min_length ({}) exceeds max_length ({})",
                self.summarize.min_length,
                self.summarize.max_length
            );
        }
        if self.summarize.max_input_chars == Some(0) {
            anyhow::bail!("max_input_chars must be > 0 when set");
        }
        if self.compact.max_files == 0 {
            anyhow::bail!("Compaction max_files must be > 0");
        }
        if self.processing.concurrency == 0 {
            anyhow::bail!("Concurrency must be > 0");
        }
        if self.processing.page_size == 0 || self.processing.page_size > MAX_PAGE_SIZE {
            anyhow::bail!("page_size must be between 1 and {}", MAX_PAGE_SIZE);
        }
        Ok(())
    }
}

fn same_prefix(a: &str, b: &str) -> bool {
    a.trim_end_matches('/') == b.trim_end_matches('/')
}

fn parse_var<T>(name: &str, value: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid value for {}: '{}' ({})", name, value, e))
}

// Default value functions for serde
fn default_raw_bucket() -> String { "your-raw-bucket".to_string() }
fn default_processed_bucket() -> String { "your-processed-bucket".to_string() }
fn default_raw_prefix() -> String { "raw/".to_string() }
fn default_preproc_prefix() -> String { "preprocessed/".to_string() }
fn default_processed_prefix() -> String { "processed/".to_string() }
fn default_compact_prefix() -> String { "compact/".to_string() }
fn default_suffix() -> String { ".txt".to_string() }
fn default_max_chars() -> usize { 8000 }
fn default_summarizer_url() -> String { "http://localhost:8080/summarize".to_string() }
fn default_sum_max_len() -> usize { 128 }
fn default_sum_min_len() -> usize { 30 }
fn default_max_input_chars() -> Option<usize> { Some(100_000) }
fn default_request_timeout_secs() -> u64 { 120 }
fn default_compact_max_files() -> usize { 5000 }
fn default_concurrency() -> usize { 16 }
fn default_page_size() -> usize { MAX_PAGE_SIZE }
fn default_true() -> bool { true }
fn default_metrics_interval() -> u64 { 10 }
