//! Per-document transforms applied by the pipeline stages.

mod normalize;
mod summarize;

pub use normalize::{decode_text, normalize_text, truncate_chars, Normalizer};
pub use summarize::{HttpSummarizer, SummarizerOptions};

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;

/// A document body and its user metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    pub body: Bytes,
    pub metadata: BTreeMap<String, String>,
}

impl Document {
    /// Create a document with no metadata.
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            metadata: BTreeMap::new(),
        }
    }
}

/// A pluggable `(bytes, metadata) -> (bytes, metadata)` step.
///
/// Implementations may call out to external services; the runner treats them
/// as black boxes and only cares about the returned document or error.
#[async_trait]
pub trait DocumentTransform: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Transform one document.
    async fn transform(&self, input: Document) -> Result<Document>;
}
