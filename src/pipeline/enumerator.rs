//! Paginated key enumeration under a prefix.

use crate::io::{Bucket, ListEntry};
use crate::pipeline::Metrics;
use anyhow::Result;
use std::sync::Arc;

/// Selection predicate applied to every listed entry.
#[derive(Debug, Clone)]
pub struct KeyFilter {
    /// Keys must end with this suffix (empty accepts all)
    pub suffix: String,
    /// Skip zero-byte objects
    pub skip_empty: bool,
}

impl KeyFilter {
    /// Non-empty objects whose key ends with `suffix`.
    pub fn with_suffix(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
            skip_empty: true,
        }
    }

    pub fn matches(&self, entry: &ListEntry) -> bool {
        if self.skip_empty && entry.size == 0 {
            return false;
        }
        entry.key.ends_with(&self.suffix)
    }
}

/// Lists candidate keys for one stage run.
pub struct Enumerator {
    bucket: Bucket,
    page_size: usize,
    max_keys: Option<usize>,
    metrics: Arc<Metrics>,
}

impl Enumerator {
    pub fn new(bucket: Bucket, page_size: usize, metrics: Arc<Metrics>) -> Self {
        Self {
            bucket,
            page_size,
            max_keys: None,
            metrics,
        }
    }

    /// Stop after this many selected keys.
    pub fn with_max_keys(mut self, max_keys: usize) -> Self {
        self.max_keys = Some(max_keys);
        self
    }

    /// Collect every key under `prefix` accepted by `filter`, in listing order.
    ///
    /// Listing errors are returned as-is; there is no local retry. Reaching the
    /// `max_keys` ceiling returns the keys gathered so far without requesting
    /// further pages.
    pub async fn list(&self, prefix: &str, filter: &KeyFilter) -> Result<Vec<String>> {
        let mut keys = Vec::new();

        if self.max_keys == Some(0) {
            return Ok(keys);
        }

        let mut pager = self.bucket.list_pages(prefix, self.page_size);
        loop {
            let page = pager.next_page().await?;
            self.metrics.add_page_listed(page.entries.len() as u64);

            for entry in page.entries {
                if !filter.matches(&entry) {
                    continue;
                }
                keys.push(entry.key);
                self.metrics.add_key_selected();

                if self.max_keys.is_some_and(|max| keys.len() >= max) {
                    tracing::warn!(
                        "Reached the {} key ceiling under {}, stopping enumeration",
                        keys.len(),
                        self.bucket.location(prefix)
                    );
                    return Ok(keys);
                }
            }

            if !page.truncated {
                break;
            }
        }

        tracing::info!(
            "Enumerated {} keys under {}",
            keys.len(),
            self.bucket.location(prefix)
        );
        Ok(keys)
    }
}
