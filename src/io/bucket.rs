//! A named bucket over an injected object store.
//!
//! `Bucket` exposes the small surface the pipeline needs: paged listing,
//! whole-object and streaming reads, and writes carrying a content type plus
//! user metadata. Callers receive a `Bucket` explicitly; there is no
//! process-wide client.

use anyhow::{Context, Result};
use bytes::Bytes;
use futures::stream::{BoxStream, Peekable, StreamExt, TryStreamExt};
use object_store::path::Path;
use object_store::{
    Attribute, AttributeValue, Attributes, ObjectMeta, ObjectStore, PutOptions, PutPayload,
};
use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::Arc;

/// One entry of a listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    /// Object key
    pub key: String,
    /// Object size in bytes
    pub size: u64,
}

/// One page of a prefix listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    /// Entries in the order the store returned them
    pub entries: Vec<ListEntry>,
    /// More entries exist after this page
    pub truncated: bool,
}

/// Pages over a single listing stream.
///
/// The stream is opened once and consumed in order, so no entry is requested
/// twice and no ordering is assumed of the backing store. Dropping the pager
/// stops the listing.
pub struct ListPager<'a> {
    stream: Peekable<BoxStream<'a, object_store::Result<ObjectMeta>>>,
    page_size: usize,
    location: String,
}

impl ListPager<'_> {
    /// Next page of at most `page_size` entries.
    ///
    /// `truncated` is false once the listing is exhausted; calling again after
    /// that returns an empty page.
    pub async fn next_page(&mut self) -> Result<ListPage> {
        let mut page = ListPage {
            entries: Vec::with_capacity(self.page_size.min(1024)),
            truncated: false,
        };

        while page.entries.len() < self.page_size {
            let Some(meta) = self.stream.next().await else {
                return Ok(page);
            };
            let meta = meta.with_context(|| format!("Failed to list {}", self.location))?;
            page.entries.push(ListEntry {
                key: meta.location.to_string(),
                size: meta.size as u64,
            });
        }

        page.truncated = Pin::new(&mut self.stream).peek().await.is_some();
        Ok(page)
    }
}

/// An object read back together with its attributes.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub body: Bytes,
    pub content_type: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

/// A bucket handle: a name plus the store that serves it.
#[derive(Clone)]
pub struct Bucket {
    name: String,
    store: Arc<dyn ObjectStore>,
    /// Store accepts content type and user metadata on put
    attributes: bool,
}

impl std::fmt::Debug for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bucket")
            .field("name", &self.name)
            .field("store", &self.store.to_string())
            .field("attributes", &self.attributes)
            .finish()
    }
}

impl Bucket {
    /// Wrap an object store under a bucket name.
    pub fn new(name: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            name: name.into(),
            store,
            attributes: true,
        }
    }

    /// Write objects without content type or user metadata.
    ///
    /// `LocalFileSystem` rejects puts that carry attributes.
    pub fn without_attributes(mut self) -> Self {
        self.attributes = false;
        self
    }

    /// Bucket name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fully-qualified location of a key, `s3://bucket/key`.
    pub fn location(&self, key: &str) -> String {
        format!("s3://{}/{}", self.name, key)
    }

    /// Page through every object under `prefix`.
    pub fn list_pages(&self, prefix: &str, page_size: usize) -> ListPager<'_> {
        let prefix_path = prefix_path(prefix);
        ListPager {
            stream: self.store.list(prefix_path.as_ref()).peekable(),
            page_size: page_size.max(1),
            location: self.location(prefix),
        }
    }

    /// Read a whole object.
    pub async fn get(&self, key: &str) -> Result<Bytes> {
        let result = self
            .store
            .get(&Path::from(key))
            .await
            .with_context(|| format!("Failed to read {}", self.location(key)))?;
        let body = result
            .bytes()
            .await
            .with_context(|| format!("Failed to read body of {}", self.location(key)))?;
        Ok(body)
    }

    /// Read an object together with its content type and user metadata.
    pub async fn get_object(&self, key: &str) -> Result<StoredObject> {
        let result = self
            .store
            .get(&Path::from(key))
            .await
            .with_context(|| format!("Failed to read {}", self.location(key)))?;

        let mut content_type = None;
        let mut metadata = BTreeMap::new();
        for (attribute, value) in result.attributes.iter() {
            let value: &str = value.as_ref();
            match attribute {
                Attribute::ContentType => content_type = Some(value.to_string()),
                Attribute::Metadata(name) => {
                    metadata.insert(name.to_string(), value.to_string());
                }
                _ => {}
            }
        }

        let body = result
            .bytes()
            .await
            .with_context(|| format!("Failed to read body of {}", self.location(key)))?;

        Ok(StoredObject {
            body,
            content_type,
            metadata,
        })
    }

    /// Stream an object's body in chunks.
    pub async fn get_stream(&self, key: &str) -> Result<BoxStream<'static, Result<Bytes>>> {
        let location = self.location(key);
        let result = self
            .store
            .get(&Path::from(key))
            .await
            .with_context(|| format!("Failed to read {}", location))?;

        Ok(result
            .into_stream()
            .map_err(move |e| anyhow::Error::new(e).context(format!("Failed to stream {}", location)))
            .boxed())
    }

    /// Write an object, replacing any existing one at `key`.
    ///
    /// Content type and metadata are dropped for buckets opened
    /// `without_attributes`.
    pub async fn put(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<()> {
        let mut attributes = Attributes::new();
        if self.attributes {
            attributes.insert(
                Attribute::ContentType,
                AttributeValue::from(content_type.to_string()),
            );
            for (name, value) in metadata {
                attributes.insert(
                    Attribute::Metadata(name.clone().into()),
                    AttributeValue::from(value.clone()),
                );
            }
        }

        let options = PutOptions {
            attributes,
            ..Default::default()
        };

        self.store
            .put_opts(&Path::from(key), PutPayload::from(body), options)
            .await
            .with_context(|| format!("Failed to write {}", self.location(key)))?;
        Ok(())
    }

    /// Check whether an object exists at `key`.
    pub async fn exists(&self, key: &str) -> Result<bool> {
        match self.store.head(&Path::from(key)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(anyhow::Error::new(e)
                .context(format!("Failed to inspect {}", self.location(key)))),
        }
    }
}

/// Object store prefixes are path-segment based; an empty prefix lists everything.
fn prefix_path(prefix: &str) -> Option<Path> {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        None
    } else {
        Some(Path::from(trimmed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::local::LocalFileSystem;
    use object_store::memory::InMemory;
    use std::collections::HashSet;

    fn bucket() -> Bucket {
        Bucket::new("test-bucket", Arc::new(InMemory::new()))
    }

    async fn seed(bucket: &Bucket, keys: &[&str]) {
        for key in keys {
            bucket
                .put(key, Bytes::from_static(b"x"), "text/plain", &BTreeMap::new())
                .await
                .unwrap();
        }
    }

    #[test]
    fn test_location() {
        assert_eq!(bucket().location("raw/a.txt"), "s3://test-bucket/raw/a.txt");
    }

    #[test]
    fn test_prefix_path() {
        assert!(prefix_path("").is_none());
        assert!(prefix_path("/").is_none());
        assert_eq!(prefix_path("raw/").unwrap().as_ref(), "raw");
        assert_eq!(prefix_path("a/b/").unwrap().as_ref(), "a/b");
    }

    #[tokio::test]
    async fn test_list_pages() {
        let bucket = bucket();
        seed(&bucket, &["raw/a.txt", "raw/b.txt", "raw/c.txt", "other/d.txt"]).await;

        let mut pager = bucket.list_pages("raw/", 2);
        let first = pager.next_page().await.unwrap();
        let keys: Vec<_> = first.entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["raw/a.txt", "raw/b.txt"]);
        assert!(first.truncated);

        let second = pager.next_page().await.unwrap();
        let keys: Vec<_> = second.entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["raw/c.txt"]);
        assert!(!second.truncated);

        let after = pager.next_page().await.unwrap();
        assert!(after.entries.is_empty());
        assert!(!after.truncated);
    }

    #[tokio::test]
    async fn test_list_pages_exact_fit_not_truncated() {
        let bucket = bucket();
        seed(&bucket, &["raw/a.txt", "raw/b.txt"]).await;

        let page = bucket.list_pages("raw/", 2).next_page().await.unwrap();
        assert_eq!(page.entries.len(), 2);
        assert!(!page.truncated);
    }

    #[tokio::test]
    async fn test_local_store_pages_and_writes() {
        let dir = std::path::PathBuf::from("target/test-bucket-local");
        if dir.exists() {
            std::fs::remove_dir_all(&dir).unwrap();
        }
        std::fs::create_dir_all(&dir).unwrap();

        let store = Arc::new(LocalFileSystem::new_with_prefix(&dir).unwrap());
        let bucket = Bucket::new("b", store).without_attributes();

        let mut metadata = BTreeMap::new();
        metadata.insert("source_key".to_string(), "x".to_string());
        let expected: HashSet<String> = (0..60).map(|i| format!("raw/doc-{:03}.txt", i)).collect();
        for key in &expected {
            bucket
                .put(key, Bytes::from_static(b"body"), "text/plain", &metadata)
                .await
                .unwrap();
        }

        let mut pager = bucket.list_pages("raw/", 7);
        let mut listed = Vec::new();
        let mut pages = 0;
        loop {
            let page = pager.next_page().await.unwrap();
            pages += 1;
            listed.extend(page.entries.into_iter().map(|e| e.key));
            if !page.truncated {
                break;
            }
        }

        // Directory walk order is unspecified; every key appears exactly once
        assert_eq!(listed.len(), 60);
        assert_eq!(listed.into_iter().collect::<HashSet<_>>(), expected);
        assert_eq!(pages, 9);

        let object = bucket.get_object("raw/doc-000.txt").await.unwrap();
        assert_eq!(object.body.as_ref(), b"body");
        assert!(object.metadata.is_empty());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_put_get_object_with_metadata() {
        let bucket = bucket();
        let mut metadata = BTreeMap::new();
        metadata.insert("source_key".to_string(), "raw/a.txt".to_string());

        bucket
            .put("out/a.txt", Bytes::from_static(b"hello"), "text/plain", &metadata)
            .await
            .unwrap();

        let object = bucket.get_object("out/a.txt").await.unwrap();
        assert_eq!(object.body.as_ref(), b"hello");
        assert_eq!(object.content_type.as_deref(), Some("text/plain"));
        assert_eq!(object.metadata.get("source_key").map(String::as_str), Some("raw/a.txt"));
    }

    #[tokio::test]
    async fn test_get_stream_and_exists() {
        let bucket = bucket();
        seed(&bucket, &["k.txt"]).await;

        assert!(bucket.exists("k.txt").await.unwrap());
        assert!(!bucket.exists("missing.txt").await.unwrap());

        let chunks: Vec<Bytes> = bucket
            .get_stream("k.txt")
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(chunks.concat(), b"x");
    }

    #[tokio::test]
    async fn test_get_missing_is_error() {
        let err = bucket().get("nope.txt").await.unwrap_err();
        assert!(format!("{:#}", err).contains("s3://test-bucket/nope.txt"));
    }
}
