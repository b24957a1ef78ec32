//! Object store configuration for S3 and local filesystem access.
//!
//! Transport-level retries live here, in the object store client. Pipeline
//! stages never retry on their own.

use crate::config::StorageConfig;
use crate::io::Bucket;
use anyhow::{Context, Result};
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::{ClientOptions, ObjectStore, RetryConfig};
use std::sync::Arc;
use std::time::Duration;

/// Client options for many small-object requests.
fn create_client_options(config: &StorageConfig) -> ClientOptions {
    ClientOptions::new()
        .with_connect_timeout(Duration::from_secs(5))
        .with_timeout(Duration::from_secs(30))
        .with_pool_idle_timeout(Duration::from_secs(90))
        .with_pool_max_idle_per_host(64)
        .with_allow_http(config.allow_http)
}

/// Create retry configuration for transient failures.
fn create_retry_config() -> RetryConfig {
    RetryConfig {
        max_retries: 5,
        backoff: object_store::BackoffConfig {
            init_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            base: 2.0,
        },
        // Retries 429 and 5xx responses
        retry_timeout: Duration::from_secs(120),
    }
}

/// Create an authenticated S3 client for a bucket.
///
/// Credentials and region are loaded from (in order):
/// - Environment variables (AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY, AWS_REGION)
/// - AWS config files (~/.aws/credentials, ~/.aws/config)
/// - EC2 instance profile (IMDS)
fn create_s3_store(bucket: &str, config: &StorageConfig) -> Result<Arc<dyn ObjectStore>> {
    tracing::info!("Creating S3 client for bucket: {}", bucket);

    let mut builder = AmazonS3Builder::from_env()
        .with_bucket_name(bucket)
        .with_client_options(create_client_options(config))
        .with_retry(create_retry_config());

    if let Some(region) = &config.region {
        builder = builder.with_region(region);
    }
    if let Some(endpoint) = &config.endpoint_url {
        // Custom endpoints (MinIO, LocalStack) expect path-style requests
        builder = builder
            .with_endpoint(endpoint)
            .with_virtual_hosted_style_request(false);
    }

    let store = builder
        .build()
        .with_context(|| format!("Failed to build S3 client for bucket '{}'", bucket))?;
    Ok(Arc::new(store))
}

/// Create a store rooted at `{local_root}/{bucket}`.
fn create_local_store(root: &str, bucket: &str) -> Result<Arc<dyn ObjectStore>> {
    let path = std::path::Path::new(root).join(bucket);
    if !path.exists() {
        std::fs::create_dir_all(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
    }
    tracing::info!("Creating LocalFileSystem store at: {}", path.display());
    Ok(Arc::new(LocalFileSystem::new_with_prefix(&path)?))
}

/// Open a bucket, on local disk if `local_root` is set, otherwise on S3.
///
/// Local buckets store bodies only; content type and user metadata are not kept.
pub fn open_bucket(name: &str, config: &StorageConfig) -> Result<Bucket> {
    match &config.local_root {
        Some(root) => Ok(Bucket::new(name, create_local_store(root, name)?).without_attributes()),
        None => Ok(Bucket::new(name, create_s3_store(name, config)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_s3_bucket() {
        let config = StorageConfig {
            region: Some("us-east-1".to_string()),
            ..Default::default()
        };
        let bucket = open_bucket("test-bucket", &config).unwrap();
        assert_eq!(bucket.name(), "test-bucket");
    }

    #[test]
    fn test_open_s3_bucket_custom_endpoint() {
        let config = StorageConfig {
            region: Some("us-east-1".to_string()),
            endpoint_url: Some("http://localhost:9000".to_string()),
            allow_http: true,
            local_root: None,
        };
        assert!(open_bucket("minio-bucket", &config).is_ok());
    }

    #[test]
    fn test_open_local_bucket_creates_directory() {
        let root = std::path::PathBuf::from("target/test-local-buckets");
        if root.exists() {
            std::fs::remove_dir_all(&root).unwrap();
        }

        let config = StorageConfig {
            local_root: Some(root.to_string_lossy().into_owned()),
            ..Default::default()
        };
        let bucket = open_bucket("raw", &config).unwrap();

        assert_eq!(bucket.name(), "raw");
        assert!(root.join("raw").is_dir());
        assert!(format!("{:?}", bucket).contains("attributes: false"));

        std::fs::remove_dir_all(&root).ok();
    }
}
