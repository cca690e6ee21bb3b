//! AWS S3 implementation of the BackupStore trait.
//!
//! Supports AWS S3 and S3-compatible services (Backblaze B2, DigitalOcean
//! Spaces, MinIO) via a custom endpoint.

use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;

use crate::cloud_backup::{snapshot_key, BackupError, BackupStore, SnapshotKind};

/// Configuration for the S3 backup store.
#[derive(Debug, Clone)]
pub struct S3Config {
    /// S3 bucket name
    pub bucket: String,
    /// AWS region (e.g., "us-east-1")
    pub region: String,
    /// AWS access key ID
    pub access_key_id: String,
    /// AWS secret access key
    pub secret_access_key: String,
    /// Optional key prefix namespacing all snapshots (e.g., "scribe/")
    pub prefix: Option<String>,
    /// Optional custom endpoint for S3-compatible services
    /// (e.g., "https://nyc3.digitaloceanspaces.com")
    pub endpoint: Option<String>,
}

/// S3-backed snapshot store.
pub struct S3BackupStore {
    client: Client,
    bucket: String,
    prefix: Option<String>,
}

impl S3BackupStore {
    /// Create a new S3 backup store from configuration.
    pub fn new(config: S3Config) -> Result<Self, BackupError> {
        if config.bucket.is_empty() {
            return Err(BackupError::Config("bucket name is required".to_string()));
        }
        if config.access_key_id.is_empty() {
            return Err(BackupError::Config("access_key_id is required".to_string()));
        }
        if config.secret_access_key.is_empty() {
            return Err(BackupError::Config(
                "secret_access_key is required".to_string(),
            ));
        }

        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None, // session token
            None, // expiration
            "scribe-config",
        );

        let region = Region::new(config.region.clone());

        let mut sdk_config_builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(region);

        // Custom endpoint for S3-compatible services
        if let Some(endpoint) = &config.endpoint {
            sdk_config_builder = sdk_config_builder
                .endpoint_url(endpoint)
                .force_path_style(true); // Required for most S3-compatible services
        }

        let sdk_config = sdk_config_builder.build();
        let client = Client::from_conf(sdk_config);

        Ok(Self {
            client,
            bucket: config.bucket,
            prefix: config.prefix,
        })
    }
}

impl BackupStore for S3BackupStore {
    async fn push_snapshot(
        &self,
        user_id: &str,
        kind: SnapshotKind,
        payload: &[u8],
    ) -> Result<(), BackupError> {
        let key = snapshot_key(self.prefix.as_deref(), user_id, kind);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type("application/json")
            .body(ByteStream::from(payload.to_vec()))
            .send()
            .await
            .map_err(|e| BackupError::Push(format!("S3 upload failed: {}", e)))?;

        tracing::debug!(
            key = %key,
            bucket = %self.bucket,
            size_bytes = payload.len(),
            "Pushed snapshot to S3"
        );

        Ok(())
    }

    async fn pull_snapshot(
        &self,
        user_id: &str,
        kind: SnapshotKind,
    ) -> Result<Option<Vec<u8>>, BackupError> {
        let key = snapshot_key(self.prefix.as_deref(), user_id, kind);

        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await;

        let output = match result {
            Ok(output) => output,
            Err(err) => {
                let service_err = err.as_service_error();
                if service_err.map(|e| e.is_no_such_key()).unwrap_or(false) {
                    return Ok(None);
                }
                return Err(BackupError::Pull(format!("S3 download failed: {}", err)));
            }
        };

        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| BackupError::Pull(format!("Failed to read S3 body: {}", e)))?
            .into_bytes()
            .to_vec();

        tracing::debug!(
            key = %key,
            bucket = %self.bucket,
            size_bytes = bytes.len(),
            "Pulled snapshot from S3"
        );

        Ok(Some(bytes))
    }

    fn provider_name(&self) -> &'static str {
        "s3"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_requires_bucket_and_credentials() {
        let base = S3Config {
            bucket: String::new(),
            region: "us-east-1".to_string(),
            access_key_id: "key".to_string(),
            secret_access_key: "secret".to_string(),
            prefix: None,
            endpoint: None,
        };
        assert!(S3BackupStore::new(base.clone()).is_err());

        let no_key = S3Config {
            bucket: "bucket".to_string(),
            access_key_id: String::new(),
            ..base.clone()
        };
        assert!(S3BackupStore::new(no_key).is_err());

        let ok = S3Config {
            bucket: "bucket".to_string(),
            ..base
        };
        assert!(S3BackupStore::new(ok).is_ok());
    }

    #[test]
    fn test_s3_config_with_endpoint() {
        let config = S3Config {
            bucket: "my-bucket".to_string(),
            region: "nyc3".to_string(),
            access_key_id: "key".to_string(),
            secret_access_key: "secret".to_string(),
            prefix: Some("scribe".to_string()),
            endpoint: Some("https://nyc3.digitaloceanspaces.com".to_string()),
        };

        let store = S3BackupStore::new(config).unwrap();
        assert_eq!(store.provider_name(), "s3");
        assert_eq!(store.prefix, Some("scribe".to_string()));
    }
}
