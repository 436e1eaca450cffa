use async_trait::async_trait;
use s3::creds::Credentials;
use s3::{Bucket, Region};

/// Blob storage for source assets and rendered outputs.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn download(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Store `data` under `key` and return the reference to record on the job.
    async fn upload(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<String, StorageError>;

    /// Confirm the bucket is reachable and listable.
    async fn health_check(&self) -> Result<(), StorageError>;
}

/// Client for an S3-compatible bucket (AWS, R2, MinIO).
pub struct S3Store {
    bucket: Box<Bucket>,
}

impl S3Store {
    pub fn new(
        bucket_name: &str,
        region: &str,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: region.to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials =
            Credentials::new(Some(access_key), Some(secret_key), None, None, None)
                .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?
            .with_path_style();

        Ok(Self { bucket })
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn download(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let response = self.bucket.get_object(key).await.map_err(StorageError::S3)?;
        let status = response.status_code();
        if !(200..300).contains(&status) {
            return Err(StorageError::Status {
                key: key.to_string(),
                status,
            });
        }
        Ok(response.to_vec())
    }

    async fn upload(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<String, StorageError> {
        let response = self
            .bucket
            .put_object_with_content_type(key, &data, content_type)
            .await
            .map_err(StorageError::S3)?;
        let status = response.status_code();
        if !(200..300).contains(&status) {
            return Err(StorageError::Status {
                key: key.to_string(),
                status,
            });
        }
        Ok(key.to_string())
    }

    async fn health_check(&self) -> Result<(), StorageError> {
        let (_, status) = self
            .bucket
            .list_page(String::new(), None, None, None, Some(1))
            .await
            .map_err(StorageError::S3)?;
        if !(200..300).contains(&status) {
            return Err(StorageError::Status {
                key: self.bucket.name(),
                status,
            });
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Object {key} returned HTTP {status}")]
    Status { key: String, status: u16 },

    #[error("Object {0} not found")]
    NotFound(String),

    #[error("Storage configuration error: {0}")]
    Config(String),
}
