//! Self-hosted S3-compatible backend (MinIO and friends) built on `aws-sdk-s3`.

use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{BehaviorVersion, Credentials, Region},
    error::DisplayErrorContext,
    primitives::ByteStream as S3Body,
};
use futures::StreamExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use super::{
    ByteStream, DEFAULT_CONTENT_TYPE, DOWNLOAD_CHUNK_SIZE, StorageError, StorageProvider,
    StorageResult, UploadSource,
};
use crate::config::MinioConfig;

pub struct MinioProvider {
    client: Client,
    bucket: String,
    endpoint: String,
    secure: bool,
}

impl MinioProvider {
    pub fn new(config: &MinioConfig) -> Self {
        let credentials = Credentials::new(
            config.access_key.clone(),
            config.secret_key.clone(),
            None,
            None,
            "qr-store-config",
        );

        let s3_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .endpoint_url(endpoint_url(config.secure, &config.endpoint))
            // MinIO serves buckets under the path, not as virtual hosts.
            .force_path_style(true)
            .build();

        Self {
            client: Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
            endpoint: config.endpoint.clone(),
            secure: config.secure,
        }
    }
}

#[async_trait]
impl StorageProvider for MinioProvider {
    async fn initialize(&self) -> StorageResult<()> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => {
                debug!(bucket = %self.bucket, "bucket already present");
                return Ok(());
            }
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => {}
            Err(err) => {
                return Err(StorageError::Unavailable(format!(
                    "checking bucket `{}` at {}: {}",
                    self.bucket,
                    self.endpoint,
                    DisplayErrorContext(&err)
                )));
            }
        }

        match self.client.create_bucket().bucket(&self.bucket).send().await {
            Ok(_) => info!(bucket = %self.bucket, "created bucket"),
            // Another instance won the creation race.
            Err(err)
                if err.as_service_error().is_some_and(|e| {
                    e.is_bucket_already_owned_by_you() || e.is_bucket_already_exists()
                }) =>
            {
                warn!(
                    bucket = %self.bucket,
                    error = %DisplayErrorContext(&err),
                    "bucket was created concurrently, continuing"
                );
            }
            Err(err) => {
                return Err(StorageError::Unavailable(format!(
                    "creating bucket `{}`: {}",
                    self.bucket,
                    DisplayErrorContext(&err)
                )));
            }
        }

        Ok(())
    }

    async fn upload(
        &self,
        key: &str,
        source: UploadSource,
        content_type: Option<&str>,
    ) -> StorageResult<String> {
        // The S3 API needs an explicit content length.
        let (data, len) = source.into_sized_bytes().await?;
        let content_type = content_type.unwrap_or(DEFAULT_CONTENT_TYPE);

        debug!(bucket = %self.bucket, key, len, content_type, "putting object");
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(S3Body::from(data))
            .content_length(len as i64)
            .content_type(content_type)
            .send()
            .await
            .map_err(|err| StorageError::request(key, DisplayErrorContext(&err)))?;

        Ok(self.resolve_url(key))
    }

    async fn download(&self, key: &str) -> StorageResult<ByteStream> {
        debug!(bucket = %self.bucket, key, "getting object");
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                if err.as_service_error().is_some_and(|e| e.is_no_such_key()) {
                    StorageError::not_found(key)
                } else {
                    StorageError::request(key, DisplayErrorContext(&err))
                }
            })?;

        let owned_key = key.to_string();
        let chunks = ReaderStream::with_capacity(output.body.into_async_read(), DOWNLOAD_CHUNK_SIZE)
            .map(move |chunk| chunk.map_err(|err| StorageError::request(&owned_key, err)));

        Ok(chunks.boxed())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => Ok(false),
            Err(err) => Err(StorageError::request(key, DisplayErrorContext(&err))),
        }
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        // S3 deletes are idempotent, absence has to be detected up front.
        if !self.exists(key).await? {
            return Err(StorageError::not_found(key));
        }

        debug!(bucket = %self.bucket, key, "removing object");
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| StorageError::request(key, DisplayErrorContext(&err)))?;

        Ok(())
    }

    fn resolve_url(&self, key: &str) -> String {
        object_url(self.secure, &self.endpoint, &self.bucket, key)
    }
}

fn endpoint_url(secure: bool, endpoint: &str) -> String {
    let protocol = if secure { "https" } else { "http" };
    format!("{}://{}", protocol, endpoint)
}

fn object_url(secure: bool, endpoint: &str, bucket: &str, key: &str) -> String {
    format!("{}/{}/{}", endpoint_url(secure, endpoint), bucket, key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_follow_tls_flag() {
        assert_eq!(
            object_url(false, "localhost:9000", "qrcodes", "abc.png"),
            "http://localhost:9000/qrcodes/abc.png"
        );
        assert_eq!(
            object_url(true, "minio.internal", "codes", "abc.metadata"),
            "https://minio.internal/codes/abc.metadata"
        );
    }

    #[test]
    fn provider_resolves_from_config() {
        let provider = MinioProvider::new(&MinioConfig::default());
        assert_eq!(
            provider.resolve_url("x.png"),
            "http://localhost:9000/qrcodes/x.png"
        );
    }
}
