//! Object storage abstraction shared by every backend.
//!
//! A backend is selected once at startup from [`BackendConfig`], initialised
//! (container/bucket ensured) and then shared read-only behind an
//! `Arc<dyn StorageProvider>` for the lifetime of the process.

pub mod azure;
pub mod memory;
pub mod minio;

use std::{
    io::{self, SeekFrom},
    sync::Arc,
};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{StreamExt, stream::BoxStream};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};

use crate::config::BackendConfig;

/// Size of the chunks yielded by [`StorageProvider::download`].
pub const DOWNLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Content type used when the caller does not supply one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object `{key}` not found")]
    NotFound { key: String },
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("storage request for `{key}` failed: {reason}")]
    Request { key: String, reason: String },
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl StorageError {
    pub fn not_found(key: &str) -> Self {
        Self::NotFound {
            key: key.to_string(),
        }
    }

    pub fn request(key: &str, reason: impl ToString) -> Self {
        Self::Request {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Finite, non-restartable sequence of byte chunks.
pub type ByteStream = BoxStream<'static, StorageResult<Bytes>>;

/// A readable source that can be measured by seeking.
pub trait SeekableSource: AsyncRead + AsyncSeek + Send + Unpin {}

impl<T: AsyncRead + AsyncSeek + Send + Unpin> SeekableSource for T {}

/// Payload accepted by [`StorageProvider::upload`].
pub enum UploadSource {
    Buffer(Bytes),
    Stream(Box<dyn SeekableSource>),
}

impl UploadSource {
    pub fn stream(source: impl SeekableSource + 'static) -> Self {
        Self::Stream(Box::new(source))
    }

    /// Returns the full payload together with its length.
    ///
    /// Streams are measured by seeking to the end and rewinding to the start
    /// before being read, so the reported length never depends on the
    /// current cursor position.
    pub async fn into_sized_bytes(self) -> io::Result<(Bytes, u64)> {
        match self {
            Self::Buffer(data) => {
                let len = data.len() as u64;
                Ok((data, len))
            }
            Self::Stream(mut reader) => {
                let len = reader.seek(SeekFrom::End(0)).await?;
                reader.rewind().await?;

                let mut buf = Vec::with_capacity(len as usize);
                reader.read_to_end(&mut buf).await?;
                if buf.len() as u64 != len {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("stream yielded {} bytes, expected {}", buf.len(), len),
                    ));
                }

                Ok((Bytes::from(buf), len))
            }
        }
    }
}

impl From<Bytes> for UploadSource {
    fn from(data: Bytes) -> Self {
        Self::Buffer(data)
    }
}

impl From<Vec<u8>> for UploadSource {
    fn from(data: Vec<u8>) -> Self {
        Self::Buffer(Bytes::from(data))
    }
}

/// Uniform contract implemented by every storage backend.
#[async_trait]
pub trait StorageProvider: Send + Sync + 'static {
    /// Idempotently ensures the target container/bucket exists.
    async fn initialize(&self) -> StorageResult<()>;

    /// Stores `source` under `key`, replacing any existing object, and
    /// returns the URL of the stored object.
    async fn upload(
        &self,
        key: &str,
        source: UploadSource,
        content_type: Option<&str>,
    ) -> StorageResult<String>;

    async fn download(&self, key: &str) -> StorageResult<ByteStream>;

    /// Never fails for a missing object, returns `false` instead.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Fails with [`StorageError::NotFound`] if `key` is absent.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    fn resolve_url(&self, key: &str) -> String;
}

/// Drains a download stream into one contiguous buffer.
pub async fn read_to_end(mut stream: ByteStream) -> StorageResult<Bytes> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf.freeze())
}

/// Builds and initialises the configured backend.
///
/// Any error here means the service cannot operate and must not start.
pub async fn connect(config: &BackendConfig) -> StorageResult<Arc<dyn StorageProvider>> {
    let provider: Arc<dyn StorageProvider> = match config {
        BackendConfig::Azure(cfg) => Arc::new(azure::AzureBlobProvider::new(cfg)?),
        BackendConfig::Minio(cfg) => Arc::new(minio::MinioProvider::new(cfg)),
        BackendConfig::Memory { container } => {
            Arc::new(memory::InMemoryProvider::new(container.clone()))
        }
    };

    provider.initialize().await?;
    Ok(provider)
}
