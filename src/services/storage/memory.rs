use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, stream};
use tokio::sync::RwLock;
use tracing::debug;

use super::{
    ByteStream, DEFAULT_CONTENT_TYPE, DOWNLOAD_CHUNK_SIZE, StorageError, StorageProvider,
    StorageResult, UploadSource,
};

/// Process-local backend for tests and local development.
///
/// Objects live in a `HashMap` behind a `RwLock`; nothing survives a restart.
#[derive(Clone)]
pub struct InMemoryProvider {
    container: String,
    objects: Arc<RwLock<HashMap<String, StoredObject>>>,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    content_type: String,
}

impl InMemoryProvider {
    pub fn new(container: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            objects: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Content type recorded for `key`, if present.
    pub async fn content_type(&self, key: &str) -> Option<String> {
        self.objects
            .read()
            .await
            .get(key)
            .map(|obj| obj.content_type.clone())
    }

    /// Writes raw bytes under `key`, bypassing the upload path.
    pub async fn insert_raw(&self, key: &str, data: impl Into<Bytes>) {
        self.objects.write().await.insert(
            key.to_string(),
            StoredObject {
                data: data.into(),
                content_type: DEFAULT_CONTENT_TYPE.to_string(),
            },
        );
    }
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new("qrcodes")
    }
}

#[async_trait]
impl StorageProvider for InMemoryProvider {
    async fn initialize(&self) -> StorageResult<()> {
        debug!(container = %self.container, "in-memory storage ready");
        Ok(())
    }

    async fn upload(
        &self,
        key: &str,
        source: UploadSource,
        content_type: Option<&str>,
    ) -> StorageResult<String> {
        let (data, len) = source.into_sized_bytes().await?;
        debug!(key, len, "storing object in memory");

        self.objects.write().await.insert(
            key.to_string(),
            StoredObject {
                data,
                content_type: content_type.unwrap_or(DEFAULT_CONTENT_TYPE).to_string(),
            },
        );

        Ok(self.resolve_url(key))
    }

    async fn download(&self, key: &str) -> StorageResult<ByteStream> {
        let data = self
            .objects
            .read()
            .await
            .get(key)
            .map(|obj| obj.data.clone())
            .ok_or_else(|| StorageError::not_found(key))?;

        let chunks: Vec<StorageResult<Bytes>> = (0..data.len())
            .step_by(DOWNLOAD_CHUNK_SIZE)
            .map(|start| {
                let end = (start + DOWNLOAD_CHUNK_SIZE).min(data.len());
                Ok(data.slice(start..end))
            })
            .collect();

        Ok(stream::iter(chunks).boxed())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.objects.read().await.contains_key(key))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.objects
            .write()
            .await
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StorageError::not_found(key))
    }

    fn resolve_url(&self, key: &str) -> String {
        format!("memory://{}/{}", self.container, key)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::services::storage::read_to_end;

    #[tokio::test]
    async fn upload_overwrites_and_returns_url() {
        let store = InMemoryProvider::new("bucket");
        let url = store
            .upload("a.png", Bytes::from_static(b"one").into(), Some("image/png"))
            .await
            .unwrap();
        assert_eq!(url, "memory://bucket/a.png");

        store
            .upload("a.png", Bytes::from_static(b"two").into(), None)
            .await
            .unwrap();

        let data = read_to_end(store.download("a.png").await.unwrap())
            .await
            .unwrap();
        assert_eq!(&data[..], b"two");
        assert_eq!(
            store.content_type("a.png").await.as_deref(),
            Some(DEFAULT_CONTENT_TYPE)
        );
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn download_is_chunked() {
        let store = InMemoryProvider::default();
        let payload = vec![7u8; DOWNLOAD_CHUNK_SIZE * 2 + 10];
        store
            .upload("big", UploadSource::stream(Cursor::new(payload.clone())), None)
            .await
            .unwrap();

        let chunks: Vec<_> = store.download("big").await.unwrap().collect().await;
        assert_eq!(chunks.len(), 3);
        let total: usize = chunks.iter().map(|c| c.as_ref().unwrap().len()).sum();
        assert_eq!(total, payload.len());
    }

    #[tokio::test]
    async fn missing_objects() {
        let store = InMemoryProvider::default();
        assert!(!store.exists("nope").await.unwrap());
        assert!(store.delete("nope").await.unwrap_err().is_not_found());
        assert!(store.download("nope").await.is_err());
    }
}
