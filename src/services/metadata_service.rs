//! Metadata sidecar management.
//!
//! `MetadataService::upsert` is the only writer of metadata records. It is a
//! plain read-modify-write with no locking: two concurrent access events on
//! the same code can both read count `n` and both write `n + 1`, so the
//! counter may under-count under contention (last writer wins).

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    models::{
        metadata::QrMetadata,
        qrcode::{METADATA_CONTENT_TYPE, base_id, metadata_key},
    },
    services::storage::{StorageError, StorageProvider, read_to_end},
};

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("metadata `{key}` is corrupt: {reason}")]
    Corrupt { key: String, reason: String },
}

pub type MetadataResult<T> = Result<T, MetadataError>;

/// Why a record is being written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataEvent {
    /// The image was created or re-uploaded. Existing counters are kept.
    Stored,
    /// The image was served to a client.
    Accessed,
}

#[derive(Clone)]
pub struct MetadataService {
    storage: Arc<dyn StorageProvider>,
}

impl MetadataService {
    pub fn new(storage: Arc<dyn StorageProvider>) -> Self {
        Self { storage }
    }

    /// Creates or updates the sidecar of `code_id`.
    ///
    /// An absent, unreadable or corrupt record is replaced with a fresh one
    /// (`access_count = 1`); `data` and `size` only seed fresh records.
    pub async fn upsert(
        &self,
        code_id: &str,
        data: &str,
        size: u32,
        event: MetadataEvent,
    ) -> MetadataResult<QrMetadata> {
        let key = metadata_key(code_id);
        let now = Utc::now();

        let record = match self.load_key(&key).await {
            Ok(mut existing) => {
                if event == MetadataEvent::Accessed {
                    existing.record_access(now);
                }
                existing
            }
            Err(err) => {
                if !is_absent(&err) {
                    warn!(key = %key, error = %err, "replacing unreadable metadata");
                }
                QrMetadata::new(base_id(code_id), data, size, now)
            }
        };

        let payload = record.to_json().map_err(|err| MetadataError::Corrupt {
            key: key.clone(),
            reason: err.to_string(),
        })?;
        self.storage
            .upload(&key, Bytes::from(payload).into(), Some(METADATA_CONTENT_TYPE))
            .await?;

        debug!(key = %key, access_count = record.access_count, ?event, "metadata written");
        Ok(record)
    }

    /// Reads and decodes the sidecar of `code_id`.
    pub async fn load(&self, code_id: &str) -> MetadataResult<QrMetadata> {
        self.load_key(&metadata_key(code_id)).await
    }

    /// Deletes the sidecar of `code_id` when present; returns whether it existed.
    pub async fn remove(&self, code_id: &str) -> MetadataResult<bool> {
        let key = metadata_key(code_id);
        if !self.storage.exists(&key).await? {
            return Ok(false);
        }
        self.storage.delete(&key).await?;
        Ok(true)
    }

    async fn load_key(&self, key: &str) -> MetadataResult<QrMetadata> {
        if !self.storage.exists(key).await? {
            return Err(StorageError::not_found(key).into());
        }

        // The whole object must be read before decoding.
        let raw = read_to_end(self.storage.download(key).await?).await?;
        QrMetadata::from_json(&raw).map_err(|reason| MetadataError::Corrupt {
            key: key.to_string(),
            reason,
        })
    }
}

fn is_absent(err: &MetadataError) -> bool {
    matches!(err, MetadataError::Storage(inner) if inner.is_not_found())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::storage::memory::InMemoryProvider;

    fn service() -> (MetadataService, InMemoryProvider) {
        let store = InMemoryProvider::default();
        (MetadataService::new(Arc::new(store.clone())), store)
    }

    #[tokio::test]
    async fn first_write_creates_fresh_record() {
        let (meta, store) = service();
        let record = meta
            .upsert("abc.png", "https://example.com", 200, MetadataEvent::Stored)
            .await
            .unwrap();

        assert_eq!(record.code_id, "abc");
        assert_eq!(record.data, "https://example.com");
        assert_eq!(record.size, 200);
        assert_eq!(record.access_count, 1);
        assert_eq!(record.created_at, record.last_accessed);
        assert_eq!(
            store.content_type("abc.metadata").await.as_deref(),
            Some(METADATA_CONTENT_TYPE)
        );
    }

    #[tokio::test]
    async fn repeated_store_keeps_counters_and_creation_time() {
        let (meta, _) = service();
        let first = meta
            .upsert("abc.png", "one", 200, MetadataEvent::Stored)
            .await
            .unwrap();
        meta.upsert("abc.png", "one", 200, MetadataEvent::Accessed)
            .await
            .unwrap();
        let again = meta
            .upsert("abc.png", "two", 500, MetadataEvent::Stored)
            .await
            .unwrap();

        assert_eq!(again.created_at, first.created_at);
        assert_eq!(again.access_count, 2);
        assert_eq!(again.data, "one");
        assert_eq!(again.size, 200);
    }

    #[tokio::test]
    async fn access_increments_by_one() {
        let (meta, _) = service();
        meta.upsert("abc.png", "x", 100, MetadataEvent::Stored)
            .await
            .unwrap();
        for expected in 2..=4 {
            let record = meta
                .upsert("abc.png", "", 0, MetadataEvent::Accessed)
                .await
                .unwrap();
            assert_eq!(record.access_count, expected);
            assert!(record.created_at <= record.last_accessed);
        }
        assert_eq!(meta.load("abc.png").await.unwrap().access_count, 4);
    }

    #[tokio::test]
    async fn corrupt_record_is_replaced_on_write_and_hidden_on_read() {
        let (meta, store) = service();
        store.insert_raw("abc.metadata", "{'access_count': 3}").await;

        let err = meta.load("abc.png").await.unwrap_err();
        assert!(matches!(err, MetadataError::Corrupt { .. }));

        let record = meta
            .upsert("abc.png", "", 0, MetadataEvent::Accessed)
            .await
            .unwrap();
        assert_eq!(record.access_count, 1);
        assert_eq!(meta.load("abc.png").await.unwrap(), record);
    }

    #[tokio::test]
    async fn remove_reports_presence() {
        let (meta, store) = service();
        assert!(!meta.remove("abc.png").await.unwrap());

        meta.upsert("abc.png", "x", 100, MetadataEvent::Stored)
            .await
            .unwrap();
        assert!(meta.remove("abc.png").await.unwrap());
        assert!(store.is_empty().await);
        assert!(matches!(
            meta.load("abc.png").await.unwrap_err(),
            MetadataError::Storage(StorageError::NotFound { .. })
        ));
    }
}
