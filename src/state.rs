use std::sync::Arc;

use crate::services::{metadata_service::MetadataService, storage::StorageProvider};

/// Shared handler state.
///
/// The storage handle is initialised once before serving and only read
/// afterwards; cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn StorageProvider>,
    pub metadata: MetadataService,
}

impl AppState {
    pub fn new(storage: Arc<dyn StorageProvider>) -> Self {
        let metadata = MetadataService::new(storage.clone());
        Self { storage, metadata }
    }
}
