pub mod metadata_service;
pub mod qr_service;
pub mod storage;
