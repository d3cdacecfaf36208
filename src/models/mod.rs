//! Core data models for the QR code service.
//!
//! An image object and its JSON metadata sidecar live side by side in the
//! same container; these types describe both and the keys that link them.

pub mod metadata;
pub mod qrcode;
