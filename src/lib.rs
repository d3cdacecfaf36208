//! QR code generation service backed by pluggable object storage.
//!
//! Images and their JSON metadata sidecars are kept in a single container on
//! either Azure Blob Storage or an S3-compatible store, selected at startup.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;

use axum::Router;

use crate::state::AppState;

/// Builds the complete HTTP application around an initialised backend.
pub fn app(state: AppState) -> Router {
    routes::routes::routes().with_state(state)
}
