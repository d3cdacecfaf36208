//! Defines routes for all QR code operations.
//!
//! ## Structure
//! - **Collection endpoint**
//!   - `POST   /api/qrcodes`: render and store a new code
//!
//! - **Code endpoints**
//!   - `PUT    /api/qrcodes/{code_id}`: upload a pre-generated PNG
//!   - `GET    /api/qrcodes/{code_id}`: stream the image (counts an access)
//!   - `HEAD   /api/qrcodes/{code_id}`: existence check
//!   - `DELETE /api/qrcodes/{code_id}`: remove image and metadata
//!   - `GET    /api/qrcodes/{code_id}/metadata`: metadata record

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        qrcode_handlers::{
            create_qr_code, delete_qr_code, get_qr_code, get_qr_code_metadata, head_qr_code,
            upload_qr_code,
        },
    },
    state::AppState,
};
use axum::{
    Router,
    routing::{get, post, put},
};

/// Build and return the router for the QR code API.
///
/// The router carries shared state (`AppState`) to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/api/qrcodes", post(create_qr_code))
        .route(
            "/api/qrcodes/{code_id}",
            put(upload_qr_code)
                .get(get_qr_code)
                .head(head_qr_code)
                .delete(delete_qr_code),
        )
        .route("/api/qrcodes/{code_id}/metadata", get(get_qr_code_metadata))
}
