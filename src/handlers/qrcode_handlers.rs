//! HTTP handlers for QR code operations.
//!
//! Every handler follows the same ordering: the image object is written
//! before its metadata sidecar and deleted before it, so a reader may briefly
//! observe an image without metadata but never metadata without an image
//! that was successfully stored.

use std::io::Cursor;

use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, State, rejection::JsonRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::{
    errors::AppError,
    models::{
        metadata::QrMetadata,
        qrcode::{
            DEFAULT_SIZE, IMAGE_CONTENT_TYPE, QrCodeRequest, QrCodeResponse, new_code_id,
            validate_code_id, validate_size,
        },
    },
    services::{
        metadata_service::MetadataEvent,
        qr_service::{self, RenderError},
        storage::UploadSource,
    },
    state::AppState,
};

const DATA_HEADER: &str = "x-qr-data";
const SIZE_HEADER: &str = "x-qr-size";
const FILE_FIELD: &str = "file";

/// `POST /api/qrcodes`: render, store and describe a new code.
pub async fn create_qr_code(
    State(state): State<AppState>,
    payload: Result<Json<QrCodeRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(request) = payload?;
    validate_size(request.size).map_err(AppError::bad_request)?;

    let data = request.data.clone();
    let size = request.size;
    let png = tokio::task::spawn_blocking(move || qr_service::render(&data, size))
        .await
        .map_err(|err| AppError::internal(format!("render task failed: {}", err)))?
        .map_err(|err| match err {
            RenderError::Encode(_) => AppError::bad_request(err.to_string()),
            RenderError::Png(_) => AppError::internal(err.to_string()),
        })?;

    let code_id = new_code_id();
    let storage_url = state
        .storage
        .upload(&code_id, Bytes::from(png).into(), Some(IMAGE_CONTENT_TYPE))
        .await?;
    state
        .metadata
        .upsert(&code_id, &request.data, request.size, MetadataEvent::Stored)
        .await?;

    info!(code_id = %code_id, size, storage_url = %storage_url, "qr code created");
    Ok((StatusCode::CREATED, Json(QrCodeResponse::new(code_id))))
}

/// `PUT /api/qrcodes/{code_id}`: store a pre-generated PNG.
///
/// Hints for the metadata record come from the `X-Qr-Data` and `X-Qr-Size`
/// headers. Nothing is written unless the whole request validates.
pub async fn upload_qr_code(
    State(state): State<AppState>,
    Path(code_id): Path<String>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    validate_code_id(&code_id).map_err(AppError::bad_request)?;
    let data = header_str(&headers, DATA_HEADER)?.unwrap_or_default();
    let size = match header_str(&headers, SIZE_HEADER)? {
        Some(raw) => raw
            .trim()
            .parse::<u32>()
            .map_err(|_| AppError::bad_request("X-Qr-Size must be an integer"))?,
        None => DEFAULT_SIZE,
    };
    validate_size(size).map_err(AppError::bad_request)?;

    let image = read_png_field(&mut multipart).await?;
    debug!(code_id = %code_id, len = image.len(), "received pre-generated image");

    let storage_url = state
        .storage
        .upload(
            &code_id,
            UploadSource::stream(Cursor::new(image)),
            Some(IMAGE_CONTENT_TYPE),
        )
        .await?;
    state
        .metadata
        .upsert(&code_id, &data, size, MetadataEvent::Stored)
        .await?;

    info!(code_id = %code_id, storage_url = %storage_url, "qr code uploaded");
    Ok((StatusCode::CREATED, Json(QrCodeResponse::new(code_id))))
}

/// `GET /api/qrcodes/{code_id}`: stream the image and count the access.
pub async fn get_qr_code(
    State(state): State<AppState>,
    Path(code_id): Path<String>,
) -> Result<Response, AppError> {
    ensure_image_key(&code_id)?;
    if !state.storage.exists(&code_id).await? {
        return Err(AppError::not_found("QR code not found"));
    }

    // Best effort: a failed counter update must not hide the image.
    if let Err(err) = state
        .metadata
        .upsert(&code_id, "", 0, MetadataEvent::Accessed)
        .await
    {
        warn!(code_id = %code_id, error = %err, "failed to record access");
    }

    let chunks = state.storage.download(&code_id).await?;
    let mut response = Response::new(Body::from_stream(chunks));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(IMAGE_CONTENT_TYPE),
    );
    Ok(response)
}

/// `GET /api/qrcodes/{code_id}/metadata`
pub async fn get_qr_code_metadata(
    State(state): State<AppState>,
    Path(code_id): Path<String>,
) -> Result<Json<QrMetadata>, AppError> {
    ensure_image_key(&code_id)?;
    let record = state.metadata.load(&code_id).await?;
    Ok(Json(record))
}

/// `HEAD /api/qrcodes/{code_id}`: existence check, no body.
pub async fn head_qr_code(
    State(state): State<AppState>,
    Path(code_id): Path<String>,
) -> Result<StatusCode, AppError> {
    ensure_image_key(&code_id)?;
    if state.storage.exists(&code_id).await? {
        Ok(StatusCode::OK)
    } else {
        Err(AppError::not_found("QR code not found"))
    }
}

/// `DELETE /api/qrcodes/{code_id}`: remove the image, then its sidecar.
///
/// A missing image and a failure halfway through are both reported as 404.
pub async fn delete_qr_code(
    State(state): State<AppState>,
    Path(code_id): Path<String>,
) -> Result<StatusCode, AppError> {
    ensure_image_key(&code_id)?;
    state.storage.delete(&code_id).await?;
    let had_metadata = state.metadata.remove(&code_id).await?;

    info!(code_id = %code_id, had_metadata, "qr code deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Sidecars and malformed keys are never addressable as images.
fn ensure_image_key(code_id: &str) -> Result<(), AppError> {
    validate_code_id(code_id).map_err(|reason| {
        debug!(code_id = %code_id, reason = %reason, "rejecting non-image key");
        AppError::not_found("QR code not found")
    })
}

fn header_str(headers: &HeaderMap, name: &str) -> Result<Option<String>, AppError> {
    headers
        .get(name)
        .map(|value| {
            value
                .to_str()
                .map(str::to_string)
                .map_err(|_| AppError::bad_request(format!("{} must be valid text", name)))
        })
        .transpose()
}

/// Pulls the uploaded file out of the form, insisting on a PNG part.
async fn read_png_field(multipart: &mut Multipart) -> Result<Bytes, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(err.body_text()))?
    {
        if field.name() != Some(FILE_FIELD) && field.file_name().is_none() {
            continue;
        }

        if field.content_type() != Some(IMAGE_CONTENT_TYPE) {
            return Err(AppError::bad_request("Only PNG images are supported"));
        }

        return field
            .bytes()
            .await
            .map_err(|err| AppError::bad_request(err.body_text()));
    }

    Err(AppError::bad_request("missing `file` part"))
}
