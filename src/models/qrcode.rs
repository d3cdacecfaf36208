//! Request/response payloads and object-key rules for QR codes.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Suffix of every generated image key.
pub const IMAGE_SUFFIX: &str = ".png";

/// Suffix of the metadata sidecar key.
pub const METADATA_SUFFIX: &str = ".metadata";

pub const IMAGE_CONTENT_TYPE: &str = "image/png";
pub const METADATA_CONTENT_TYPE: &str = "application/json";

pub const DEFAULT_SIZE: u32 = 300;
pub const MAX_SIZE: u32 = 4096;

const MAX_CODE_ID_LEN: usize = 1024;

/// Body of `POST /api/qrcodes`.
#[derive(Debug, Deserialize)]
pub struct QrCodeRequest {
    pub data: String,
    #[serde(default = "default_size")]
    pub size: u32,
}

/// Body returned by create and upload.
#[derive(Debug, Serialize, Deserialize)]
pub struct QrCodeResponse {
    pub code_id: String,
    pub url: String,
}

impl QrCodeResponse {
    pub fn new(code_id: String) -> Self {
        let url = api_path(&code_id);
        Self { code_id, url }
    }
}

fn default_size() -> u32 {
    DEFAULT_SIZE
}

/// Fresh identifier for a generated image, suffix included.
pub fn new_code_id() -> String {
    format!("{}{}", Uuid::new_v4(), IMAGE_SUFFIX)
}

/// Identifier with the image suffix removed, used to name the sidecar.
pub fn base_id(code_id: &str) -> &str {
    code_id.strip_suffix(IMAGE_SUFFIX).unwrap_or(code_id)
}

/// Sidecar key holding the metadata record of `code_id`.
pub fn metadata_key(code_id: &str) -> String {
    format!("{}{}", base_id(code_id), METADATA_SUFFIX)
}

pub fn api_path(code_id: &str) -> String {
    format!("/api/qrcodes/{}", code_id)
}

/// Checks a requested image dimension.
pub fn validate_size(size: u32) -> Result<(), String> {
    if size == 0 || size > MAX_SIZE {
        return Err(format!("size must be between 1 and {}", MAX_SIZE));
    }
    Ok(())
}

/// Rejects caller-supplied identifiers that cannot be used as object keys.
pub fn validate_code_id(code_id: &str) -> Result<(), String> {
    if code_id.is_empty() {
        return Err("code_id must not be empty".into());
    }
    if code_id.len() > MAX_CODE_ID_LEN {
        return Err(format!("code_id exceeds {} bytes", MAX_CODE_ID_LEN));
    }
    // Separators are banned below, so the id is always a single path segment.
    if matches!(code_id, "." | "..") || code_id.ends_with(METADATA_SUFFIX) {
        return Err("code_id contains a reserved sequence".into());
    }
    if code_id
        .chars()
        .any(|c| c.is_control() || c == '/' || c == '\\')
    {
        return Err("code_id contains an invalid character".into());
    }
    Ok(())
}
