//! Transient image payloads moving through the upload pipeline.

use bytes::Bytes;
use uuid::Uuid;

/// An image re-encoded into the canonical upload format.
#[derive(Clone, Debug)]
pub struct NormalizedImage {
    pub data: Bytes,
    /// Suggested base name before sanitisation (e.g. `photo_20240101_120000_a1b2c3`).
    pub base_name: String,
    pub extension: String,
}

impl NormalizedImage {
    pub fn content_type(&self) -> &'static str {
        content_type_for(&self.extension)
    }
}

/// Map a file extension to the MIME type sent with the upload.
pub fn content_type_for(extension: &str) -> &'static str {
    match extension.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "heic" => "image/heic",
        _ => "application/octet-stream",
    }
}

/// A payload bound to its destination. Lives only for one upload call.
#[derive(Clone, Debug)]
pub struct UploadedAsset {
    pub payload: Bytes,
    pub content_type: &'static str,
    /// `users/{owner}/{sanitized}.{ext}`
    pub destination: String,
}

impl UploadedAsset {
    pub fn new(image: NormalizedImage, owner_id: Uuid) -> Self {
        let destination = destination_path(owner_id, &image.base_name, &image.extension);
        Self {
            content_type: image.content_type(),
            payload: image.data,
            destination,
        }
    }
}

/// What an uploader hands back after storing an asset.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredAsset {
    /// Value written into `CollectionItem::image_reference`.
    pub reference: String,
    pub size_bytes: u64,
    /// Hex MD5 of the payload.
    pub etag: String,
}

const MAX_BASE_NAME_LEN: usize = 64;

/// Deterministic storage path for an owner's asset.
pub fn destination_path(owner_id: Uuid, base_name: &str, extension: &str) -> String {
    let ext = extension
        .trim_start_matches('.')
        .to_ascii_lowercase()
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect::<String>();
    let ext = if ext.is_empty() { "bin".to_string() } else { ext };
    format!("users/{}/{}.{}", owner_id, sanitize_base_name(base_name), ext)
}

/// Normalize a base name into a safe path segment.
///
/// Lower-cases, maps anything other than ASCII alphanumerics, `-` and `_` to
/// `-`, collapses runs of `-`, truncates to 64 characters and trims leading
/// and trailing `-`/`_`. Never returns an empty string.
pub fn sanitize_base_name(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.to_lowercase().chars() {
        let mapped = if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            c
        } else {
            '-'
        };
        if mapped == '-' && out.ends_with('-') {
            continue;
        }
        out.push(mapped);
    }

    let truncated: String = out.chars().take(MAX_BASE_NAME_LEN).collect();
    let trimmed = truncated.trim_matches(|c| c == '-' || c == '_');
    if trimmed.is_empty() {
        Uuid::new_v4().simple().to_string()
    } else {
        trimmed.to_string()
    }
}
