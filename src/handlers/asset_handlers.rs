//! Serves item photos written by the local uploader.
//! Bodies are streamed from disk rather than buffered.

use crate::{errors::AppError, models::asset::content_type_for, state::AppState};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use chrono::{DateTime, Utc};
use std::{fs::Metadata, io::ErrorKind, path::PathBuf};
use tokio::fs::{self, File};
use tokio_util::io::ReaderStream;

/// `GET /assets/{*path}`
pub async fn get_asset(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Response, AppError> {
    let file_path = locate(&state, &path)?;
    let file = File::open(&file_path).await.map_err(not_found_or_internal)?;
    let meta = file.metadata().await.map_err(not_found_or_internal)?;

    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    *response.status_mut() = StatusCode::OK;
    set_asset_headers(response.headers_mut(), &file_path, &meta);
    Ok(response)
}

/// `HEAD /assets/{*path}` - same headers as GET, no body.
pub async fn head_asset(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Response, AppError> {
    let file_path = locate(&state, &path)?;
    let meta = fs::metadata(&file_path).await.map_err(not_found_or_internal)?;

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    set_asset_headers(response.headers_mut(), &file_path, &meta);
    Ok(response)
}

fn locate(state: &AppState, path: &str) -> Result<PathBuf, AppError> {
    let uploader = state
        .local_assets
        .as_ref()
        .ok_or_else(|| AppError::not_found("images are served by the hosted backend"))?;
    uploader
        .resolve(path)
        .ok_or_else(|| AppError::bad_request("invalid asset path"))
}

fn not_found_or_internal(err: std::io::Error) -> AppError {
    if err.kind() == ErrorKind::NotFound {
        AppError::not_found("asset not found")
    } else {
        AppError::internal(err.to_string())
    }
}

fn set_asset_headers(headers: &mut HeaderMap, path: &std::path::Path, meta: &Metadata) {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(content_type_for(extension)),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(meta.len()));

    if let Ok(modified) = meta.modified() {
        let modified: DateTime<Utc> = modified.into();
        if let Ok(value) =
            HeaderValue::from_str(&modified.format("%a, %d %b %Y %H:%M:%S GMT").to_string())
        {
            headers.insert(header::LAST_MODIFIED, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn headers_follow_extension_and_size() {
        let dir = std::env::temp_dir()
            .join("luxury-catalog-tests")
            .join(format!("asset-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).await.unwrap();
        let file = dir.join("photo.jpg");
        fs::write(&file, b"0123456789").await.unwrap();

        let meta = fs::metadata(&file).await.unwrap();
        let mut headers = HeaderMap::new();
        set_asset_headers(&mut headers, &file, &meta);
        assert_eq!(headers[header::CONTENT_TYPE], "image/jpeg");
        assert_eq!(headers[header::CONTENT_LENGTH], "10");
        assert!(headers.contains_key(header::LAST_MODIFIED));

        let _ = fs::remove_dir_all(&dir).await;
    }

    #[test]
    fn missing_files_are_404() {
        let err = not_found_or_internal(std::io::Error::from(ErrorKind::NotFound));
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        let err = not_found_or_internal(std::io::Error::from(ErrorKind::PermissionDenied));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
