//! src/services/image_pipeline.rs
//!
//! Turns a selected photo into a stored asset. `prepare` normalizes raw bytes
//! into a JPEG; an [`AssetUploader`] then writes it beneath
//! `users/{owner}/{name}.{ext}` either on local disk or in the hosted bucket.

use crate::{
    errors::{CatalogError, CatalogResult},
    models::{
        asset::{NormalizedImage, StoredAsset, UploadedAsset},
        user::Session,
    },
    services::backend_client::{BackendClient, BackendFailure, public_object_url},
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use image::{DynamicImage, codecs::jpeg::JpegEncoder};
use reqwest::Method;
use std::{
    io,
    path::{Component, Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Decode `raw` and re-encode it as JPEG at `quality`.
///
/// Returns `None` when the bytes are not an image we can decode.
pub fn prepare(raw: &[u8], quality: u8) -> Option<NormalizedImage> {
    let decoded = image::load_from_memory(raw).ok()?;
    // JPEG has no alpha channel
    let rgb = DynamicImage::ImageRgb8(decoded.to_rgb8());

    let mut encoded = Vec::new();
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut encoded, quality))
        .ok()?;

    Some(NormalizedImage {
        data: Bytes::from(encoded),
        base_name: generate_base_name(),
        extension: "jpg".into(),
    })
}

fn generate_base_name() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "photo_{}_{}",
        Utc::now().format("%Y%m%d_%H%M%S"),
        &suffix[..6]
    )
}

/// Persists a prepared asset and returns its reference.
#[async_trait]
pub trait AssetUploader: Send + Sync {
    fn backend_tag(&self) -> &'static str;

    async fn store(&self, session: &Session, asset: UploadedAsset) -> CatalogResult<StoredAsset>;
}

/// Writes assets beneath a directory on local disk. The reference is the
/// storage-relative destination path.
#[derive(Clone, Debug)]
pub struct LocalAssetUploader {
    pub root: PathBuf,
}

impl LocalAssetUploader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a storage-relative path beneath `root`, refusing anything that
    /// could escape it.
    pub fn resolve(&self, relative: &str) -> Option<PathBuf> {
        if relative.is_empty()
            || relative.len() > 1024
            || relative.bytes().any(|b| b.is_ascii_control() || b == b'\\')
        {
            return None;
        }
        let rel = Path::new(relative);
        if !rel
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
        {
            return None;
        }
        Some(self.root.join(rel))
    }
}

#[async_trait]
impl AssetUploader for LocalAssetUploader {
    fn backend_tag(&self) -> &'static str {
        "local"
    }

    /// Write to a temporary file, fsync, then rename into place.
    #[instrument(skip(self, _session, asset), fields(path = %asset.destination))]
    async fn store(&self, _session: &Session, asset: UploadedAsset) -> CatalogResult<StoredAsset> {
        let file_path = self
            .resolve(&asset.destination)
            .ok_or_else(|| CatalogError::UploadFailed("unsafe destination path".into()))?;
        write_atomically(&file_path, &asset.payload)
            .await
            .map_err(|e| CatalogError::UploadFailed(e.to_string()))?;
        debug!("stored asset at {}", file_path.display());

        Ok(StoredAsset {
            reference: asset.destination,
            size_bytes: asset.payload.len() as u64,
            etag: format!("{:x}", md5::compute(&asset.payload)),
        })
    }
}

async fn write_atomically(file_path: &Path, payload: &[u8]) -> io::Result<()> {
    let parent = file_path
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| io::Error::other("asset path missing parent directory"))?;
    fs::create_dir_all(&parent).await?;
    let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

    let result = async {
        let mut file = File::create(&tmp_path).await?;
        file.write_all(payload).await?;
        file.flush().await?;
        file.sync_all().await?;
        fs::rename(&tmp_path, file_path).await
    }
    .await;

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path).await;
    }
    result
}

/// Uploads into the hosted storage bucket and returns the public URL.
#[derive(Clone)]
pub struct RemoteAssetUploader {
    client: BackendClient,
}

impl RemoteAssetUploader {
    pub fn new(client: BackendClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AssetUploader for RemoteAssetUploader {
    fn backend_tag(&self) -> &'static str {
        "remote"
    }

    #[instrument(skip(self, session, asset), fields(path = %asset.destination))]
    async fn store(&self, session: &Session, asset: UploadedAsset) -> CatalogResult<StoredAsset> {
        let token = match (&session.access_token, session.is_valid()) {
            (Some(token), true) => token.as_str(),
            _ => return Err(CatalogError::NotAuthenticated),
        };
        let config = &self.client.config;
        let url = self
            .client
            .url(&format!(
                "storage/v1/object/{}/{}",
                config.storage_bucket, asset.destination
            ))
            .map_err(upload_error)?;
        let etag = format!("{:x}", md5::compute(&asset.payload));
        let size_bytes = asset.payload.len() as u64;

        let request = self
            .client
            .authorized(Method::POST, url, token)
            .header("content-type", asset.content_type)
            .header("x-upsert", "true")
            .body(asset.payload);
        self.client.send(request).await.map_err(upload_error)?;

        let public = public_object_url(config, &asset.destination)
            .map_err(|e| CatalogError::UploadFailed(e.to_string()))?;
        Ok(StoredAsset {
            reference: public.to_string(),
            size_bytes,
            etag,
        })
    }
}

fn upload_error(failure: BackendFailure) -> CatalogError {
    match failure {
        BackendFailure::Unauthorized => CatalogError::NotAuthenticated,
        other => CatalogError::UploadFailed(other.to_string()),
    }
}

/// Normalization settings plus the uploader chosen at startup.
#[derive(Clone)]
pub struct ImagePipeline {
    uploader: Arc<dyn AssetUploader>,
    quality: u8,
}

impl ImagePipeline {
    pub fn new(uploader: Arc<dyn AssetUploader>, quality: u8) -> Self {
        Self { uploader, quality }
    }

    /// Decode and re-encode off the async runtime.
    pub async fn prepare(&self, raw: Bytes) -> Option<NormalizedImage> {
        let quality = self.quality;
        tokio::task::spawn_blocking(move || prepare(&raw, quality))
            .await
            .ok()
            .flatten()
    }

    /// Store `image` for the session owner and return the reference string.
    pub async fn upload(&self, image: NormalizedImage, session: &Session) -> CatalogResult<String> {
        let asset = UploadedAsset::new(image, session.user_id);
        let stored = self.uploader.store(session, asset).await?;
        info!(
            backend = self.uploader.backend_tag(),
            size = stored.size_bytes,
            etag = %stored.etag,
            "uploaded item image"
        );
        Ok(stored.reference)
    }
}

#[cfg(test)]
pub(crate) fn sample_png() -> Vec<u8> {
    let img = image::RgbaImage::from_fn(8, 6, |x, y| image::Rgba([x as u8 * 30, y as u8 * 40, 90, 200]));
    let mut out = std::io::Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img)
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}
