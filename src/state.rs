//! Shared application state handed to every handler.

use crate::{
    config::AppConfig,
    errors::{AppError, AuthError, CatalogError, Locale},
    services::{
        auth_service::AuthService, image_pipeline::LocalAssetUploader, kv_store::KeyValueStore,
        view_state::CollectionViewModel,
    },
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub kv: KeyValueStore,
    pub auth: Arc<AuthService>,
    pub view: CollectionViewModel,
    /// Set when images are stored on local disk and served from `/assets`.
    pub local_assets: Option<LocalAssetUploader>,
}

impl AppState {
    pub fn locale(&self) -> Locale {
        self.config.locale
    }

    pub fn catalog_error(&self, err: CatalogError) -> AppError {
        tracing::debug!("request failed: {}", err);
        AppError::from_catalog(&err, self.locale())
    }

    pub fn auth_error(&self, err: AuthError) -> AppError {
        tracing::debug!("auth request failed: {}", err);
        AppError::from_auth(&err, self.locale())
    }
}
