//! Defines routes for the catalog service.
//!
//! ## Structure
//! - **Health**: `GET /healthz`, `GET /readyz`
//! - **Collection**
//!   - `GET    /items`      reload and return the view
//!   - `GET    /view`       current view, no I/O
//!   - `DELETE /view/error` dismiss the last error
//!   - `GET    /categories` known item categories
//!   - `POST   /items`      multipart create
//!   - `PUT    /items/{id}` multipart update
//!   - `DELETE /items/{id}` delete
//! - **Assets**: `GET|HEAD /assets/{*path}` for locally stored photos
//! - **Auth**: `POST /auth/{register,login,logout,oauth/callback}`, `GET /auth/session`

use crate::{
    handlers::{
        asset_handlers::{get_asset, head_asset},
        auth_handlers::{current_session, login, logout, oauth_callback, register},
        health_handlers::{healthz, readyz},
        item_handlers::{
            clear_error, create_item, current_view, delete_item, list_categories, list_items,
            update_item,
        },
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
};

/// Ceiling for multipart item forms, photo included.
const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/items", get(list_items).post(create_item))
        .route("/items/{id}", put(update_item).delete(delete_item))
        .route("/view", get(current_view))
        .route("/view/error", delete(clear_error))
        .route("/categories", get(list_categories))
        .route("/assets/{*path}", get(get_asset).head(head_asset))
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/oauth/callback", post(oauth_callback))
        .route("/auth/session", get(current_session))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}
