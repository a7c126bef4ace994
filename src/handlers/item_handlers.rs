//! HTTP handlers for the collection.
//!
//! Mutations arrive as multipart forms: an `item` part holding JSON, an
//! optional `image` part with the raw photo and, for updates, an optional
//! `remove_image` flag. Every handler answers with the refreshed view.

use crate::{
    errors::AppError,
    models::item::{Category, CollectionItem},
    services::view_state::ViewState,
    state::AppState,
};
use axum::{
    Json,
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

/// Item fields as sent by a client.
#[derive(Debug, Deserialize)]
pub struct ItemInput {
    pub name: String,
    pub brand: String,
    #[serde(default = "default_category")]
    pub category: Category,
    pub price: Decimal,
    pub purchase_date: DateTime<Utc>,
    #[serde(default)]
    pub description: Option<String>,
    /// Only read on update; carries the reference the client last saw.
    #[serde(default)]
    pub image_reference: Option<String>,
}

fn default_category() -> Category {
    Category::Other
}

impl ItemInput {
    fn description(&self) -> Option<&str> {
        self.description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
    }

    /// A fresh item with its own id and no photo.
    fn into_new_item(self) -> CollectionItem {
        let item = CollectionItem::new(
            self.name.trim(),
            self.brand.trim(),
            self.category,
            self.price,
            self.purchase_date,
        );
        match self.description() {
            Some(description) => item.with_description(description),
            None => item,
        }
    }

    fn into_item(mut self, id: Uuid) -> CollectionItem {
        let image_reference = self.image_reference.take();
        CollectionItem {
            id,
            image_reference,
            ..self.into_new_item()
        }
    }
}

/// Parts collected from a multipart item form.
#[derive(Debug, Default)]
pub struct ItemForm {
    pub item: Option<ItemInput>,
    pub image: Option<Bytes>,
    pub remove_image: bool,
}

impl ItemForm {
    async fn read(mut multipart: Multipart) -> Result<Self, AppError> {
        let mut form = ItemForm::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| AppError::bad_request(e.to_string()))?
        {
            match field.name().unwrap_or_default() {
                "item" => {
                    let text = field
                        .text()
                        .await
                        .map_err(|e| AppError::bad_request(e.to_string()))?;
                    form.item = Some(parse_item(&text)?);
                }
                "image" => {
                    let data = field
                        .bytes()
                        .await
                        .map_err(|e| AppError::bad_request(e.to_string()))?;
                    form.image = Some(data).filter(|d| !d.is_empty());
                }
                "remove_image" => {
                    let text = field
                        .text()
                        .await
                        .map_err(|e| AppError::bad_request(e.to_string()))?;
                    form.remove_image = parse_flag(&text);
                }
                other => debug!("ignoring multipart field `{}`", other),
            }
        }
        Ok(form)
    }

    fn take_item(&mut self) -> Result<ItemInput, AppError> {
        self.item
            .take()
            .ok_or_else(|| AppError::bad_request("missing `item` part"))
    }
}

fn parse_item(text: &str) -> Result<ItemInput, AppError> {
    serde_json::from_str(text).map_err(|e| AppError::bad_request(format!("invalid item: {}", e)))
}

fn parse_flag(text: &str) -> bool {
    matches!(
        text.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "on" | "yes"
    )
}

/// `GET /items` - reload from the store.
pub async fn list_items(State(state): State<AppState>) -> Result<Json<ViewState>, AppError> {
    state
        .view
        .load()
        .await
        .map(Json)
        .map_err(|e| state.catalog_error(e))
}

/// `GET /view` - the current view without touching the store.
pub async fn current_view(State(state): State<AppState>) -> Json<ViewState> {
    Json(state.view.snapshot().await)
}

/// `DELETE /view/error` - dismiss the last error message.
pub async fn clear_error(State(state): State<AppState>) -> Json<ViewState> {
    state.view.clear_error().await;
    Json(state.view.snapshot().await)
}

/// `GET /categories`
pub async fn list_categories() -> Json<Vec<&'static str>> {
    Json(Category::ALL.iter().map(Category::as_str).collect())
}

/// `POST /items`
pub async fn create_item(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut form = ItemForm::read(multipart).await?;
    let item = form.take_item()?.into_new_item();

    let view = state
        .view
        .add(item, form.image)
        .await
        .map_err(|e| state.catalog_error(e))?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// `PUT /items/{id}`
pub async fn update_item(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    multipart: Multipart,
) -> Result<Json<ViewState>, AppError> {
    let form = ItemForm::read(multipart).await?;
    save_update(&state, id, form).await.map(Json)
}

/// Without a reference from the client, keep whatever the store has.
async fn save_update(state: &AppState, id: Uuid, mut form: ItemForm) -> Result<ViewState, AppError> {
    let input = form.take_item()?;
    let carried = match &input.image_reference {
        Some(reference) => Some(reference.clone()),
        None => state
            .view
            .find(id)
            .await
            .map_err(|e| state.catalog_error(e))?
            .and_then(|existing| existing.image_reference),
    };
    let mut item = input.into_item(id);
    item.image_reference = carried;

    state
        .view
        .update(item, form.image, form.remove_image)
        .await
        .map_err(|e| state.catalog_error(e))
}

/// `DELETE /items/{id}` - an unknown id just reloads.
pub async fn delete_item(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ViewState>, AppError> {
    let found = state
        .view
        .find(id)
        .await
        .map_err(|e| state.catalog_error(e))?;
    match found {
        Some(item) => state
            .view
            .delete(item)
            .await
            .map(Json)
            .map_err(|e| state.catalog_error(e)),
        // find has already reloaded on the miss
        None => Ok(Json(state.view.snapshot().await)),
    }
}
