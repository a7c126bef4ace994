//! In-memory view of the collection, as a UI shell would render it.
//!
//! The lock is only taken to flip flags or swap the item list; it is never
//! held while the sync service is awaited, so overlapping operations simply
//! race and the last one to finish wins.

use crate::{
    errors::{CatalogResult, Locale},
    models::item::CollectionItem,
    services::sync_service::ItemSyncService,
};
use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ViewState {
    pub items: Vec<CollectionItem>,
    pub is_loading: bool,
    pub error_message: Option<String>,
}

#[derive(Clone)]
pub struct CollectionViewModel {
    state: Arc<RwLock<ViewState>>,
    sync: ItemSyncService,
    locale: Locale,
}

impl CollectionViewModel {
    pub fn new(sync: ItemSyncService, locale: Locale) -> Self {
        Self {
            state: Arc::new(RwLock::new(ViewState::default())),
            sync,
            locale,
        }
    }

    pub async fn snapshot(&self) -> ViewState {
        self.state.read().await.clone()
    }

    pub async fn load(&self) -> CatalogResult<ViewState> {
        self.run(|sync, owner| async move { sync.fetch_all(owner).await })
            .await
    }

    pub async fn add(&self, item: CollectionItem, image: Option<Bytes>) -> CatalogResult<ViewState> {
        self.run(|sync, owner| async move { sync.create(owner, item, image).await })
            .await
    }

    pub async fn update(
        &self,
        item: CollectionItem,
        image: Option<Bytes>,
        remove_image: bool,
    ) -> CatalogResult<ViewState> {
        self.run(|sync, owner| async move { sync.update(owner, item, image, remove_image).await })
            .await
    }

    pub async fn delete(&self, item: CollectionItem) -> CatalogResult<ViewState> {
        self.run(|sync, owner| async move { sync.delete(owner, &item).await })
            .await
    }

    /// Look an item up in the current list. A miss reloads from the store
    /// once, since the list may be stale.
    pub async fn find(&self, id: Uuid) -> CatalogResult<Option<CollectionItem>> {
        if let Some(item) = self.cached(id).await {
            return Ok(Some(item));
        }
        self.load().await?;
        Ok(self.cached(id).await)
    }

    async fn cached(&self, id: Uuid) -> Option<CollectionItem> {
        self.state
            .read()
            .await
            .items
            .iter()
            .find(|item| item.id == id)
            .cloned()
    }

    pub async fn clear_error(&self) {
        self.state.write().await.error_message = None;
    }

    /// Forget everything, e.g. after sign-out.
    pub async fn reset(&self) {
        *self.state.write().await = ViewState::default();
    }

    async fn run<F, Fut>(&self, op: F) -> CatalogResult<ViewState>
    where
        F: FnOnce(ItemSyncService, Uuid) -> Fut,
        Fut: Future<Output = CatalogResult<Vec<CollectionItem>>>,
    {
        {
            let mut state = self.state.write().await;
            state.is_loading = true;
            state.error_message = None;
        }

        let result = match self.sync.session().await {
            Ok(session) => op(self.sync.clone(), session.user_id).await,
            Err(err) => Err(err),
        };

        let mut state = self.state.write().await;
        state.is_loading = false;
        match result {
            Ok(items) => {
                debug!(count = items.len(), "view refreshed");
                state.items = items;
                Ok(state.clone())
            }
            Err(err) => {
                state.error_message = Some(err.user_message(self.locale).to_string());
                Err(err)
            }
        }
    }
}
