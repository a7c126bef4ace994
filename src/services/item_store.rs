//! Where collection records live.
//!
//! Two implementations share the [`ItemStore`] contract: a local one that keeps
//! every item in a single key-value slot, and a remote one backed by a REST
//! table on the hosted backend. `main` picks one at startup.

use crate::{
    errors::{CatalogError, CatalogResult},
    models::{
        item::{CollectionItem, ItemRecord, LOCAL_ITEMS_SLOT, sort_newest_first},
        user::Session,
    },
    services::{
        backend_client::{BackendClient, BackendFailure},
        kv_store::KeyValueStore,
    },
};
use async_trait::async_trait;
use reqwest::Method;
use tracing::{debug, instrument};

/// Record storage. Every call is atomic from the caller's point of view.
#[async_trait]
pub trait ItemStore: Send + Sync {
    fn backend_tag(&self) -> &'static str;

    /// All items visible to the session owner, newest purchase first.
    async fn list(&self, session: &Session) -> CatalogResult<Vec<CollectionItem>>;

    async fn insert(&self, session: &Session, item: &CollectionItem) -> CatalogResult<()>;

    /// Overwrite the record with the same id. Unknown ids are left alone.
    async fn replace(&self, session: &Session, item: &CollectionItem) -> CatalogResult<()>;

    /// Delete the record with the same id. Unknown ids are left alone.
    async fn remove(&self, session: &Session, item: &CollectionItem) -> CatalogResult<()>;
}

/// Keeps the whole collection as one JSON array in a local slot.
#[derive(Clone)]
pub struct LocalItemStore {
    kv: KeyValueStore,
    slot: String,
}

impl LocalItemStore {
    pub fn new(kv: KeyValueStore) -> Self {
        Self {
            kv,
            slot: LOCAL_ITEMS_SLOT.to_string(),
        }
    }
}

#[async_trait]
impl ItemStore for LocalItemStore {
    fn backend_tag(&self) -> &'static str {
        "local"
    }

    async fn list(&self, _session: &Session) -> CatalogResult<Vec<CollectionItem>> {
        let mut items: Vec<CollectionItem> = self.kv.get(&self.slot).await?.unwrap_or_default();
        sort_newest_first(&mut items);
        Ok(items)
    }

    async fn insert(&self, _session: &Session, item: &CollectionItem) -> CatalogResult<()> {
        self.kv
            .update(&self.slot, |items: &mut Vec<CollectionItem>| {
                if items.iter().any(|existing| existing.id == item.id) {
                    return Err(CatalogError::InvalidItem(format!(
                        "item {} already exists",
                        item.id
                    )));
                }
                items.push(item.clone());
                Ok(())
            })
            .await
    }

    async fn replace(&self, _session: &Session, item: &CollectionItem) -> CatalogResult<()> {
        self.kv
            .update(&self.slot, |items: &mut Vec<CollectionItem>| {
                match items.iter_mut().find(|existing| existing.id == item.id) {
                    Some(existing) => *existing = item.clone(),
                    None => debug!(id = %item.id, "replace: no local item with this id"),
                }
                Ok::<_, CatalogError>(())
            })
            .await
    }

    async fn remove(&self, _session: &Session, item: &CollectionItem) -> CatalogResult<()> {
        self.kv
            .update(&self.slot, |items: &mut Vec<CollectionItem>| {
                items.retain(|existing| existing.id != item.id);
                Ok::<_, CatalogError>(())
            })
            .await
    }
}

/// Items stored in a REST table, one row per item, scoped by `owner_id`.
#[derive(Clone)]
pub struct RemoteItemStore {
    client: BackendClient,
}

impl RemoteItemStore {
    pub fn new(client: BackendClient) -> Self {
        Self { client }
    }

    fn table(&self) -> &str {
        &self.client.config.items_table
    }

    fn row_filter(session: &Session, item: &CollectionItem) -> [(&'static str, String); 2] {
        [
            ("id", format!("eq.{}", item.id)),
            ("owner_id", format!("eq.{}", session.user_id)),
        ]
    }
}

fn access_token(session: &Session) -> CatalogResult<&str> {
    if !session.is_valid() {
        return Err(CatalogError::NotAuthenticated);
    }
    session
        .access_token
        .as_deref()
        .ok_or(CatalogError::NotAuthenticated)
}

pub(crate) fn store_error(failure: BackendFailure) -> CatalogError {
    match failure {
        BackendFailure::Unauthorized => CatalogError::NotAuthenticated,
        other => CatalogError::StoreUnavailable(other.to_string()),
    }
}

#[async_trait]
impl ItemStore for RemoteItemStore {
    fn backend_tag(&self) -> &'static str {
        "remote"
    }

    #[instrument(skip(self, session), fields(owner = %session.user_id))]
    async fn list(&self, session: &Session) -> CatalogResult<Vec<CollectionItem>> {
        let token = access_token(session)?;
        let url = self
            .client
            .table_url(
                self.table(),
                &[
                    ("select", "*".into()),
                    ("owner_id", format!("eq.{}", session.user_id)),
                    ("order", "purchase_date.desc".into()),
                ],
            )
            .map_err(store_error)?;
        let response = self
            .client
            .send(self.client.authorized(Method::GET, url, token))
            .await
            .map_err(store_error)?;
        let rows: Vec<ItemRecord> = response
            .json()
            .await
            .map_err(|e| store_error(BackendFailure::Decode(e.to_string())))?;
        debug!(count = rows.len(), "fetched remote items");

        let mut items: Vec<CollectionItem> = rows.into_iter().map(Into::into).collect();
        sort_newest_first(&mut items);
        Ok(items)
    }

    #[instrument(skip(self, session, item), fields(id = %item.id))]
    async fn insert(&self, session: &Session, item: &CollectionItem) -> CatalogResult<()> {
        let token = access_token(session)?;
        let url = self
            .client
            .table_url(self.table(), &[])
            .map_err(store_error)?;
        let request = self
            .client
            .authorized(Method::POST, url, token)
            .header("Prefer", "return=minimal")
            .json(&item.to_record(session.user_id));
        self.client.send(request).await.map_err(store_error)?;
        Ok(())
    }

    #[instrument(skip(self, session, item), fields(id = %item.id))]
    async fn replace(&self, session: &Session, item: &CollectionItem) -> CatalogResult<()> {
        let token = access_token(session)?;
        let url = self
            .client
            .table_url(self.table(), &Self::row_filter(session, item))
            .map_err(store_error)?;
        let request = self
            .client
            .authorized(Method::PATCH, url, token)
            .header("Prefer", "return=minimal")
            .json(&item.to_record(session.user_id));
        self.client.send(request).await.map_err(store_error)?;
        Ok(())
    }

    #[instrument(skip(self, session, item), fields(id = %item.id))]
    async fn remove(&self, session: &Session, item: &CollectionItem) -> CatalogResult<()> {
        let token = access_token(session)?;
        let url = self
            .client
            .table_url(self.table(), &Self::row_filter(session, item))
            .map_err(store_error)?;
        self.client
            .send(self.client.authorized(Method::DELETE, url, token))
            .await
            .map_err(store_error)?;
        Ok(())
    }
}
