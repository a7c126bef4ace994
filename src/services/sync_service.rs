//! src/services/sync_service.rs
//!
//! Composes the item store and the image pipeline into
//! fetch/create/update/delete. Every mutation is followed by a full fetch so
//! callers always receive the store's view of the collection, newest
//! purchase first.

use crate::{
    config::ImageFailurePolicy,
    errors::{CatalogError, CatalogResult},
    models::{
        item::{CollectionItem, sort_newest_first},
        user::Session,
    },
    services::{auth_service::SessionSource, image_pipeline::ImagePipeline, item_store::ItemStore},
};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct ItemSyncService {
    store: Arc<dyn ItemStore>,
    images: ImagePipeline,
    sessions: Arc<dyn SessionSource>,
    policy: ImageFailurePolicy,
}

impl ItemSyncService {
    pub fn new(
        store: Arc<dyn ItemStore>,
        images: ImagePipeline,
        sessions: Arc<dyn SessionSource>,
        policy: ImageFailurePolicy,
    ) -> Self {
        Self {
            store,
            images,
            sessions,
            policy,
        }
    }

    /// The signed-in session, or `NotAuthenticated`.
    pub async fn session(&self) -> CatalogResult<Session> {
        self.sessions
            .current_session()
            .await
            .ok_or(CatalogError::NotAuthenticated)
    }

    /// The session, provided it belongs to `owner_id`.
    async fn session_for(&self, owner_id: Uuid) -> CatalogResult<Session> {
        let session = self.session().await?;
        if session.user_id != owner_id {
            return Err(CatalogError::NotAuthenticated);
        }
        Ok(session)
    }

    /// All of the owner's items, newest purchase first.
    #[instrument(skip(self))]
    pub async fn fetch_all(&self, owner_id: Uuid) -> CatalogResult<Vec<CollectionItem>> {
        let session = self.session_for(owner_id).await?;
        self.list(&session).await
    }

    async fn list(&self, session: &Session) -> CatalogResult<Vec<CollectionItem>> {
        let mut items = self.store.list(session).await?;
        sort_newest_first(&mut items);
        Ok(items)
    }

    /// Store a new item, uploading its photo first when one is given.
    #[instrument(skip(self, item, image), fields(id = %item.id, has_image = image.is_some()))]
    pub async fn create(
        &self,
        owner_id: Uuid,
        mut item: CollectionItem,
        image: Option<Bytes>,
    ) -> CatalogResult<Vec<CollectionItem>> {
        let session = self.session_for(owner_id).await?;
        item.validate().map_err(CatalogError::InvalidItem)?;

        item.image_reference = match image {
            Some(raw) => self.attach_image(&session, raw).await?,
            None => None,
        };

        self.store.insert(&session, &item).await?;
        info!(backend = self.store.backend_tag(), "item created");
        self.list(&session).await
    }

    /// Replace an item. New bytes replace the photo, otherwise `remove_image`
    /// clears it, otherwise the reference carried by `item` is kept.
    #[instrument(skip(self, item, image), fields(id = %item.id, has_image = image.is_some()))]
    pub async fn update(
        &self,
        owner_id: Uuid,
        mut item: CollectionItem,
        image: Option<Bytes>,
        remove_image: bool,
    ) -> CatalogResult<Vec<CollectionItem>> {
        let session = self.session_for(owner_id).await?;
        item.validate().map_err(CatalogError::InvalidItem)?;

        if let Some(raw) = image {
            if let Some(reference) = self.attach_image(&session, raw).await? {
                item.image_reference = Some(reference);
            } else if remove_image {
                item.image_reference = None;
            }
        } else if remove_image {
            item.image_reference = None;
        }

        self.store.replace(&session, &item).await?;
        info!(backend = self.store.backend_tag(), "item updated");
        self.list(&session).await
    }

    /// Remove an item. Its stored photo is left in place.
    #[instrument(skip(self, item), fields(id = %item.id))]
    pub async fn delete(
        &self,
        owner_id: Uuid,
        item: &CollectionItem,
    ) -> CatalogResult<Vec<CollectionItem>> {
        let session = self.session_for(owner_id).await?;
        self.store.remove(&session, item).await?;
        info!(backend = self.store.backend_tag(), "item deleted");
        self.list(&session).await
    }

    /// Prepare and upload `raw`. Under `Degrade` a failure yields `Ok(None)`;
    /// under `Abort` it is returned.
    async fn attach_image(&self, session: &Session, raw: Bytes) -> CatalogResult<Option<String>> {
        let result = match self.images.prepare(raw).await {
            Some(image) => self.images.upload(image, session).await,
            None => Err(CatalogError::DecodeFailed),
        };
        match (result, self.policy) {
            (Ok(reference), _) => Ok(Some(reference)),
            (Err(err), ImageFailurePolicy::Degrade) if err != CatalogError::NotAuthenticated => {
                warn!("continuing without image: {}", err);
                Ok(None)
            }
            (Err(err), _) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::item::Category,
        services::{
            image_pipeline::{AssetUploader, LocalAssetUploader, sample_png},
            item_store::LocalItemStore,
            kv_store::memory_store,
        },
    };
    use crate::models::asset::{StoredAsset, UploadedAsset};
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;
    use std::path::PathBuf;
    use tokio::sync::RwLock;

    struct FixedSession(RwLock<Option<Session>>);

    #[async_trait]
    impl SessionSource for FixedSession {
        async fn current_session(&self) -> Option<Session> {
            self.0.read().await.clone().filter(Session::is_valid)
        }
    }

    struct FailingUploader;

    #[async_trait]
    impl AssetUploader for FailingUploader {
        fn backend_tag(&self) -> &'static str {
            "failing"
        }

        async fn store(&self, _: &Session, _: UploadedAsset) -> CatalogResult<StoredAsset> {
            Err(CatalogError::UploadFailed("bucket offline".into()))
        }
    }

    struct Harness {
        service: ItemSyncService,
        sessions: Arc<FixedSession>,
        owner: Uuid,
        assets: PathBuf,
    }

    async fn harness_with(policy: ImageFailurePolicy, uploader: Option<Arc<dyn AssetUploader>>) -> Harness {
        let owner = Uuid::new_v4();
        let sessions = Arc::new(FixedSession(RwLock::new(Some(Session {
            user_id: owner,
            email: "owner@example.com".into(),
            access_token: None,
            refresh_token: None,
            expires_at: Utc::now() + Duration::hours(1),
        }))));
        let assets = std::env::temp_dir()
            .join("luxury-catalog-tests")
            .join(format!("sync-{}", Uuid::new_v4()));
        let uploader = uploader.unwrap_or_else(|| Arc::new(LocalAssetUploader::new(&assets)));
        let service = ItemSyncService::new(
            Arc::new(LocalItemStore::new(memory_store().await)),
            ImagePipeline::new(uploader, 90),
            sessions.clone(),
            policy,
        );
        Harness {
            service,
            sessions,
            owner,
            assets,
        }
    }

    async fn harness() -> Harness {
        harness_with(ImageFailurePolicy::Degrade, None).await
    }

    fn bag(name: &str, y: i32, m: u32, d: u32) -> CollectionItem {
        CollectionItem::new(
            name,
            "Hermès",
            Category::Bag,
            Decimal::new(50_000, 0),
            Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn insert_fetch_order_and_delete_scenario() {
        let h = harness().await;

        let item1 = bag("Bag A", 2024, 1, 1);
        let listed = h.service.create(h.owner, item1.clone(), None).await.unwrap();
        assert_eq!(listed, vec![item1.clone()]);

        let item2 = bag("Bag B", 2024, 6, 1);
        let listed = h.service.create(h.owner, item2.clone(), None).await.unwrap();
        assert_eq!(listed, vec![item2.clone(), item1.clone()]);

        let listed = h.service.delete(h.owner, &item1).await.unwrap();
        assert_eq!(listed, vec![item2.clone()]);

        // deleting again leaves the collection unchanged
        let listed = h.service.delete(h.owner, &item1).await.unwrap();
        assert_eq!(listed, vec![item2.clone()]);
        assert_eq!(h.service.fetch_all(h.owner).await.unwrap(), vec![item2]);
    }

    #[tokio::test]
    async fn fetch_all_is_sorted_for_any_insertion_order() {
        let h = harness().await;
        let dates = [(2021, 3, 9), (2018, 1, 1), (2025, 7, 4), (2020, 12, 31), (2023, 5, 5)];
        for (i, (y, m, d)) in dates.iter().enumerate() {
            h.service
                .create(h.owner, bag(&format!("item {i}"), *y, *m, *d), None)
                .await
                .unwrap();
        }
        let items = h.service.fetch_all(h.owner).await.unwrap();
        assert_eq!(items.len(), dates.len());
        assert!(items
            .windows(2)
            .all(|w| w[0].purchase_date >= w[1].purchase_date));
    }

    #[tokio::test]
    async fn create_with_photo_sets_owner_scoped_reference() {
        let h = harness().await;
        let listed = h
            .service
            .create(h.owner, bag("Kelly", 2024, 2, 2), Some(Bytes::from(sample_png())))
            .await
            .unwrap();
        let reference = listed[0].image_reference.clone().unwrap();
        assert!(reference.starts_with(&format!("users/{}/", h.owner)));
        assert!(h.assets.join(&reference).exists());
        let _ = tokio::fs::remove_dir_all(&h.assets).await;
    }

    #[tokio::test]
    async fn undecodable_photo_degrades_to_no_image() {
        let h = harness().await;
        let item = bag("Constance", 2024, 3, 3);
        let listed = h
            .service
            .create(h.owner, item.clone(), Some(Bytes::from_static(b"\x00garbage")))
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, item.id);
        assert_eq!(listed[0].image_reference, None);
    }

    #[tokio::test]
    async fn abort_policy_surfaces_decode_failure_and_writes_nothing() {
        let h = harness_with(ImageFailurePolicy::Abort, None).await;
        let err = h
            .service
            .create(h.owner, bag("Picotin", 2024, 3, 3), Some(Bytes::from_static(b"nope")))
            .await
            .unwrap_err();
        assert_eq!(err, CatalogError::DecodeFailed);
        assert!(h.service.fetch_all(h.owner).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upload_failure_follows_policy() {
        let degrade = harness_with(ImageFailurePolicy::Degrade, Some(Arc::new(FailingUploader))).await;
        let listed = degrade
            .service
            .create(degrade.owner, bag("Evelyne", 2024, 4, 4), Some(Bytes::from(sample_png())))
            .await
            .unwrap();
        assert_eq!(listed[0].image_reference, None);

        let abort = harness_with(ImageFailurePolicy::Abort, Some(Arc::new(FailingUploader))).await;
        let err = abort
            .service
            .create(abort.owner, bag("Evelyne", 2024, 4, 4), Some(Bytes::from(sample_png())))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::UploadFailed(_)));
        assert!(abort.service.fetch_all(abort.owner).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_image_reference_rules() {
        let h = harness().await;
        let mut item = bag("Lindy", 2023, 9, 9);
        item.image_reference = None;
        h.service.create(h.owner, item.clone(), None).await.unwrap();

        // keep: no bytes, no removal flag
        item.image_reference = Some("users/x/old.jpg".into());
        let listed = h.service.update(h.owner, item.clone(), None, false).await.unwrap();
        assert_eq!(listed[0].image_reference.as_deref(), Some("users/x/old.jpg"));

        // replace: new bytes win
        let listed = h
            .service
            .update(h.owner, item.clone(), Some(Bytes::from(sample_png())), false)
            .await
            .unwrap();
        let replaced = listed[0].image_reference.clone().unwrap();
        assert_ne!(replaced, "users/x/old.jpg");

        // degrade on bad bytes keeps the previous reference
        let mut current = listed[0].clone();
        let listed = h
            .service
            .update(h.owner, current.clone(), Some(Bytes::from_static(b"bad")), false)
            .await
            .unwrap();
        assert_eq!(listed[0].image_reference.as_deref(), Some(replaced.as_str()));

        // remove: cleared whatever it was
        current.name = "Lindy 26".into();
        let listed = h.service.update(h.owner, current, None, true).await.unwrap();
        assert_eq!(listed[0].image_reference, None);
        assert_eq!(listed[0].name, "Lindy 26");

        let _ = tokio::fs::remove_dir_all(&h.assets).await;
    }

    #[tokio::test]
    async fn round_trip_preserves_every_field() {
        let h = harness().await;
        let mut item = bag("Jige", 2022, 11, 30).with_description("Rouge H, box and dustbag");
        item.price = Decimal::new(412_550, 2);
        item.category = Category::Accessories;
        h.service.create(h.owner, item.clone(), None).await.unwrap();

        let fetched = h.service.fetch_all(h.owner).await.unwrap();
        let matching: Vec<_> = fetched.iter().filter(|i| i.id == item.id).collect();
        assert_eq!(matching, vec![&item]);
    }

    #[tokio::test]
    async fn rejects_invalid_items() {
        let h = harness().await;
        let mut item = bag("Bad", 2024, 1, 1);
        item.price = Decimal::new(-5, 0);
        let err = h.service.create(h.owner, item, None).await.unwrap_err();
        assert!(matches!(err, CatalogError::InvalidItem(_)));
    }

    #[tokio::test]
    async fn requires_matching_valid_session() {
        let h = harness().await;
        assert_eq!(
            h.service.fetch_all(Uuid::new_v4()).await.unwrap_err(),
            CatalogError::NotAuthenticated
        );

        if let Some(session) = h.sessions.0.write().await.as_mut() {
            session.expires_at = Utc::now() - Duration::seconds(5);
        }
        assert_eq!(
            h.service.fetch_all(h.owner).await.unwrap_err(),
            CatalogError::NotAuthenticated
        );

        *h.sessions.0.write().await = None;
        assert_eq!(
            h.service
                .create(h.owner, bag("x", 2024, 1, 1), None)
                .await
                .unwrap_err(),
            CatalogError::NotAuthenticated
        );
    }
}
