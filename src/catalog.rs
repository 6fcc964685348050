//! Furniture catalog CRUD.
//!
//! `CatalogManager` owns the four listing operations plus a live watch
//! over the whole catalog. Asset blobs are uploaded concurrently and
//! joined before the record write; blobs that made it up before another
//! upload failed are left behind (the store is garbage-collected out of
//! band) and logged.

use std::sync::Arc;

use futures_util::future::join_all;
use serde_json::{Map, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AdminError, Result};
use crate::gateway::{
    BackendGateway, SnapshotHandler, Subscription, TreePath, FURNITURE_COLLECTION,
    FURNITURE_IMAGE_FOLDER, FURNITURE_MODEL_FOLDER,
};
use crate::model::{Category, Furniture};

/// Raw asset bytes handed over by the presentation layer. `label` is the
/// picked file's name and only used in failure reports.
#[derive(Clone)]
pub struct AssetBlob {
    pub label: String,
    pub bytes: Vec<u8>,
}

/// Input to [`CatalogManager::create_furniture`].
pub struct NewFurniture {
    pub name: String,
    pub price: String,
    pub description: String,
    pub category: Category,
    pub images: Vec<AssetBlob>,
    pub model: Option<AssetBlob>,
}

pub struct CatalogManager {
    gateway: Arc<dyn BackendGateway>,
}

impl CatalogManager {
    pub fn new(gateway: Arc<dyn BackendGateway>) -> Self {
        Self { gateway }
    }

    /// Validates, uploads all assets concurrently, then writes the
    /// composed record to `furniture/{category}/{id}`. Nothing is sent
    /// to the backend unless validation passes; a single failed upload
    /// aborts the whole create and names the asset that failed.
    pub async fn create_furniture(&self, input: NewFurniture) -> Result<Furniture> {
        let name = input.name.trim();
        let price = input.price.trim();
        let description = input.description.trim();
        if name.is_empty() || price.is_empty() || description.is_empty() {
            return Err(AdminError::validation("Please fill all fields"));
        }
        if input.images.is_empty() {
            return Err(AdminError::validation("Please select at least one image"));
        }
        let model = match input.model {
            Some(model) => model,
            None => return Err(AdminError::validation("Please select a .glb file")),
        };

        let images_fut = join_all(
            input
                .images
                .into_iter()
                .map(|asset| self.upload_asset("upload image", FURNITURE_IMAGE_FOLDER, asset)),
        );
        let model_fut = self.upload_asset("upload model", FURNITURE_MODEL_FOLDER, model);
        let (image_results, model_result) = tokio::join!(images_fut, model_fut);
        let (images, glb_model_url) = join_uploads(image_results, model_result)?;

        let id = Uuid::new_v4().to_string();
        let furniture = Furniture {
            id: id.clone(),
            name: name.to_string(),
            price: price.to_string(),
            description: description.to_string(),
            images,
            glb_model_url,
            category: input.category,
        };
        let path = TreePath::new([FURNITURE_COLLECTION, input.category.as_str(), id.as_str()])?;
        let record = serde_json::to_value(&furniture)
            .map_err(|e| AdminError::storage("encode furniture", path.to_string(), e))?;
        self.gateway.put(&path, record).await?;
        info!(id = %furniture.id, category = %furniture.category, "furniture created");
        Ok(furniture)
    }

    /// One-shot read of the whole catalog, flattened across category
    /// buckets. Unknown buckets and undecodable records are skipped.
    pub async fn list_all_furniture(&self) -> Result<Vec<Furniture>> {
        let root = TreePath::new([FURNITURE_COLLECTION])?;
        let snapshot = self.gateway.get_once(&root).await?;
        Ok(flatten_catalog(&snapshot))
    }

    /// Live variant of [`Self::list_all_furniture`]: `on_change` receives
    /// the full re-flattened catalog on every backend change until the
    /// handle is cancelled.
    pub fn watch_all_furniture(
        &self,
        on_change: impl Fn(Vec<Furniture>) + Send + Sync + 'static,
        on_error: impl Fn(AdminError) + Send + Sync + 'static,
    ) -> Result<Subscription> {
        let root = TreePath::new([FURNITURE_COLLECTION])?;
        let handler: SnapshotHandler =
            Arc::new(move |snapshot| on_change(flatten_catalog(&snapshot)));
        Ok(self.gateway.subscribe(&root, handler, Arc::new(on_error)))
    }

    /// Partial update of `price` and `description` only. The price is
    /// stored as its trimmed text so a value like "12.50" survives a
    /// round-trip; it must parse as a decimal. Fails with `NotFound`
    /// when the record does not exist (the backend's merge would
    /// otherwise mint a two-field stub).
    pub async fn update_furniture(
        &self,
        category: Category,
        id: &str,
        new_price: &str,
        new_description: &str,
    ) -> Result<()> {
        let id = id.trim();
        if id.is_empty() {
            return Err(AdminError::validation("Missing furniture id"));
        }
        let price = new_price.trim();
        if price.is_empty() || price.parse::<f64>().is_err() {
            return Err(AdminError::validation("Price must be a decimal number"));
        }

        let path = TreePath::new([FURNITURE_COLLECTION, category.as_str(), id])?;
        let existing = self.gateway.get_once(&path).await?;
        if existing.is_null() {
            return Err(AdminError::not_found(path.to_string()));
        }

        let mut fields = Map::new();
        fields.insert("price".into(), Value::String(price.to_string()));
        fields.insert(
            "description".into(),
            Value::String(new_description.to_string()),
        );
        self.gateway.update(&path, fields).await?;
        info!(id = %id, category = %category, "furniture updated");
        Ok(())
    }

    /// Removes the record. The blobs it referenced stay in the store,
    /// consistent with create's no-rollback behavior.
    pub async fn delete_furniture(&self, category: Category, id: &str) -> Result<()> {
        let id = id.trim();
        if id.is_empty() {
            return Err(AdminError::validation("Missing furniture id"));
        }
        let path = TreePath::new([FURNITURE_COLLECTION, category.as_str(), id])?;
        self.gateway.delete(&path).await?;
        info!(id = %id, category = %category, "furniture deleted");
        Ok(())
    }

    async fn upload_asset(
        &self,
        op: &'static str,
        folder: &str,
        asset: AssetBlob,
    ) -> Result<String> {
        match self.gateway.upload_blob(folder, asset.bytes).await {
            Ok(url) => Ok(url),
            Err(AdminError::Storage { source, .. }) => Err(AdminError::Storage {
                op,
                path: asset.label,
                source,
            }),
            Err(other) => Err(other),
        }
    }
}

/// Splits the joined upload results. When any upload failed, the blobs
/// that made it up are logged as orphaned and the first failure is
/// returned.
fn join_uploads(
    image_results: Vec<Result<String>>,
    model_result: Result<String>,
) -> Result<(Vec<String>, String)> {
    let uploaded: Vec<&String> = image_results
        .iter()
        .filter_map(|r| r.as_ref().ok())
        .chain(model_result.as_ref().ok())
        .collect();
    if uploaded.len() != image_results.len() + 1 && !uploaded.is_empty() {
        warn!(
            orphaned = ?uploaded,
            "furniture create aborted mid-upload; surviving blobs were not removed"
        );
    }
    let mut images = Vec::with_capacity(image_results.len());
    for res in image_results {
        images.push(res?);
    }
    Ok((images, model_result?))
}

/// Flattens a `furniture` tree snapshot into one unordered sequence. The
/// bucket and record keys are authoritative for `category` and `id`,
/// whatever the payload embeds.
fn flatten_catalog(snapshot: &Value) -> Vec<Furniture> {
    let mut out = Vec::new();
    let buckets = match snapshot.as_object() {
        Some(map) => map,
        None => return out,
    };
    for (bucket, items) in buckets {
        let category = match Category::parse(bucket) {
            Some(c) => c,
            None => {
                warn!(bucket = %bucket, "skipping unknown category bucket");
                continue;
            }
        };
        let items = match items.as_object() {
            Some(map) => map,
            None => continue,
        };
        for (key, raw) in items {
            let mut record = raw.clone();
            if let Some(obj) = record.as_object_mut() {
                obj.insert("id".into(), Value::String(key.clone()));
                obj.insert(
                    "category".into(),
                    Value::String(category.as_str().to_string()),
                );
            }
            match serde_json::from_value::<Furniture>(record) {
                Ok(f) => out.push(f),
                Err(e) => {
                    warn!(bucket = %bucket, key = %key, error = %e, "skipping undecodable furniture record");
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryGateway;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn fixture() -> (Arc<MemoryGateway>, CatalogManager) {
        let gw = Arc::new(MemoryGateway::new());
        (gw.clone(), CatalogManager::new(gw))
    }

    fn blob(label: &str) -> AssetBlob {
        AssetBlob {
            label: label.into(),
            bytes: vec![0xAB, 1, 2, 3],
        }
    }

    fn valid_input() -> NewFurniture {
        NewFurniture {
            name: "Arm Chair".into(),
            price: "149.00".into(),
            description: "Oak frame".into(),
            category: Category::Chair,
            images: vec![blob("front.png"), blob("side.png")],
            model: Some(blob("chair.glb")),
        }
    }

    /// Counts every gateway call, for the "validation makes zero backend
    /// calls" property.
    struct CountingGateway {
        inner: MemoryGateway,
        calls: AtomicUsize,
    }

    impl CountingGateway {
        fn new() -> Self {
            Self {
                inner: MemoryGateway::new(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl BackendGateway for CountingGateway {
        async fn put(&self, path: &TreePath, record: Value) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.put(path, record).await
        }
        async fn update(&self, path: &TreePath, fields: Map<String, Value>) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.update(path, fields).await
        }
        async fn delete(&self, path: &TreePath) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.delete(path).await
        }
        async fn get_once(&self, path: &TreePath) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.get_once(path).await
        }
        fn subscribe(
            &self,
            path: &TreePath,
            on_snapshot: SnapshotHandler,
            on_error: crate::gateway::ErrorHandler,
        ) -> Subscription {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.subscribe(path, on_snapshot, on_error)
        }
        async fn upload_blob(&self, folder: &str, bytes: Vec<u8>) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.upload_blob(folder, bytes).await
        }
    }

    /// Delegates to a real MemoryGateway but fails uploads into one
    /// folder, to exercise the partial-upload abort path.
    struct FailingUploadGateway {
        inner: MemoryGateway,
        fail_folder: &'static str,
    }

    #[async_trait]
    impl BackendGateway for FailingUploadGateway {
        async fn put(&self, path: &TreePath, record: Value) -> Result<()> {
            self.inner.put(path, record).await
        }
        async fn update(&self, path: &TreePath, fields: Map<String, Value>) -> Result<()> {
            self.inner.update(path, fields).await
        }
        async fn delete(&self, path: &TreePath) -> Result<()> {
            self.inner.delete(path).await
        }
        async fn get_once(&self, path: &TreePath) -> Result<Value> {
            self.inner.get_once(path).await
        }
        fn subscribe(
            &self,
            path: &TreePath,
            on_snapshot: SnapshotHandler,
            on_error: crate::gateway::ErrorHandler,
        ) -> Subscription {
            self.inner.subscribe(path, on_snapshot, on_error)
        }
        async fn upload_blob(&self, folder: &str, bytes: Vec<u8>) -> Result<String> {
            if folder == self.fail_folder {
                return Err(AdminError::storage(
                    "upload blob",
                    folder.to_string(),
                    anyhow::anyhow!("quota exceeded"),
                ));
            }
            self.inner.upload_blob(folder, bytes).await
        }
    }

    #[tokio::test]
    async fn create_rejects_bad_input_without_touching_the_backend() {
        let gw = Arc::new(CountingGateway::new());
        let mgr = CatalogManager::new(gw.clone());

        let cases: Vec<(NewFurniture, &str)> = vec![
            (
                NewFurniture {
                    name: "  ".into(),
                    ..valid_input()
                },
                "Please fill all fields",
            ),
            (
                NewFurniture {
                    price: "".into(),
                    ..valid_input()
                },
                "Please fill all fields",
            ),
            (
                NewFurniture {
                    description: " ".into(),
                    ..valid_input()
                },
                "Please fill all fields",
            ),
            (
                NewFurniture {
                    images: vec![],
                    ..valid_input()
                },
                "Please select at least one image",
            ),
            (
                NewFurniture {
                    model: None,
                    ..valid_input()
                },
                "Please select a .glb file",
            ),
        ];
        for (input, expected) in cases {
            let err = mgr.create_furniture(input).await.unwrap_err();
            match err {
                AdminError::Validation { message } => assert_eq!(message, expected),
                other => panic!("expected validation error, got {other}"),
            }
        }
        assert_eq!(gw.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn created_furniture_shows_up_in_the_listing() {
        let (_gw, mgr) = fixture();
        let created = mgr.create_furniture(valid_input()).await.unwrap();
        assert!(!created.id.is_empty());
        assert_eq!(created.images.len(), 2);
        assert!(created.images[0].starts_with("memory://furniture_images/"));
        assert!(created.glb_model_url.starts_with("memory://furniture_models/"));

        let all = mgr.list_all_furniture().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0], created);
        assert_eq!(all[0].category, Category::Chair);
    }

    #[tokio::test]
    async fn create_trims_text_fields() {
        let (_gw, mgr) = fixture();
        let created = mgr
            .create_furniture(NewFurniture {
                name: "  Arm Chair  ".into(),
                price: " 149.00 ".into(),
                description: " Oak frame ".into(),
                ..valid_input()
            })
            .await
            .unwrap();
        assert_eq!(created.name, "Arm Chair");
        assert_eq!(created.price, "149.00");
        assert_eq!(created.description, "Oak frame");
    }

    #[tokio::test]
    async fn failed_model_upload_aborts_create_and_names_the_asset() {
        let gw = Arc::new(FailingUploadGateway {
            inner: MemoryGateway::new(),
            fail_folder: FURNITURE_MODEL_FOLDER,
        });
        let mgr = CatalogManager::new(gw.clone());

        let err = mgr.create_furniture(valid_input()).await.unwrap_err();
        match err {
            AdminError::Storage { op, path, .. } => {
                assert_eq!(op, "upload model");
                assert_eq!(path, "chair.glb");
            }
            other => panic!("expected storage error, got {other}"),
        }
        // Both image uploads completed and stay behind as orphans; the
        // record itself was never written.
        assert_eq!(gw.inner.blob_count(), 2);
        assert!(mgr.list_all_furniture().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_changes_only_price_and_description() {
        let (_gw, mgr) = fixture();
        let created = mgr
            .create_furniture(NewFurniture {
                name: "Chair A".into(),
                price: "10.00".into(),
                ..valid_input()
            })
            .await
            .unwrap();

        mgr.update_furniture(Category::Chair, &created.id, "12.50", "Now softer")
            .await
            .unwrap();

        let all = mgr.list_all_furniture().await.unwrap();
        assert_eq!(all.len(), 1);
        let after = &all[0];
        assert_eq!(after.name, "Chair A");
        assert_eq!(after.price, "12.50");
        assert_eq!(after.description, "Now softer");
        assert_eq!(after.images, created.images);
        assert_eq!(after.glb_model_url, created.glb_model_url);
    }

    #[tokio::test]
    async fn update_missing_record_is_not_found_and_creates_nothing() {
        let (_gw, mgr) = fixture();
        let err = mgr
            .update_furniture(Category::Sofa, "nope", "12.50", "x")
            .await
            .unwrap_err();
        assert!(matches!(err, AdminError::NotFound { .. }));
        assert!(mgr.list_all_furniture().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_rejects_a_price_that_is_not_a_decimal() {
        let (_gw, mgr) = fixture();
        let created = mgr.create_furniture(valid_input()).await.unwrap();

        for bad in ["", "  ", "abc", "12,50"] {
            let err = mgr
                .update_furniture(Category::Chair, &created.id, bad, "x")
                .await
                .unwrap_err();
            assert!(matches!(err, AdminError::Validation { .. }), "price {bad:?}");
        }
        let all = mgr.list_all_furniture().await.unwrap();
        assert_eq!(all[0].price, "149.00");
        assert_eq!(all[0].description, "Oak frame");
    }

    #[tokio::test]
    async fn delete_removes_the_record_from_the_listing() {
        let (_gw, mgr) = fixture();
        let keep = mgr.create_furniture(valid_input()).await.unwrap();
        let gone = mgr
            .create_furniture(NewFurniture {
                category: Category::Bed,
                ..valid_input()
            })
            .await
            .unwrap();

        mgr.delete_furniture(Category::Bed, &gone.id).await.unwrap();

        let all = mgr.list_all_furniture().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, keep.id);
    }

    #[tokio::test]
    async fn listing_stamps_id_and_category_from_storage_keys() {
        let (gw, mgr) = fixture();
        // Legacy record: wrong embedded id and category, missing fields.
        gw.put(
            &TreePath::new(["furniture", "Sofa", "legacy1"]).unwrap(),
            json!({ "id": "stale", "category": "Chair", "name": "Old Sofa", "price": 99 }),
        )
        .await
        .unwrap();

        let all = mgr.list_all_furniture().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, "legacy1");
        assert_eq!(all[0].category, Category::Sofa);
        assert_eq!(all[0].price, "99");
        assert_eq!(all[0].glb_model_url, "");
    }

    #[tokio::test]
    async fn listing_skips_unknown_buckets_and_broken_records() {
        let (gw, mgr) = fixture();
        gw.put(
            &TreePath::new(["furniture", "Table", "t1"]).unwrap(),
            json!({ "name": "not a known bucket" }),
        )
        .await
        .unwrap();
        gw.put(
            &TreePath::new(["furniture", "Chair", "bad"]).unwrap(),
            json!("just a string"),
        )
        .await
        .unwrap();
        gw.put(
            &TreePath::new(["furniture", "Chair", "ok"]).unwrap(),
            json!({ "name": "Good Chair", "price": "5" }),
        )
        .await
        .unwrap();

        let all = mgr.list_all_furniture().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "Good Chair");
    }

    #[tokio::test]
    async fn watch_replays_the_catalog_and_stops_after_cancel() {
        let (_gw, mgr) = fixture();
        let seen: Arc<Mutex<Vec<Vec<Furniture>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let sub = mgr
            .watch_all_furniture(
                move |all| sink.lock().unwrap().push(all),
                |err| panic!("unexpected watch error: {err}"),
            )
            .unwrap();
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert!(seen.lock().unwrap()[0].is_empty());

        let created = mgr.create_furniture(valid_input()).await.unwrap();
        {
            let snapshots = seen.lock().unwrap();
            assert_eq!(snapshots.len(), 2);
            assert_eq!(snapshots[1].len(), 1);
            assert_eq!(snapshots[1][0].id, created.id);
        }

        sub.cancel();
        mgr.delete_furniture(Category::Chair, &created.id).await.unwrap();
        assert_eq!(seen.lock().unwrap().len(), 2);
    }
}
