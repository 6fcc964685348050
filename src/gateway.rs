//! Abstract backend gateway.
//!
//! Everything the admin core persists goes through the `BackendGateway`
//! trait: a document-style tree addressed by validated `TreePath`s, live
//! subscriptions delivering full snapshots, and a blob store for catalog
//! assets. `memory::MemoryGateway` backs tests and local development,
//! `rest::RestGateway` talks to the hosted realtime database.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::{AdminError, Result};

// Top-level collections.
pub const FURNITURE_COLLECTION: &str = "furniture";
pub const PENDING_ORDERS_COLLECTION: &str = "Order_details";
pub const COMPLETED_ORDERS_COLLECTION: &str = "Completed_Order";

// Blob store folders for catalog assets.
pub const FURNITURE_IMAGE_FOLDER: &str = "furniture_images";
pub const FURNITURE_MODEL_FOLDER: &str = "furniture_models";

/// Characters the realtime database forbids inside a single key.
const FORBIDDEN_KEY_CHARS: [char; 6] = ['.', '#', '$', '[', ']', '/'];

/// A validated location in the document tree, e.g.
/// `furniture/Chair/{id}` or `Order_details/{uid}/{orderId}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TreePath {
    segments: Vec<String>,
}

impl TreePath {
    /// Builds a path from its key segments, rejecting blank segments and
    /// keys the backend could not store.
    pub fn new<I, S>(segments: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() {
            return Err(AdminError::validation(
                "Tree path must have at least one segment",
            ));
        }
        for seg in &segments {
            if seg.trim().is_empty() {
                return Err(AdminError::validation(
                    "Tree path segments must not be blank",
                ));
            }
            if seg
                .chars()
                .any(|c| FORBIDDEN_KEY_CHARS.contains(&c) || c.is_control())
            {
                return Err(AdminError::validation(format!(
                    "Tree path segment '{seg}' contains a forbidden character"
                )));
            }
        }
        Ok(Self { segments })
    }

    /// The path one level deeper under `segment`.
    pub fn child(&self, segment: impl Into<String>) -> Result<Self> {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self::new(segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl fmt::Display for TreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

/// Full-snapshot callback, invoked with the watched subtree's current
/// value on every change. `Value::Null` means the subtree is empty.
pub type SnapshotHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Invoked when a live subscription hits a backend error. The
/// subscription stays registered; delivery resumes when the backend
/// recovers.
pub type ErrorHandler = Arc<dyn Fn(AdminError) + Send + Sync>;

/// Handle to a live subscription.
///
/// `cancel` flips the shared gate checked before every delivery, so once
/// it returns no new snapshot callback begins (a delivery already running
/// on another thread may still finish). Any poll task backing the
/// subscription is aborted as well. Dropping the handle cancels it.
pub struct Subscription {
    active: Arc<AtomicBool>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl Subscription {
    pub fn new(active: Arc<AtomicBool>) -> Self {
        Self { active, task: None }
    }

    pub fn with_task(active: Arc<AtomicBool>, task: tokio::task::JoinHandle<()>) -> Self {
        Self {
            active,
            task: Some(task),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.active.store(false, Ordering::SeqCst);
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Contract every backend satisfies. Object-safe; managers hold an
/// `Arc<dyn BackendGateway>` injected at construction.
#[async_trait]
pub trait BackendGateway: Send + Sync {
    /// Upsert the full record at `path`.
    async fn put(&self, path: &TreePath, record: Value) -> Result<()>;

    /// Partial merge of the named fields into the record at `path`.
    /// Fields not named are left untouched. Merging into a missing
    /// record creates it; callers that must not create stubs pre-check
    /// with `get_once`.
    async fn update(&self, path: &TreePath, fields: Map<String, Value>) -> Result<()>;

    /// Remove the record and everything below it.
    async fn delete(&self, path: &TreePath) -> Result<()>;

    /// One-shot read of the subtree at `path`. `Value::Null` when
    /// nothing is stored there.
    async fn get_once(&self, path: &TreePath) -> Result<Value>;

    /// Live read: delivers the current subtree promptly after
    /// registration, then a full snapshot on every subsequent change,
    /// until the returned handle is cancelled.
    fn subscribe(
        &self,
        path: &TreePath,
        on_snapshot: SnapshotHandler,
        on_error: ErrorHandler,
    ) -> Subscription;

    /// Store `bytes` under a random name inside `folder` and return a
    /// publicly fetchable URL.
    async fn upload_blob(&self, folder: &str, bytes: Vec<u8>) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_joins_segments_with_slashes() {
        let p = TreePath::new(["furniture", "Chair", "abc123"]).unwrap();
        assert_eq!(p.to_string(), "furniture/Chair/abc123");
        assert_eq!(p.segments().len(), 3);
    }

    #[test]
    fn path_rejects_blank_and_forbidden_segments() {
        assert!(TreePath::new(Vec::<String>::new()).is_err());
        assert!(TreePath::new(["furniture", "  "]).is_err());
        assert!(TreePath::new(["furniture", "a/b"]).is_err());
        assert!(TreePath::new(["orders", "user#1"]).is_err());
        assert!(TreePath::new(["orders", "a.b"]).is_err());
    }

    #[test]
    fn child_extends_and_revalidates() {
        let p = TreePath::new(["Order_details", "u1"]).unwrap();
        assert_eq!(p.child("ord1").unwrap().to_string(), "Order_details/u1/ord1");
        assert!(p.child("bad$key").is_err());
    }

    #[test]
    fn cancel_flips_the_active_gate() {
        let sub = Subscription::new(Arc::new(AtomicBool::new(true)));
        assert!(sub.is_active());
        sub.cancel();
        assert!(!sub.is_active());
    }
}
