//! In-process gateway implementation.
//!
//! Backs the test suite and local development: a JSON document tree and a
//! blob map behind mutexes, with the same snapshot-per-change delivery
//! contract as the hosted backend. Deleting the last child of a node
//! prunes the node, matching the realtime database (empty objects do not
//! exist there).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::gateway::{
    BackendGateway, ErrorHandler, SnapshotHandler, Subscription, TreePath,
};

struct MemorySubscriber {
    path: TreePath,
    active: Arc<AtomicBool>,
    on_snapshot: SnapshotHandler,
}

#[derive(Default)]
pub struct MemoryGateway {
    tree: Mutex<Value>,
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    subscribers: Mutex<Vec<MemorySubscriber>>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blobs stored so far. Orphaned uploads from failed
    /// creates stay counted, same as on the hosted blob store.
    pub fn blob_count(&self) -> usize {
        self.blobs.lock().unwrap().len()
    }

    /// Re-delivers the watched subtree to every live subscriber whose
    /// path overlaps the mutated one, like the hosted backend's value
    /// listeners. Callbacks run after both locks are released so a
    /// handler may call back into the gateway.
    fn notify_subscribers(&self, mutated: &TreePath) {
        let mut deliveries = Vec::new();
        {
            let tree = self.tree.lock().unwrap();
            let mut subs = self.subscribers.lock().unwrap();
            subs.retain(|s| s.active.load(Ordering::SeqCst));
            for sub in subs.iter() {
                if !paths_overlap(&sub.path, mutated) {
                    continue;
                }
                deliveries.push((
                    sub.active.clone(),
                    sub.on_snapshot.clone(),
                    read_at(&tree, sub.path.segments()),
                ));
            }
        }
        for (active, handler, snapshot) in deliveries {
            if active.load(Ordering::SeqCst) {
                handler(snapshot);
            }
        }
    }
}

#[async_trait]
impl BackendGateway for MemoryGateway {
    async fn put(&self, path: &TreePath, record: Value) -> Result<()> {
        {
            let mut tree = self.tree.lock().unwrap();
            write_at(&mut tree, path.segments(), record);
        }
        debug!(path = %path, "memory: put");
        self.notify_subscribers(path);
        Ok(())
    }

    async fn update(&self, path: &TreePath, fields: Map<String, Value>) -> Result<()> {
        {
            let mut tree = self.tree.lock().unwrap();
            merge_at(&mut tree, path.segments(), &fields);
        }
        debug!(path = %path, fields = fields.len(), "memory: update");
        self.notify_subscribers(path);
        Ok(())
    }

    async fn delete(&self, path: &TreePath) -> Result<()> {
        {
            let mut tree = self.tree.lock().unwrap();
            delete_at(&mut tree, path.segments());
        }
        debug!(path = %path, "memory: delete");
        self.notify_subscribers(path);
        Ok(())
    }

    async fn get_once(&self, path: &TreePath) -> Result<Value> {
        let tree = self.tree.lock().unwrap();
        Ok(read_at(&tree, path.segments()))
    }

    fn subscribe(
        &self,
        path: &TreePath,
        on_snapshot: SnapshotHandler,
        _on_error: ErrorHandler,
    ) -> Subscription {
        let active = Arc::new(AtomicBool::new(true));
        let initial = {
            let tree = self.tree.lock().unwrap();
            let mut subs = self.subscribers.lock().unwrap();
            subs.push(MemorySubscriber {
                path: path.clone(),
                active: active.clone(),
                on_snapshot: on_snapshot.clone(),
            });
            read_at(&tree, path.segments())
        };
        // Initial delivery, synchronous so callers observe it as soon as
        // subscribe returns.
        on_snapshot(initial);
        Subscription::new(active)
    }

    async fn upload_blob(&self, folder: &str, bytes: Vec<u8>) -> Result<String> {
        let name = Uuid::new_v4().to_string();
        let url = format!("memory://{folder}/{name}");
        self.blobs
            .lock()
            .unwrap()
            .insert(format!("{folder}/{name}"), bytes);
        debug!(url = %url, "memory: blob stored");
        Ok(url)
    }
}

/// True when one path is a prefix of the other, i.e. a mutation at one
/// is visible inside a subscription at the other.
fn paths_overlap(a: &TreePath, b: &TreePath) -> bool {
    let min = a.segments().len().min(b.segments().len());
    a.segments()[..min] == b.segments()[..min]
}

fn read_at(root: &Value, segments: &[String]) -> Value {
    let mut cur = root;
    for seg in segments {
        match cur.get(seg) {
            Some(v) => cur = v,
            None => return Value::Null,
        }
    }
    cur.clone()
}

fn write_at(root: &mut Value, segments: &[String], value: Value) {
    match segments {
        [] => *root = value,
        [head, rest @ ..] => {
            if !root.is_object() {
                *root = Value::Object(Map::new());
            }
            if let Value::Object(map) = root {
                let slot = map.entry(head.clone()).or_insert(Value::Null);
                write_at(slot, rest, value);
            }
        }
    }
}

fn merge_at(root: &mut Value, segments: &[String], fields: &Map<String, Value>) {
    match segments {
        [] => {
            if !root.is_object() {
                *root = Value::Object(Map::new());
            }
            if let Value::Object(map) = root {
                for (k, v) in fields {
                    // updateChildren semantics: null deletes the key
                    if v.is_null() {
                        map.remove(k);
                    } else {
                        map.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        [head, rest @ ..] => {
            if !root.is_object() {
                *root = Value::Object(Map::new());
            }
            if let Value::Object(map) = root {
                let slot = map.entry(head.clone()).or_insert(Value::Null);
                merge_at(slot, rest, fields);
            }
        }
    }
}

fn delete_at(root: &mut Value, segments: &[String]) {
    match segments {
        [] => *root = Value::Null,
        [head] => {
            if let Value::Object(map) = root {
                map.remove(head);
            }
        }
        [head, rest @ ..] => {
            if let Value::Object(map) = root {
                if let Some(child) = map.get_mut(head) {
                    delete_at(child, rest);
                    let emptied = child.as_object().map(|m| m.is_empty()).unwrap_or(false);
                    if emptied {
                        map.remove(head);
                    }
                }
            }
        }
    }
}
