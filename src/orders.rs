//! Two-state order workflow: pending orders, the completed-orders
//! earnings ledger, and the accept transition between them.
//!
//! An order lives in exactly one of `Order_details/{uid}/{orderId}` or
//! `Completed_Order/{uid}/{orderId}`. Accept is a deliberate two-phase
//! write-then-delete: a failure can duplicate the order across both
//! collections (surfaced as `InconsistentState`) but can never lose it.

use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};
use tracing::{error, info, warn};

use crate::error::{AdminError, Result};
use crate::gateway::{
    BackendGateway, ErrorHandler, SnapshotHandler, Subscription, TreePath,
    COMPLETED_ORDERS_COLLECTION, PENDING_ORDERS_COLLECTION,
};
use crate::model::OrderDetail;

/// Completed-side listing plus its derived aggregates. `total_earnings`
/// always equals the sum of `total_price` over `orders`.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedLedger {
    pub orders: Vec<OrderDetail>,
    pub total_earnings: f64,
    pub count: usize,
}

/// Dashboard aggregates, recomputed from full snapshots on every change
/// and never cached across events.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DashboardSnapshot {
    pub pending_count: usize,
    pub completed_count: usize,
    pub completed_earnings: f64,
}

/// Handle over the pair of live subscriptions behind
/// [`OrderLifecycleManager::watch_dashboard`]. Dropping it cancels both.
pub struct DashboardWatch {
    pending: Subscription,
    completed: Subscription,
}

impl DashboardWatch {
    pub fn cancel(&self) {
        self.pending.cancel();
        self.completed.cancel();
    }

    pub fn is_active(&self) -> bool {
        self.pending.is_active() || self.completed.is_active()
    }
}

pub struct OrderLifecycleManager {
    gateway: Arc<dyn BackendGateway>,
}

impl OrderLifecycleManager {
    pub fn new(gateway: Arc<dyn BackendGateway>) -> Self {
        Self { gateway }
    }

    /// One-shot read of every user partition under the pending
    /// collection, flattened. The partition key is stamped into
    /// `user.uid`; the embedded field is not trusted.
    pub async fn list_pending(&self) -> Result<Vec<OrderDetail>> {
        let root = TreePath::new([PENDING_ORDERS_COLLECTION])?;
        let snapshot = self
            .gateway
            .get_once(&root)
            .await
            .map_err(|e| e.with_op("load orders", PENDING_ORDERS_COLLECTION))?;
        Ok(flatten_orders(&snapshot))
    }

    /// One-shot read of the completed collection with its aggregates. A
    /// record whose total cannot be decoded is dropped whole, so the sum
    /// stays consistent with the returned sequence.
    pub async fn list_completed_with_earnings(&self) -> Result<CompletedLedger> {
        let root = TreePath::new([COMPLETED_ORDERS_COLLECTION])?;
        let snapshot = self
            .gateway
            .get_once(&root)
            .await
            .map_err(|e| e.with_op("load completed orders", COMPLETED_ORDERS_COLLECTION))?;
        let orders = flatten_orders(&snapshot);
        let total_earnings = orders.iter().map(|o| o.total_price).sum();
        let count = orders.len();
        Ok(CompletedLedger {
            orders,
            total_earnings,
            count,
        })
    }

    /// Moves an order from pending to completed.
    ///
    /// Phase one writes the full record to the completed collection;
    /// only on confirmed success does phase two delete the pending copy.
    /// A phase-one failure leaves the order pending and unmodified. A
    /// phase-two failure returns [`AdminError::InconsistentState`]: the
    /// order is now in both collections and the caller should retry the
    /// pending delete (re-running the whole accept also works, the
    /// completed write is idempotent).
    pub async fn accept_order(&self, order: &OrderDetail) -> Result<()> {
        let order_id = order.order_id.trim();
        let uid = order.user.uid.trim();
        if order_id.is_empty() {
            return Err(AdminError::validation("Missing orderId"));
        }
        if uid.is_empty() {
            return Err(AdminError::validation("Missing user uid"));
        }

        let completed = TreePath::new([COMPLETED_ORDERS_COLLECTION, uid, order_id])?;
        let pending = TreePath::new([PENDING_ORDERS_COLLECTION, uid, order_id])?;
        let record = serde_json::to_value(order)
            .map_err(|e| AdminError::storage("encode order", completed.to_string(), e))?;

        self.gateway
            .put(&completed, record)
            .await
            .map_err(|e| e.with_op("complete order", order_id))?;

        if let Err(err) = self.gateway.delete(&pending).await {
            let source = match err {
                AdminError::Storage { source, .. } => source,
                other => anyhow::Error::new(other),
            };
            error!(
                uid = %uid,
                order_id = %order_id,
                error = %source,
                "completed copy written but pending delete failed; order is in both collections"
            );
            return Err(AdminError::InconsistentState {
                uid: uid.to_string(),
                order_id: order_id.to_string(),
                source,
            });
        }

        info!(uid = %uid, order_id = %order_id, "order accepted");
        Ok(())
    }

    /// Live pending/completed aggregates for the dashboard. Each
    /// delivery carries the counts recomputed from the changed side's
    /// full snapshot; listener errors are logged, forwarded to
    /// `on_error`, and the last-known-good values stand until the
    /// backend recovers. Both subscriptions stay alive through errors.
    pub fn watch_dashboard(
        &self,
        on_change: impl Fn(DashboardSnapshot) + Send + Sync + 'static,
        on_error: impl Fn(AdminError) + Send + Sync + 'static,
    ) -> Result<DashboardWatch> {
        let pending_root = TreePath::new([PENDING_ORDERS_COLLECTION])?;
        let completed_root = TreePath::new([COMPLETED_ORDERS_COLLECTION])?;

        let state = Arc::new(Mutex::new(DashboardSnapshot::default()));
        let on_change = Arc::new(on_change);
        let on_error: ErrorHandler = Arc::new(on_error);

        let pending_handler: SnapshotHandler = {
            let state = state.clone();
            let on_change = on_change.clone();
            Arc::new(move |snapshot| {
                let next = {
                    let mut agg = state.lock().unwrap();
                    agg.pending_count = flatten_orders(&snapshot).len();
                    *agg
                };
                on_change(next);
            })
        };
        let completed_handler: SnapshotHandler = {
            let state = state.clone();
            let on_change = on_change.clone();
            Arc::new(move |snapshot| {
                let orders = flatten_orders(&snapshot);
                let next = {
                    let mut agg = state.lock().unwrap();
                    agg.completed_count = orders.len();
                    agg.completed_earnings = orders.iter().map(|o| o.total_price).sum();
                    *agg
                };
                on_change(next);
            })
        };

        let pending_err: ErrorHandler = {
            let on_error = on_error.clone();
            Arc::new(move |err| {
                warn!(error = %err, "pending listener error; keeping last-known counts");
                on_error(err);
            })
        };
        let completed_err: ErrorHandler = {
            let on_error = on_error.clone();
            Arc::new(move |err| {
                warn!(error = %err, "completed listener error; keeping last-known counts");
                on_error(err);
            })
        };

        Ok(DashboardWatch {
            pending: self
                .gateway
                .subscribe(&pending_root, pending_handler, pending_err),
            completed: self
                .gateway
                .subscribe(&completed_root, completed_handler, completed_err),
        })
    }
}

/// Flattens `{uid: {orderId: record}}` into one sequence, stamping each
/// record's `user.uid` from its partition key. Undecodable records are
/// skipped with a warning.
fn flatten_orders(snapshot: &Value) -> Vec<OrderDetail> {
    let mut out = Vec::new();
    let partitions = match snapshot.as_object() {
        Some(map) => map,
        None => return out,
    };
    for (uid, orders) in partitions {
        let orders = match orders.as_object() {
            Some(map) => map,
            None => continue,
        };
        for (key, raw) in orders {
            let mut record = raw.clone();
            if let Some(obj) = record.as_object_mut() {
                let user = obj
                    .entry("user")
                    .or_insert_with(|| Value::Object(Map::new()));
                if !user.is_object() {
                    *user = Value::Object(Map::new());
                }
                if let Some(user) = user.as_object_mut() {
                    user.insert("uid".into(), Value::String(uid.clone()));
                }
            }
            match serde_json::from_value::<OrderDetail>(record) {
                Ok(o) => out.push(o),
                Err(e) => {
                    warn!(uid = %uid, key = %key, error = %e, "skipping undecodable order record");
                }
            }
        }
    }
    out
}
