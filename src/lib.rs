//! Backend-agnostic admin core for the VirtuDecor furniture store.
//!
//! Two managers cover the admin surface: [`CatalogManager`] for the
//! furniture catalog (create with image and 3D-model uploads, list,
//! watch, price/description updates, delete) and
//! [`OrderLifecycleManager`] for the pending-to-completed order workflow
//! with live dashboard counts. Both sit on the [`BackendGateway`] trait:
//! [`MemoryGateway`] backs tests and demos, [`RestGateway`] talks to the
//! hosted backend described by a [`RestConfig`]. Admin sign-in goes
//! through [`IdentityProvider`].

pub mod auth;
pub mod catalog;
pub mod config;
pub mod error;
pub mod gateway;
pub mod memory;
pub mod model;
pub mod orders;
pub mod rest;

pub use auth::{AdminUser, IdentityProvider, MemoryIdentity};
pub use catalog::{AssetBlob, CatalogManager, NewFurniture};
pub use config::RestConfig;
pub use error::{AdminError, Result};
pub use gateway::{BackendGateway, ErrorHandler, SnapshotHandler, Subscription, TreePath};
pub use memory::MemoryGateway;
pub use model::{Category, Furniture, OrderCustomer, OrderDetail, OrderLine};
pub use orders::{CompletedLedger, DashboardSnapshot, DashboardWatch, OrderLifecycleManager};
pub use rest::{RestGateway, RestIdentity};

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global console logger. Honors `RUST_LOG`; later calls are
/// no-ops.
pub fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,decor_admin_core=debug"));
    let console_layer = fmt::layer().with_target(true);
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .try_init();
}
