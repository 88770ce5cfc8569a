//! Catalog Sync - sealed product stock & pricing store
//!
//! Maintains a JSON catalog of sealed-product inventory, refreshes its price
//! fields from a batch pricing service, and persists every change atomically
//! with rotating backups.

pub mod catalog;
pub mod error;
pub mod export;
pub mod pricing;
pub mod rate_limit;
pub mod store;
pub mod sync;
pub mod web;

pub use catalog::{normalize_collection, normalize_item, InventoryItem, ItemKey};
pub use error::{Error, Result};
pub use pricing::{PriceApi, PriceApiConfig};
pub use rate_limit::RateLimiter;
pub use store::{CatalogStore, StoredCatalog};
pub use sync::{refresh_due, RefreshGate, SyncEngine, SyncReport};
