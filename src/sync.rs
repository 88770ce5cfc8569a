//! Reconciliation engine
//!
//! The single entry point every refresh path goes through: the scheduled
//! daemon, the on-demand web refresh, and replacement-payload imports all
//! land in `sync_with_payload`, so the merge and delta logic exists exactly
//! once.
//!
//! Field ownership is strict. The catalog-editing path (a replacement
//! payload) owns `name`, `setName`, `quantity` and `pricingPercent`; the
//! engine owns `marketPrice`, `yourPrice`, `lastUpdated`, the baseline pair
//! and `priceError`. A refresh never deletes an item.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

use crate::catalog::{fold_name, marketplace_url, normalize_collection, round_cents, InventoryItem, ItemKey};
use crate::error::Result;
use crate::pricing::{PriceApi, PriceResult};
use crate::store::CatalogStore;

/// Price movement relative to an earlier observation
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PriceDelta {
    pub delta: f64,
    /// Percent change; `None` when the previous price was zero
    pub pct: Option<f64>,
}

/// `delta = current - previous`; the percentage is undefined for a zero base
pub fn price_delta(current: f64, previous: f64) -> PriceDelta {
    let delta = round_cents(current - previous);
    let pct = if previous == 0.0 {
        None
    } else {
        Some(delta / previous * 100.0)
    };
    PriceDelta { delta, pct }
}

/// Quantity increase detected while applying a replacement payload
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestockEvent {
    /// External id, or the normalized name for name-keyed items
    pub identity: String,
    pub name: String,
    pub old_quantity: u32,
    pub new_quantity: u32,
    pub delta: u32,
}

/// Price observation recorded for the report/digest path
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceChange {
    pub identity: String,
    pub name: String,
    pub price: f64,
    /// Movement since the previous observation, when there was one
    pub since_last: Option<PriceDelta>,
    /// Movement since the locked baseline, when one existed before this run
    pub since_baseline: Option<PriceDelta>,
}

/// Summary of one sync run
///
/// A run never reports a bare success flag: partial loss is visible in the
/// counts, and the event lists are returned for an external notifier (bot,
/// webhook) to act on - the engine dispatches nothing itself.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub started_at: String,
    pub finished_at: String,
    /// Items the selection policy chose for refresh
    pub processed: usize,
    /// Items whose price fields were updated
    pub updated: usize,
    /// Selected items that could not be fetched (no external id)
    pub skipped: usize,
    /// Items whose lookup produced no usable price this run
    pub errored: usize,
    /// Items dropped because a replacement payload omitted them
    pub removed: usize,
    pub new_items: Vec<String>,
    pub restocks: Vec<RestockEvent>,
    pub price_changes: Vec<PriceChange>,
}

/// Standard refresh policy: stocked items with an identity whose last
/// observation is missing or older than `max_age_hours`
pub fn refresh_due(max_age_hours: i64) -> impl Fn(&InventoryItem) -> bool {
    move |item| {
        if item.quantity == 0 || item.key().is_none() {
            return false;
        }
        let last = item
            .last_updated
            .as_deref()
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok());
        match last {
            Some(t) => Utc::now().signed_duration_since(t) > chrono::Duration::hours(max_age_hours),
            None => true,
        }
    }
}

/// Reconciliation engine: reads the store, refreshes prices, persists once
pub struct SyncEngine {
    store: CatalogStore,
    api: PriceApi,
}

impl SyncEngine {
    pub fn new(store: CatalogStore, api: PriceApi) -> Self {
        Self { store, api }
    }

    pub fn store(&self) -> &CatalogStore {
        &self.store
    }

    /// Refresh prices for the items chosen by `policy`
    pub async fn sync<F>(&self, policy: F) -> Result<SyncReport>
    where
        F: Fn(&InventoryItem) -> bool,
    {
        self.sync_with_payload(None, policy).await
    }

    /// Apply an optional replacement payload, then refresh prices
    ///
    /// The payload, when present, is the new catalog: stored records matched
    /// by identity keep their price history, records the payload omits are
    /// dropped, unmatched incoming records are new items, and quantity
    /// increases become restock events. A non-list payload is a hard error
    /// and nothing is written.
    pub async fn sync_with_payload<F>(&self, payload: Option<&Value>, policy: F) -> Result<SyncReport>
    where
        F: Fn(&InventoryItem) -> bool,
    {
        let mut report = SyncReport {
            started_at: Utc::now().to_rfc3339(),
            ..Default::default()
        };

        let mut items = self.store.read().items;
        if let Some(payload) = payload {
            let incoming = normalize_collection(payload)?;
            items = apply_payload(items, incoming, &mut report);
        }

        let mut selected_ids: Vec<String> = Vec::new();
        for item in &items {
            if !policy(item) {
                continue;
            }
            report.processed += 1;
            match &item.external_id {
                Some(id) => selected_ids.push(id.clone()),
                // The batch API is id-keyed; name-only items cannot be looked up
                None => report.skipped += 1,
            }
        }

        let prices = if selected_ids.is_empty() {
            HashMap::new()
        } else {
            self.api.fetch_prices(&selected_ids).await
        };

        let now = Utc::now().to_rfc3339();
        apply_price_results(&mut items, &prices, &now, &mut report);

        self.store.write(&items)?;
        report.finished_at = Utc::now().to_rfc3339();
        log::info!(
            "Sync complete: {} processed, {} updated, {} skipped, {} errored, {} restock event(s)",
            report.processed,
            report.updated,
            report.skipped,
            report.errored,
            report.restocks.len()
        );
        Ok(report)
    }
}

/// External id, or the normalized name for name-keyed items
fn identity_label(item: &InventoryItem) -> String {
    item.external_id
        .clone()
        .unwrap_or_else(|| fold_name(&item.name))
}

/// Merge a replacement payload into the stored collection
fn apply_payload(
    existing: Vec<InventoryItem>,
    incoming: Vec<InventoryItem>,
    report: &mut SyncReport,
) -> Vec<InventoryItem> {
    let mut index: HashMap<ItemKey, InventoryItem> = existing
        .into_iter()
        .filter_map(|item| item.key().map(|key| (key, item)))
        .collect();

    let mut merged = Vec::with_capacity(incoming.len());
    for mut item in incoming {
        // normalize_collection already dropped identity-less records
        let Some(key) = item.key() else { continue };

        if let Some(prev) = index.remove(&key) {
            if item.quantity > prev.quantity {
                report.restocks.push(RestockEvent {
                    identity: identity_label(&item),
                    name: item.name.clone(),
                    old_quantity: prev.quantity,
                    new_quantity: item.quantity,
                    delta: item.quantity - prev.quantity,
                });
            }
            // Price observations survive an inventory update; the payload
            // cannot blank engine-owned fields
            item.market_price = prev.market_price;
            item.your_price = prev.your_price;
            item.last_updated = prev.last_updated;
            item.baseline_price = prev.baseline_price;
            item.baseline_at = prev.baseline_at;
            item.price_error = prev.price_error;
            if item.image_url.is_none() {
                item.image_url = prev.image_url;
            }
            if item.source_url.is_none() {
                item.source_url = prev.source_url;
            }
        } else {
            report.new_items.push(identity_label(&item));
        }
        merged.push(item);
    }

    // Whatever the payload no longer mentions is gone - deletion is an
    // admin-driven act, never something a refresh does
    report.removed = index.len();
    merged
}

/// Merge fetched price results into the collection
///
/// A usable price updates the market/derived prices, stamps `lastUpdated`,
/// clears `priceError`, and locks the baseline on first observation. An
/// unpriced result records its reason and leaves the price fields alone -
/// stale-but-known beats blanked.
fn apply_price_results(
    items: &mut [InventoryItem],
    prices: &HashMap<String, PriceResult>,
    now: &str,
    report: &mut SyncReport,
) {
    // Identity index over the full collection, not just the refreshed subset,
    // so every result can find its target
    let index: HashMap<ItemKey, usize> = items
        .iter()
        .enumerate()
        .filter_map(|(pos, item)| item.key().map(|key| (key, pos)))
        .collect();

    for (id, result) in prices {
        let Some(&pos) = index.get(&ItemKey::External(id.clone())) else {
            log::warn!("Price result for an identifier not in the catalog: {}", id);
            continue;
        };
        let item = &mut items[pos];

        match result {
            PriceResult::Priced { price, name, set_name } => {
                let price = *price;
                let since_last = item.market_price.map(|prev| price_delta(price, prev));
                let since_baseline = item.baseline_price.map(|base| price_delta(price, base));

                item.market_price = Some(price);
                item.your_price =
                    Some(round_cents(price * item.effective_pricing_percent() / 100.0));
                item.last_updated = Some(now.to_string());
                item.price_error = None;
                if item.baseline_price.is_none() {
                    item.baseline_price = Some(price);
                    item.baseline_at = Some(now.to_string());
                }
                if item.name.is_empty() {
                    if let Some(name) = name {
                        item.name = name.clone();
                    }
                }
                if item.set_name.is_none() {
                    item.set_name = set_name.clone();
                }
                if item.source_url.is_none() {
                    item.source_url = marketplace_url(item);
                }

                report.updated += 1;
                report.price_changes.push(PriceChange {
                    identity: id.clone(),
                    name: item.name.clone(),
                    price,
                    since_last,
                    since_baseline,
                });
            }
            PriceResult::Unpriced(reason) => {
                item.price_error = Some(reason.as_code().to_string());
                report.errored += 1;
            }
        }
    }

    // The result map iterates in arbitrary order; keep the report stable
    report.price_changes.sort_by(|a, b| a.identity.cmp(&b.identity));
}

/// In-process cooldown between refresh runs
///
/// The store assumes a single writer per run. Different processes must be
/// serialized externally (one scheduled job); inside one process the daemon
/// and the on-demand web path share a gate so a fresh run cannot start while
/// the previous one just finished.
pub struct RefreshGate {
    min_interval: Duration,
    last_run: Mutex<Option<Instant>>,
}

impl RefreshGate {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_run: Mutex::new(None),
        }
    }

    /// Claim the gate; `false` while a recent run is still cooling down
    pub fn try_begin(&self) -> bool {
        let mut last = self.last_run.lock().unwrap();
        let now = Instant::now();
        match *last {
            Some(prev) if now.duration_since(prev) < self.min_interval => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

#[cfg(test)]
#[path = "sync_tests.rs"]
mod tests;
