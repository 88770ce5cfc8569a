//! Canonical inventory item model and schema normalization
//!
//! Every record that enters the system - store file, replacement payload, web
//! input - passes through normalization before it is used or persisted. The
//! recognized field set is an allow-list: anything else is dropped, so legacy
//! or unexpected fields cannot leak into the canonical record.

use std::collections::HashSet;

use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};

/// Percentage of market price used to derive `yourPrice` when an item carries
/// no override
pub const DEFAULT_PRICING_PERCENT: f64 = 90.0;

/// Valid range for a per-item pricing percent override
pub const PRICING_PERCENT_MIN: f64 = 1.0;
pub const PRICING_PERCENT_MAX: f64 = 200.0;

const PRODUCT_URL_BASE: &str = "https://www.tcgplayer.com/product";
const SEARCH_URL_BASE: &str = "https://www.tcgplayer.com/search/all/product";

/// Canonical inventory item - the only record shape that is ever persisted
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryItem {
    /// Marketplace product id; preferred identity key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    /// Display name (may be empty only when `external_id` is present)
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub set_name: Option<String>,
    /// Owned by the catalog-editing path; a price refresh never touches it
    pub quantity: u32,
    pub market_price: Option<f64>,
    pub your_price: Option<f64>,
    /// Per-item override in `[1, 200]`; `DEFAULT_PRICING_PERCENT` when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pricing_percent: Option<f64>,
    /// RFC-3339 stamp of the last successful price observation
    pub last_updated: Option<String>,
    /// First successfully observed price; locked once, never overwritten
    pub baseline_price: Option<f64>,
    pub baseline_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    /// Reason code for the last failed refresh attempt; cleared on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_error: Option<String>,
}

/// Identity key used to match records across syncs
///
/// External ids and names live in distinct keyspaces, so a product id can
/// never collide with a display name that happens to spell the same.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ItemKey {
    /// Marketplace product id, used verbatim
    External(String),
    /// Normalized (trimmed, case-folded) display name
    Name(String),
}

impl InventoryItem {
    /// Identity key: external id preferred, normalized name as fallback
    ///
    /// `None` means the record has no usable identity and must not be kept.
    pub fn key(&self) -> Option<ItemKey> {
        if let Some(id) = &self.external_id {
            return Some(ItemKey::External(id.clone()));
        }
        let folded = fold_name(&self.name);
        if folded.is_empty() {
            None
        } else {
            Some(ItemKey::Name(folded))
        }
    }

    /// Effective percentage used to derive `yourPrice` from `marketPrice`
    pub fn effective_pricing_percent(&self) -> f64 {
        self.pricing_percent.unwrap_or(DEFAULT_PRICING_PERCENT)
    }
}

/// Case-folded, whitespace-trimmed name used as the fallback identity key
pub fn fold_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Round a money value to cents
pub fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Marketplace link for an item: direct product page when the id is known,
/// name search otherwise
pub fn marketplace_url(item: &InventoryItem) -> Option<String> {
    if let Some(id) = &item.external_id {
        return Some(format!("{}/{}", PRODUCT_URL_BASE, id));
    }
    let name = item.name.trim();
    if name.is_empty() {
        None
    } else {
        Some(format!("{}?q={}", SEARCH_URL_BASE, urlencoding::encode(name)))
    }
}

/// Coerce one raw record into the canonical shape
///
/// Returns `None` when the record is not an object or carries neither a
/// usable name nor an external id.
pub fn normalize_item(raw: &Value) -> Option<InventoryItem> {
    let obj = raw.as_object()?;
    let item = InventoryItem {
        external_id: coerce_string(obj.get("externalId")),
        name: coerce_string(obj.get("name")).unwrap_or_default(),
        set_name: coerce_string(obj.get("setName")),
        quantity: coerce_quantity(obj.get("quantity")),
        market_price: coerce_money(obj.get("marketPrice")),
        your_price: coerce_money(obj.get("yourPrice")),
        pricing_percent: coerce_pricing_percent(obj.get("pricingPercent")),
        last_updated: coerce_timestamp(obj.get("lastUpdated")),
        baseline_price: coerce_money(obj.get("baselinePrice")),
        baseline_at: coerce_timestamp(obj.get("baselineAt")),
        image_url: coerce_string(obj.get("imageUrl")),
        source_url: coerce_string(obj.get("sourceUrl")),
        price_error: coerce_string(obj.get("priceError")),
    };
    item.key().map(|_| item)
}

/// Normalize a raw list of records into canonical items
///
/// Records without an identity are dropped; so is every record after the
/// first to claim an identity key. A non-list input is rejected outright -
/// swallowing it would present an empty catalog as a valid replacement.
pub fn normalize_collection(raw: &Value) -> Result<Vec<InventoryItem>> {
    let list = raw
        .as_array()
        .ok_or_else(|| Error::InvalidPayload("expected a list of records".to_string()))?;

    let mut seen: HashSet<ItemKey> = HashSet::new();
    let mut items = Vec::with_capacity(list.len());
    let mut dropped = 0usize;
    let mut duplicates = 0usize;

    for raw_item in list {
        let Some(item) = normalize_item(raw_item) else {
            dropped += 1;
            continue;
        };
        // key() is Some here; normalize_item guarantees it
        let Some(key) = item.key() else { continue };
        if !seen.insert(key) {
            duplicates += 1;
            continue;
        }
        items.push(item);
    }

    if dropped > 0 || duplicates > 0 {
        log::debug!(
            "Normalized {} records: {} kept, {} without identity, {} duplicate identities",
            list.len(),
            items.len(),
            dropped,
            duplicates
        );
    }
    Ok(items)
}

/// Re-validate an already-typed collection before persisting
///
/// Drops identity-less records, keeps the first record per identity key, and
/// re-rounds money fields, so the persisted file satisfies the schema
/// invariants no matter which path produced the items.
pub fn normalize_items(items: Vec<InventoryItem>) -> Vec<InventoryItem> {
    let mut seen: HashSet<ItemKey> = HashSet::new();
    let mut out = Vec::with_capacity(items.len());
    for mut item in items {
        let Some(key) = item.key() else { continue };
        if !seen.insert(key) {
            log::warn!("Dropping duplicate identity before write: {}", item.name);
            continue;
        }
        item.market_price = item.market_price.map(round_cents);
        item.your_price = item.your_price.map(round_cents);
        item.baseline_price = item.baseline_price.map(round_cents);
        out.push(item);
    }
    out
}

fn coerce_string(value: Option<&Value>) -> Option<String> {
    let s = value?.as_str()?.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

fn coerce_number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn coerce_money(value: Option<&Value>) -> Option<f64> {
    let n = coerce_number(value)?;
    if n.is_finite() {
        Some(round_cents(n))
    } else {
        None
    }
}

fn coerce_quantity(value: Option<&Value>) -> u32 {
    match coerce_number(value) {
        Some(n) if n.is_finite() && n > 0.0 => n.trunc() as u32,
        _ => 0,
    }
}

fn coerce_timestamp(value: Option<&Value>) -> Option<String> {
    let s = coerce_string(value)?;
    chrono::DateTime::parse_from_rfc3339(&s).ok()?;
    Some(s)
}

fn coerce_pricing_percent(value: Option<&Value>) -> Option<f64> {
    let n = coerce_number(value)?;
    if n.is_finite() && (PRICING_PERCENT_MIN..=PRICING_PERCENT_MAX).contains(&n) {
        Some(n)
    } else {
        None
    }
}

#[cfg(test)]
pub use tests::make_test_item;
