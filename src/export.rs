//! CSV export of the catalog
//!
//! One row per item with the deltas a spreadsheet triage needs. Consumed by
//! the CLI (`--export-csv`) and the web UI download endpoint.

use std::io::Write;

use serde::Serialize;

use crate::catalog::InventoryItem;
use crate::error::Result;
use crate::sync::price_delta;

#[derive(Debug, Serialize)]
struct ExportRow<'a> {
    #[serde(rename = "External ID")]
    external_id: &'a str,
    #[serde(rename = "Name")]
    name: &'a str,
    #[serde(rename = "Set")]
    set_name: &'a str,
    #[serde(rename = "Quantity")]
    quantity: u32,
    #[serde(rename = "Market Price")]
    market_price: Option<f64>,
    #[serde(rename = "Your Price")]
    your_price: Option<f64>,
    #[serde(rename = "Baseline Price")]
    baseline_price: Option<f64>,
    #[serde(rename = "Change Since Baseline %")]
    baseline_pct: Option<f64>,
    #[serde(rename = "Last Updated")]
    last_updated: &'a str,
    #[serde(rename = "Price Error")]
    price_error: &'a str,
}

/// Write the catalog as CSV
pub fn write_csv<W: Write>(writer: W, items: &[InventoryItem]) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);

    for item in items {
        let baseline_pct = match (item.market_price, item.baseline_price) {
            (Some(current), Some(baseline)) => price_delta(current, baseline)
                .pct
                .map(|pct| (pct * 100.0).round() / 100.0),
            _ => None,
        };

        csv_writer.serialize(ExportRow {
            external_id: item.external_id.as_deref().unwrap_or(""),
            name: &item.name,
            set_name: item.set_name.as_deref().unwrap_or(""),
            quantity: item.quantity,
            market_price: item.market_price,
            your_price: item.your_price,
            baseline_price: item.baseline_price,
            baseline_pct,
            last_updated: item.last_updated.as_deref().unwrap_or(""),
            price_error: item.price_error.as_deref().unwrap_or(""),
        })?;
    }

    csv_writer.flush()?;
    Ok(())
}

/// Render the catalog as a CSV string (for the web download endpoint)
pub fn to_csv_string(items: &[InventoryItem]) -> Result<String> {
    let mut buf = Vec::new();
    write_csv(&mut buf, items)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
