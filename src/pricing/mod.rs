//! Batch pricing service client
//!
//! Chunked, rate-limited lookups against the external pricing API, plus the
//! per-card variant selection that reduces a response to one price per
//! identifier.

mod batch;
mod client;

pub use batch::{select_variant, PriceCard, PriceResult, PriceVariant, UnpricedReason};
pub use client::{PriceApi, PriceApiConfig};
