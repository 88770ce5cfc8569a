//! Batch response parsing and per-card price extraction

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::catalog::round_cents;

/// Largest price accepted from the service before it is treated as bogus data
pub const DEFAULT_MAX_PLAUSIBLE_PRICE: f64 = 10_000.0;

/// One condition variant of a returned card
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceVariant {
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
}

/// One card object from a batch lookup response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceCard {
    /// The service returns ids as strings or bare numbers depending on the
    /// endpoint revision; both are accepted
    #[serde(deserialize_with = "id_string")]
    pub product_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub set_name: Option<String>,
    #[serde(default)]
    pub variants: Vec<PriceVariant>,
}

fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "unsupported product id: {}",
            other
        ))),
    }
}

/// Why a lookup produced no usable price
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnpricedReason {
    /// Card returned, but no variant carried a price
    NoVariants,
    /// A price came back but failed the sanity bound
    InvalidPrice,
    /// The service did not return this identifier
    NotFound,
    /// The chunk holding this identifier failed on the network or with an
    /// error status
    FetchFailed,
    /// The chunk response was not one of the known envelope shapes
    BadResponse,
}

impl UnpricedReason {
    /// Stable reason code stored in an item's `priceError` field
    pub fn as_code(&self) -> &'static str {
        match self {
            UnpricedReason::NoVariants => "NO_VARIANTS",
            UnpricedReason::InvalidPrice => "INVALID_PRICE",
            UnpricedReason::NotFound => "NOT_FOUND",
            UnpricedReason::FetchFailed => "FETCH_FAILED",
            UnpricedReason::BadResponse => "BAD_RESPONSE",
        }
    }
}

/// Outcome of one identifier's batch lookup
#[derive(Debug, Clone, PartialEq)]
pub enum PriceResult {
    /// Usable price plus whatever naming metadata the service returned
    Priced {
        price: f64,
        name: Option<String>,
        set_name: Option<String>,
    },
    /// No usable price this run
    Unpriced(UnpricedReason),
}

/// Pull the card array out of a batch response
///
/// Accepts the two shapes the service is known to produce: a bare array, or
/// an object with a `data` array. Anything else is a shape error for the
/// whole chunk. Individual card objects that fail to parse are skipped.
pub fn extract_cards(body: &Value) -> Option<Vec<PriceCard>> {
    let list = match body {
        Value::Array(list) => list,
        Value::Object(obj) => obj.get("data")?.as_array()?,
        _ => return None,
    };

    let mut cards = Vec::with_capacity(list.len());
    for entry in list {
        match serde_json::from_value::<PriceCard>(entry.clone()) {
            Ok(card) => cards.push(card),
            Err(e) => log::warn!("Skipping malformed card object in batch response: {}", e),
        }
    }
    Some(cards)
}

/// Pick the price for a card: exact condition match first, then the first
/// variant that carries any price at all
///
/// The fallback can select an unrelated condition's price when the target
/// condition is missing. That matches the service's observed behavior and is
/// kept as documented behavior.
pub fn select_variant(card: &PriceCard, target_condition: &str) -> Option<f64> {
    if let Some(variant) = card
        .variants
        .iter()
        .find(|v| v.condition.as_deref() == Some(target_condition))
    {
        if let Some(price) = variant.price {
            return Some(price);
        }
    }
    card.variants.iter().find_map(|v| v.price)
}

/// Sanity bound on a returned price
pub fn price_is_plausible(price: f64, max_price: f64) -> bool {
    price.is_finite() && price > 0.0 && price <= max_price
}

/// Reduce one card to the per-identifier outcome
pub fn card_result(card: &PriceCard, target_condition: &str, max_price: f64) -> PriceResult {
    match select_variant(card, target_condition) {
        None => PriceResult::Unpriced(UnpricedReason::NoVariants),
        Some(price) if !price_is_plausible(price, max_price) => {
            PriceResult::Unpriced(UnpricedReason::InvalidPrice)
        }
        Some(price) => PriceResult::Priced {
            price: round_cents(price),
            name: card.name.clone(),
            set_name: card.set_name.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Card with the given variants
    fn make_test_card(product_id: &str, variants: Vec<(Option<&str>, Option<f64>)>) -> PriceCard {
        PriceCard {
            product_id: product_id.to_string(),
            name: Some(format!("Card {}", product_id)),
            set_name: Some("Test Set".to_string()),
            variants: variants
                .into_iter()
                .map(|(condition, price)| PriceVariant {
                    condition: condition.map(str::to_string),
                    price,
                })
                .collect(),
        }
    }

    #[test]
    fn card_deserializes_with_string_or_numeric_id() {
        let from_string: PriceCard = serde_json::from_value(json!({
            "productId": "111",
            "name": "Booster Box",
            "variants": [{ "condition": "Sealed", "price": 99.99 }]
        }))
        .unwrap();
        assert_eq!(from_string.product_id, "111");

        let from_number: PriceCard =
            serde_json::from_value(json!({ "productId": 111 })).unwrap();
        assert_eq!(from_number.product_id, "111");
        assert!(from_number.variants.is_empty());
    }

    #[test]
    fn card_with_boolean_id_is_rejected() {
        let result = serde_json::from_value::<PriceCard>(json!({ "productId": true }));
        assert!(result.is_err());
    }

    #[test]
    fn select_variant_prefers_exact_condition() {
        let card = make_test_card(
            "1",
            vec![(Some("Lightly Played"), Some(80.0)), (Some("Sealed"), Some(100.0))],
        );
        assert_eq!(select_variant(&card, "Sealed"), Some(100.0));
    }

    #[test]
    fn select_variant_falls_back_to_first_priced() {
        let card = make_test_card(
            "1",
            vec![(Some("Damaged"), None), (Some("Lightly Played"), Some(80.0))],
        );
        // No "Sealed" variant: the first variant carrying a price wins,
        // whatever its condition says
        assert_eq!(select_variant(&card, "Sealed"), Some(80.0));
    }

    #[test]
    fn select_variant_with_unpriced_exact_match_still_falls_back() {
        let card = make_test_card(
            "1",
            vec![(Some("Sealed"), None), (Some("Damaged"), Some(12.5))],
        );
        assert_eq!(select_variant(&card, "Sealed"), Some(12.5));
    }

    #[test]
    fn select_variant_none_when_nothing_priced() {
        let card = make_test_card("1", vec![(Some("Sealed"), None), (None, None)]);
        assert_eq!(select_variant(&card, "Sealed"), None);

        let empty = make_test_card("1", vec![]);
        assert_eq!(select_variant(&empty, "Sealed"), None);
    }

    #[test]
    fn plausibility_bounds() {
        assert!(price_is_plausible(0.01, DEFAULT_MAX_PLAUSIBLE_PRICE));
        assert!(price_is_plausible(10_000.0, DEFAULT_MAX_PLAUSIBLE_PRICE));
        assert!(!price_is_plausible(0.0, DEFAULT_MAX_PLAUSIBLE_PRICE));
        assert!(!price_is_plausible(-5.0, DEFAULT_MAX_PLAUSIBLE_PRICE));
        assert!(!price_is_plausible(10_000.01, DEFAULT_MAX_PLAUSIBLE_PRICE));
        assert!(!price_is_plausible(f64::NAN, DEFAULT_MAX_PLAUSIBLE_PRICE));
        assert!(!price_is_plausible(f64::INFINITY, DEFAULT_MAX_PLAUSIBLE_PRICE));
    }

    #[test]
    fn card_result_rounds_and_carries_metadata() {
        let card = make_test_card("1", vec![(Some("Sealed"), Some(99.999))]);
        match card_result(&card, "Sealed", DEFAULT_MAX_PLAUSIBLE_PRICE) {
            PriceResult::Priced { price, name, set_name } => {
                assert_eq!(price, 100.0);
                assert_eq!(name.as_deref(), Some("Card 1"));
                assert_eq!(set_name.as_deref(), Some("Test Set"));
            }
            other => panic!("expected a priced result, got {:?}", other),
        }
    }

    #[test]
    fn card_result_reasons() {
        let no_variants = make_test_card("1", vec![(Some("Sealed"), None)]);
        assert_eq!(
            card_result(&no_variants, "Sealed", DEFAULT_MAX_PLAUSIBLE_PRICE),
            PriceResult::Unpriced(UnpricedReason::NoVariants)
        );

        let implausible = make_test_card("1", vec![(Some("Sealed"), Some(99_999.0))]);
        assert_eq!(
            card_result(&implausible, "Sealed", DEFAULT_MAX_PLAUSIBLE_PRICE),
            PriceResult::Unpriced(UnpricedReason::InvalidPrice)
        );
    }

    #[test]
    fn extract_cards_handles_both_envelopes() {
        let bare = json!([{ "productId": "1" }, { "productId": "2" }]);
        assert_eq!(extract_cards(&bare).unwrap().len(), 2);

        let enveloped = json!({ "data": [{ "productId": "1" }] });
        assert_eq!(extract_cards(&enveloped).unwrap().len(), 1);
    }

    #[test]
    fn extract_cards_rejects_unknown_shapes() {
        assert!(extract_cards(&json!({ "results": [] })).is_none());
        assert!(extract_cards(&json!("oops")).is_none());
        assert!(extract_cards(&json!(7)).is_none());
        assert!(extract_cards(&json!({ "data": "not a list" })).is_none());
    }

    #[test]
    fn extract_cards_skips_malformed_entries() {
        let body = json!([{ "productId": "1" }, { "productId": null }, 42]);
        let cards = extract_cards(&body).unwrap();
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].product_id, "1");
    }
}
