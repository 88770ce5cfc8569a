//! HTTP client for the batch pricing service
//!
//! One POST per chunk of identifiers, authenticated with a static API key
//! header. Chunks run strictly one at a time behind the rate limiter; a chunk
//! that fails never aborts the run, it only marks its own identifiers.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::rate_limit::RateLimiter;

use super::batch::{card_result, extract_cards, PriceCard, PriceResult, UnpricedReason};
use super::batch::DEFAULT_MAX_PLAUSIBLE_PRICE;

/// Identifiers per batch call; the service accepts up to 100 per request
pub const DEFAULT_CHUNK_SIZE: usize = 40;

/// Batch calls allowed per rolling minute
pub const DEFAULT_MAX_CALLS_PER_MINUTE: usize = 60;

/// Condition label preferred when selecting a variant
pub const DEFAULT_TARGET_CONDITION: &str = "Sealed";

/// Configuration for the pricing service client
#[derive(Debug, Clone)]
pub struct PriceApiConfig {
    /// Batch lookup endpoint
    pub base_url: String,
    /// Static API key sent as the `X-Api-Key` header
    pub api_key: String,
    pub chunk_size: usize,
    pub target_condition: String,
    /// Prices above this are rejected as bogus data
    pub max_price: f64,
    pub max_calls_per_minute: usize,
    pub timeout: Duration,
}

impl PriceApiConfig {
    /// Config pointed at a given endpoint, defaults everywhere else
    pub fn for_base_url(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            target_condition: DEFAULT_TARGET_CONDITION.to_string(),
            max_price: DEFAULT_MAX_PLAUSIBLE_PRICE,
            max_calls_per_minute: DEFAULT_MAX_CALLS_PER_MINUTE,
            timeout: Duration::from_secs(20),
        }
    }

    /// Build a config from `CATALOG_SYNC_*` environment variables
    ///
    /// `CATALOG_SYNC_API_URL` and `CATALOG_SYNC_API_KEY` are required; the
    /// tunables fall back to their defaults.
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("CATALOG_SYNC_API_URL").ok()?;
        let api_key = std::env::var("CATALOG_SYNC_API_KEY").ok()?;

        let mut config = Self::for_base_url(base_url, api_key);
        config.chunk_size = env_usize("CATALOG_SYNC_CHUNK_SIZE", DEFAULT_CHUNK_SIZE);
        if let Ok(condition) = std::env::var("CATALOG_SYNC_CONDITION") {
            config.target_condition = condition;
        }
        config.max_price = env_f64("CATALOG_SYNC_MAX_PRICE", DEFAULT_MAX_PLAUSIBLE_PRICE);
        config.max_calls_per_minute = env_usize(
            "CATALOG_SYNC_MAX_CALLS_PER_MINUTE",
            DEFAULT_MAX_CALLS_PER_MINUTE,
        );
        config.timeout = Duration::from_secs(env_usize("CATALOG_SYNC_HTTP_TIMEOUT_SECS", 20) as u64);
        Some(config)
    }
}

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_f64(name: &str, default: f64) -> f64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Client for the batch pricing service
pub struct PriceApi {
    client: reqwest::Client,
    config: PriceApiConfig,
    limiter: Arc<RateLimiter>,
}

impl PriceApi {
    /// Client with its own rate limiter
    pub fn new(config: PriceApiConfig) -> Self {
        let limiter = Arc::new(RateLimiter::per_minute(config.max_calls_per_minute));
        Self::with_limiter(config, limiter)
    }

    /// Client sharing an externally owned limiter with other call sites
    pub fn with_limiter(config: PriceApiConfig, limiter: Arc<RateLimiter>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            config,
            limiter,
        }
    }

    /// Look up prices for a set of identifiers
    ///
    /// Identifiers are deduplicated (first occurrence keeps the ordering) and
    /// chunked; each chunk is one rate-limited batch call. Every identifier
    /// ends up in the result map: priced, or unpriced with a reason. A chunk
    /// that fails wholesale marks its identifiers and the run moves on - no
    /// within-run retry beyond waiting for the next window slot.
    pub async fn fetch_prices(&self, identifiers: &[String]) -> HashMap<String, PriceResult> {
        let mut results = HashMap::new();
        let ids = dedupe(identifiers);
        if ids.is_empty() {
            return results;
        }

        let chunk_size = self.config.chunk_size.max(1);
        log::info!(
            "Fetching prices for {} identifier(s) in {} chunk(s)",
            ids.len(),
            ids.len().div_ceil(chunk_size)
        );

        for chunk in ids.chunks(chunk_size) {
            self.limiter.acquire().await;
            match self.fetch_chunk(chunk).await {
                Ok(cards) => {
                    let by_id: HashMap<&str, &PriceCard> =
                        cards.iter().map(|c| (c.product_id.as_str(), c)).collect();
                    for id in chunk {
                        let result = match by_id.get(id.as_str()) {
                            Some(card) => card_result(
                                card,
                                &self.config.target_condition,
                                self.config.max_price,
                            ),
                            None => PriceResult::Unpriced(UnpricedReason::NotFound),
                        };
                        results.insert(id.clone(), result);
                    }
                }
                Err(Error::BadResponse(msg)) => {
                    log::warn!(
                        "Skipping a {}-identifier chunk, unexpected response shape: {}",
                        chunk.len(),
                        msg
                    );
                    mark_chunk(&mut results, chunk, UnpricedReason::BadResponse);
                }
                Err(e) => {
                    log::warn!(
                        "Skipping a {}-identifier chunk, batch call failed: {}",
                        chunk.len(),
                        e
                    );
                    mark_chunk(&mut results, chunk, UnpricedReason::FetchFailed);
                }
            }
        }

        results
    }

    async fn fetch_chunk(&self, chunk: &[String]) -> Result<Vec<PriceCard>> {
        let lookups: Vec<Value> = chunk.iter().map(|id| json!({ "productId": id })).collect();

        log::debug!("Requesting prices for a chunk of {} identifier(s)", chunk.len());
        let response = self
            .client
            .post(&self.config.base_url)
            .header("X-Api-Key", &self.config.api_key)
            .json(&lookups)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::HttpStatus(response.status()));
        }

        let body: Value = response.json().await?;
        extract_cards(&body).ok_or_else(|| {
            Error::BadResponse("expected a card array or an object with a data array".to_string())
        })
    }
}

fn mark_chunk(
    results: &mut HashMap<String, PriceResult>,
    chunk: &[String],
    reason: UnpricedReason,
) {
    for id in chunk {
        results.insert(id.clone(), PriceResult::Unpriced(reason));
    }
}

fn dedupe(identifiers: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    identifiers
        .iter()
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn card_json(id: &str, price: f64) -> Value {
        json!({
            "productId": id,
            "name": format!("Card {}", id),
            "setName": "Test Set",
            "variants": [{ "condition": "Sealed", "price": price }]
        })
    }

    #[test]
    fn dedupe_keeps_first_occurrence_order() {
        let deduped = dedupe(&ids(&["b", "a", "b", "c", "a"]));
        assert_eq!(deduped, ids(&["b", "a", "c"]));
    }

    #[tokio::test]
    async fn fetch_prices_maps_each_identifier() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("X-Api-Key", "test-key"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([card_json("111", 100.0), card_json("222", 55.5)])),
            )
            .mount(&server)
            .await;

        let api = PriceApi::new(PriceApiConfig::for_base_url(server.uri(), "test-key"));
        let results = api.fetch_prices(&ids(&["111", "222", "333"])).await;

        assert_eq!(results.len(), 3);
        assert!(matches!(
            results["111"],
            PriceResult::Priced { price, .. } if price == 100.0
        ));
        assert!(matches!(
            results["222"],
            PriceResult::Priced { price, .. } if price == 55.5
        ));
        assert_eq!(
            results["333"],
            PriceResult::Unpriced(UnpricedReason::NotFound)
        );
    }

    #[tokio::test]
    async fn fetch_prices_accepts_data_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "data": [card_json("111", 42.0)] })),
            )
            .mount(&server)
            .await;

        let api = PriceApi::new(PriceApiConfig::for_base_url(server.uri(), "k"));
        let results = api.fetch_prices(&ids(&["111"])).await;
        assert!(matches!(
            results["111"],
            PriceResult::Priced { price, .. } if price == 42.0
        ));
    }

    #[tokio::test]
    async fn error_status_marks_chunk_as_fetch_failed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let api = PriceApi::new(PriceApiConfig::for_base_url(server.uri(), "k"));
        let results = api.fetch_prices(&ids(&["111", "222"])).await;
        assert_eq!(
            results["111"],
            PriceResult::Unpriced(UnpricedReason::FetchFailed)
        );
        assert_eq!(
            results["222"],
            PriceResult::Unpriced(UnpricedReason::FetchFailed)
        );
    }

    #[tokio::test]
    async fn unknown_envelope_marks_chunk_as_bad_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "results": [] })))
            .mount(&server)
            .await;

        let api = PriceApi::new(PriceApiConfig::for_base_url(server.uri(), "k"));
        let results = api.fetch_prices(&ids(&["111"])).await;
        assert_eq!(
            results["111"],
            PriceResult::Unpriced(UnpricedReason::BadResponse)
        );
    }

    #[tokio::test]
    async fn failed_chunk_does_not_poison_other_chunks() {
        let server = MockServer::start().await;

        // Three chunks of two; the middle one blows up
        Mock::given(method("POST"))
            .and(body_string_contains("111"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([card_json("111", 10.0), card_json("222", 20.0)])),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("333"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("555"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([card_json("555", 50.0), card_json("666", 60.0)])),
            )
            .mount(&server)
            .await;

        let mut config = PriceApiConfig::for_base_url(server.uri(), "k");
        config.chunk_size = 2;
        let api = PriceApi::new(config);

        let results = api
            .fetch_prices(&ids(&["111", "222", "333", "444", "555", "666"]))
            .await;

        assert!(matches!(results["111"], PriceResult::Priced { .. }));
        assert!(matches!(results["222"], PriceResult::Priced { .. }));
        assert_eq!(
            results["333"],
            PriceResult::Unpriced(UnpricedReason::FetchFailed)
        );
        assert_eq!(
            results["444"],
            PriceResult::Unpriced(UnpricedReason::FetchFailed)
        );
        assert!(matches!(results["555"], PriceResult::Priced { .. }));
        assert!(matches!(results["666"], PriceResult::Priced { .. }));
    }

    #[tokio::test]
    async fn duplicate_identifiers_are_fetched_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([card_json("111", 9.0)])))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = PriceApiConfig::for_base_url(server.uri(), "k");
        config.chunk_size = 1;
        let api = PriceApi::new(config);

        let results = api.fetch_prices(&ids(&["111", "111", "111"])).await;
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn empty_identifier_list_makes_no_calls() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(0)
            .mount(&server)
            .await;

        let api = PriceApi::new(PriceApiConfig::for_base_url(server.uri(), "k"));
        let results = api.fetch_prices(&[]).await;
        assert!(results.is_empty());
    }
}
