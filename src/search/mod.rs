//! Product search: the provider contract, the shared filter shape, and the
//! content-addressed cache key.
//!
//! Every provider speaks one contract: query + filters + page in, a page of
//! normalized items out. The cache key hashes the full request shape, so two
//! logically identical searches always land on the same cache row and
//! unrelated searches never collide.

use std::fmt::Write as _;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::SearchError;
use crate::store::NewItem;

pub mod ebay;
pub mod exa;
pub mod service;

pub use ebay::{EbayClient, EbayConfig};
pub use exa::{ExaClient, ExaConfig};
pub use service::{SearchResults, SearchService};

/// Bump whenever the key derivation or the filter shape changes, so old and
/// new cache generations never mix.
pub const CACHE_KEY_VERSION: &str = "v2";

/// Page size used when the caller does not ask for one.
pub const DEFAULT_PAGE_SIZE: u64 = 20;

/// Hard ceiling on page size, matching the eBay Browse API maximum.
pub const MAX_PAGE_SIZE: u64 = 50;

// ── Filters ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Condition {
    New,
    Used,
    Refurbished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BuyingFormat {
    FixedPrice,
    Auction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortOrder {
    BestMatch,
    PriceAsc,
    PriceDesc,
    NewlyListed,
}

/// How aggressively a web-search provider should widen its net.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchStrategy {
    Marketplace,
    Specialized,
    Broad,
}

/// One filter shape shared by every provider; each provider reads the fields
/// it understands and ignores the rest.
///
/// Field order is fixed and unset fields are skipped, so serialization is
/// canonical by construction: semantically equal filters always produce
/// byte-identical JSON. The cache key depends on this.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_price_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_price_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buying_format: Option<BuyingFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<SortOrder>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub free_shipping_only: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub returns_accepted_only: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_location_country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_domains: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_strategy: Option<SearchStrategy>,
}

impl SearchFilters {
    /// Canonical JSON used both for cache keying and for the persisted
    /// `filters_json` column. Unset fields are omitted entirely.
    pub fn canonical_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

// ── Cache key ──────────────────────────────────────────────────────────────

/// Derives the deterministic cache key for one search request.
///
/// The raw material is `version::source::query::filters::offset::limit`,
/// lowercased as a whole and hashed to a 64-char hex digest. Lowercasing
/// means "iPhone 15" and "iphone 15" share a row.
pub fn cache_key(
    source: &str,
    query: &str,
    filters: &SearchFilters,
    offset: u64,
    limit: u64,
) -> String {
    let raw = format!(
        "{CACHE_KEY_VERSION}::{source}::{query}::{}::{offset}::{limit}",
        filters.canonical_json()
    );
    let mut hasher = Sha256::new();
    hasher.update(raw.to_lowercase().as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for b in digest {
        let _ = write!(&mut out, "{b:02x}");
    }
    out
}

// ── Provider contract ──────────────────────────────────────────────────────

/// One page of provider results, before anything is persisted.
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub items: Vec<NewItem>,
    pub total: Option<u64>,
    pub next_offset: Option<u64>,
}

/// A product search backend.
///
/// Implementations own their credentials and any token caching internally;
/// callers only ever see the normalized page contract.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Stable lowercase provider name, also used as the item `source` tag.
    fn name(&self) -> &str;

    async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        offset: u64,
        limit: u64,
    ) -> Result<SearchPage, SearchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget_filters() -> SearchFilters {
        SearchFilters {
            max_price_usd: Some(50.0),
            condition: Some(Condition::New),
            sort: Some(SortOrder::PriceAsc),
            ..Default::default()
        }
    }

    #[test]
    fn equal_requests_share_a_key() {
        let a = cache_key("ebay", "wireless earbuds", &budget_filters(), 0, 20);
        let b = cache_key("ebay", "wireless earbuds", &budget_filters(), 0, 20);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn query_casing_does_not_fragment_the_cache() {
        let lower = cache_key("ebay", "iphone 15", &SearchFilters::default(), 0, 20);
        let mixed = cache_key("ebay", "iPhone 15", &SearchFilters::default(), 0, 20);
        assert_eq!(lower, mixed);
    }

    #[test]
    fn paging_and_source_are_part_of_the_key() {
        let base = cache_key("ebay", "ssd", &SearchFilters::default(), 0, 20);
        assert_ne!(base, cache_key("ebay", "ssd", &SearchFilters::default(), 20, 20));
        assert_ne!(base, cache_key("ebay", "ssd", &SearchFilters::default(), 0, 10));
        assert_ne!(base, cache_key("exa", "ssd", &SearchFilters::default(), 0, 20));
    }

    #[test]
    fn filters_change_the_key() {
        let plain = cache_key("ebay", "ssd", &SearchFilters::default(), 0, 20);
        let filtered = cache_key("ebay", "ssd", &budget_filters(), 0, 20);
        assert_ne!(plain, filtered);
    }

    #[test]
    fn empty_filters_serialize_to_empty_object() {
        assert_eq!(SearchFilters::default().canonical_json(), "{}");
    }

    #[test]
    fn canonical_json_has_fixed_field_order() {
        let filters = SearchFilters {
            min_price_usd: Some(10.0),
            max_price_usd: Some(25.0),
            brand: Some("Anker".into()),
            ..Default::default()
        };
        assert_eq!(
            filters.canonical_json(),
            r#"{"minPriceUsd":10.0,"maxPriceUsd":25.0,"brand":"Anker"}"#
        );
    }

    #[test]
    fn filters_parse_from_tool_arguments() {
        let filters: SearchFilters = serde_json::from_value(serde_json::json!({
            "maxPriceUsd": 50,
            "condition": "refurbished",
            "sort": "priceAsc",
            "searchStrategy": "broad",
        }))
        .unwrap();
        assert_eq!(filters.max_price_usd, Some(50.0));
        assert_eq!(filters.condition, Some(Condition::Refurbished));
        assert_eq!(filters.sort, Some(SortOrder::PriceAsc));
        assert_eq!(filters.search_strategy, Some(SearchStrategy::Broad));
    }
}
