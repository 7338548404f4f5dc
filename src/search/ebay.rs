//! eBay Browse API provider.
//!
//! Auth is the OAuth client-credentials grant. The bearer token lives in a
//! cache internal to this client and is refreshed shortly before its
//! reported expiry; nothing outside this module ever sees it.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::{ConfigError, SearchError};
use crate::search::{
    BuyingFormat, Condition, SearchFilters, SearchPage, SearchProvider, SortOrder,
};
use crate::store::NewItem;

pub const SOURCE: &str = "ebay";

const DEFAULT_BASE_URL: &str = "https://api.ebay.com";
const TOKEN_PATH: &str = "/identity/v1/oauth2/token";
const BROWSE_SEARCH_PATH: &str = "/buy/browse/v1/item_summary/search";
const OAUTH_SCOPE: &str = "https://api.ebay.com/oauth/api_scope";
const MARKETPLACE_ID: &str = "EBAY_US";

/// Tokens are refreshed this long before their reported expiry.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct EbayConfig {
    pub client_id: String,
    pub client_secret: SecretString,
    pub base_url: String,
}

impl EbayConfig {
    /// Build from environment variables. Both credentials are required.
    pub fn from_env() -> Result<Self, ConfigError> {
        let client_id = std::env::var("EBAY_CLIENT_ID")
            .map_err(|_| ConfigError::MissingEnvVar("EBAY_CLIENT_ID".to_string()))?;
        let client_secret = std::env::var("EBAY_CLIENT_SECRET")
            .map_err(|_| ConfigError::MissingEnvVar("EBAY_CLIENT_SECRET".to_string()))?;
        let base_url =
            std::env::var("EBAY_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());

        Ok(Self {
            client_id,
            client_secret: SecretString::from(client_secret),
            base_url,
        })
    }
}

struct CachedToken {
    token: SecretString,
    expires_at: Instant,
}

pub struct EbayClient {
    client: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: SecretString,
    token_cache: Mutex<Option<CachedToken>>,
}

impl EbayClient {
    pub fn new(config: &EbayConfig) -> Result<Self, SearchError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| SearchError::RequestFailed {
                provider: SOURCE.to_string(),
                reason: format!("Failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            token_cache: Mutex::new(None),
        })
    }

    /// Returns a bearer token, reusing the cached one while it is still
    /// comfortably inside its lifetime. The lock is held across the refresh
    /// so concurrent searches do not stampede the token endpoint.
    async fn access_token(&self) -> Result<SecretString, SearchError> {
        let mut cache = self.token_cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if Instant::now() + TOKEN_REFRESH_MARGIN < cached.expires_at {
                return Ok(cached.token.clone());
            }
        }

        let url = format!("{}{TOKEN_PATH}", self.base_url);
        let response = self
            .client
            .post(&url)
            .basic_auth(&self.client_id, Some(self.client_secret.expose_secret()))
            .form(&[("grant_type", "client_credentials"), ("scope", OAUTH_SCOPE)])
            .send()
            .await
            .map_err(|e| SearchError::Auth {
                provider: SOURCE.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::Auth {
                provider: SOURCE.to_string(),
                reason: format!("token request failed ({}): {body}", status.as_u16()),
            });
        }

        let token: TokenResponse =
            response
                .json()
                .await
                .map_err(|e| SearchError::InvalidResponse {
                    provider: SOURCE.to_string(),
                    reason: e.to_string(),
                })?;
        let Some(access_token) = token.access_token else {
            return Err(SearchError::Auth {
                provider: SOURCE.to_string(),
                reason: "token response carried no access_token".to_string(),
            });
        };

        let secret = SecretString::from(access_token);
        *cache = Some(CachedToken {
            token: secret.clone(),
            expires_at: Instant::now() + Duration::from_secs(token.expires_in.unwrap_or(0)),
        });
        Ok(secret)
    }
}

#[async_trait]
impl SearchProvider for EbayClient {
    fn name(&self) -> &str {
        SOURCE
    }

    async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        offset: u64,
        limit: u64,
    ) -> Result<SearchPage, SearchError> {
        let token = self.access_token().await?;

        let url = format!("{}{BROWSE_SEARCH_PATH}", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&query_params(query, filters, offset, limit))
            .bearer_auth(token.expose_secret())
            .header("X-EBAY-C-MARKETPLACE-ID", MARKETPLACE_ID)
            .send()
            .await
            .map_err(|e| SearchError::RequestFailed {
                provider: SOURCE.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::Status {
                provider: SOURCE.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let data: BrowseResponse =
            response
                .json()
                .await
                .map_err(|e| SearchError::InvalidResponse {
                    provider: SOURCE.to_string(),
                    reason: e.to_string(),
                })?;
        Ok(page_from_response(data, offset))
    }
}

// ── Wire format ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BrowseResponse {
    #[serde(default)]
    item_summaries: Vec<ItemSummary>,
    total: Option<u64>,
    offset: Option<u64>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemSummary {
    item_id: Option<String>,
    title: Option<String>,
    price: Option<Money>,
    image: Option<Image>,
    item_web_url: Option<String>,
    condition: Option<String>,
    seller: Option<Seller>,
    #[serde(default)]
    shipping_options: Vec<ShippingOption>,
    item_location: Option<Location>,
}

#[derive(Debug, Deserialize)]
struct Money {
    value: Option<String>,
    currency: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Image {
    image_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Seller {
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShippingOption {
    shipping_cost: Option<Money>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Location {
    city: Option<String>,
    state_or_province: Option<String>,
    country: Option<String>,
}

// ── Request building ────────────────────────────────────────────────

fn sort_param(sort: SortOrder) -> &'static str {
    match sort {
        SortOrder::BestMatch => "BEST_MATCH",
        SortOrder::PriceAsc => "PRICE_PLUS_SHIPPING_LOWEST",
        SortOrder::PriceDesc => "PRICE_PLUS_SHIPPING_HIGHEST",
        SortOrder::NewlyListed => "NEWLY_LISTED",
    }
}

/// Builds the comma-joined Browse `filter` expression, or None when nothing
/// applies.
fn filter_expr(filters: &SearchFilters) -> Option<String> {
    let mut parts: Vec<String> = Vec::new();

    let min = filters
        .min_price_usd
        .filter(|v| v.is_finite())
        .map(|v| v.max(0.0));
    let max = filters
        .max_price_usd
        .filter(|v| v.is_finite())
        .map(|v| v.max(0.0));
    match (min, max) {
        (Some(lo), Some(hi)) => {
            // An inverted range is the model being confused; swap the bounds
            // rather than sending eBay an empty window.
            let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
            parts.push(format!("price:[{lo}..{hi}]"));
            parts.push("priceCurrency:USD".to_string());
        }
        (Some(lo), None) => {
            parts.push(format!("price:[{lo}..]"));
            parts.push("priceCurrency:USD".to_string());
        }
        (None, Some(hi)) => {
            parts.push(format!("price:[..{hi}]"));
            parts.push("priceCurrency:USD".to_string());
        }
        (None, None) => {}
    }

    if let Some(condition) = filters.condition {
        parts.push(match condition {
            Condition::New => "conditionIds:{1000}".to_string(),
            Condition::Used => "conditionIds:{3000}".to_string(),
            Condition::Refurbished => "conditionIds:{2000|2500}".to_string(),
        });
    }

    if let Some(format) = filters.buying_format {
        parts.push(match format {
            BuyingFormat::FixedPrice => "buyingOptions:{FIXED_PRICE}".to_string(),
            BuyingFormat::Auction => "buyingOptions:{AUCTION}".to_string(),
        });
    }

    if filters.free_shipping_only == Some(true) {
        // Browse has no free-shipping flag; a zero delivery-cost cap is the
        // standard workaround.
        parts.push("maxDeliveryCost:0".to_string());
    }
    if filters.returns_accepted_only == Some(true) {
        parts.push("returnsAccepted:true".to_string());
    }

    if let Some(country) = filters
        .item_location_country
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
    {
        parts.push(format!("itemLocationCountry:{}", country.to_uppercase()));
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(","))
    }
}

fn query_params(
    query: &str,
    filters: &SearchFilters,
    offset: u64,
    limit: u64,
) -> Vec<(&'static str, String)> {
    let mut params: Vec<(&'static str, String)> = Vec::new();

    let q = match filters
        .brand
        .as_deref()
        .map(str::trim)
        .filter(|b| !b.is_empty())
    {
        Some(brand) => format!("{brand} {query}"),
        None => query.to_string(),
    };
    params.push(("q", q));
    params.push(("limit", limit.to_string()));
    if offset > 0 {
        params.push(("offset", offset.to_string()));
    }
    // Seller, shipping and description fields ride on the EXTENDED group.
    params.push(("fieldgroups", "PRODUCT,EXTENDED".to_string()));

    if let Some(category) = filters
        .category_id
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
    {
        params.push(("category_ids", category.to_string()));
    }

    params.push((
        "sort",
        sort_param(filters.sort.unwrap_or(SortOrder::BestMatch)).to_string(),
    ));

    if let Some(expr) = filter_expr(filters) {
        params.push(("filter", expr));
    }

    params
}

// ── Response mapping ────────────────────────────────────────────────

fn cents(value: f64) -> i64 {
    (value * 100.0).round() as i64
}

fn map_summary(summary: ItemSummary) -> Option<NewItem> {
    let external_id = summary.item_id?;
    let title = summary.title?;
    let price = summary.price.as_ref()?;
    let raw_value = price.value.as_deref()?.trim();

    let value: f64 = match raw_value.parse() {
        Ok(v) => v,
        Err(_) => {
            warn!("eBay returned invalid price for item {external_id}: {raw_value}");
            return None;
        }
    };
    let currency = price
        .currency
        .clone()
        .unwrap_or_else(|| "USD".to_string());

    let shipping_cents = summary
        .shipping_options
        .iter()
        .find_map(|opt| opt.shipping_cost.as_ref().and_then(|c| c.value.as_deref()))
        .and_then(|v| v.trim().parse::<f64>().ok())
        .map(cents);

    let location = summary
        .item_location
        .as_ref()
        .map(|loc| {
            [
                loc.city.as_deref(),
                loc.state_or_province.as_deref(),
                loc.country.as_deref(),
            ]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(", ")
        })
        .filter(|joined| !joined.is_empty());

    Some(NewItem {
        source: SOURCE.to_string(),
        external_id,
        title,
        price_cents: Some(cents(value)),
        currency,
        url: summary.item_web_url.clone(),
        affiliate_url: summary.item_web_url,
        image_url: summary.image.and_then(|i| i.image_url),
        seller: summary.seller.and_then(|s| s.username),
        shipping_cents,
        location,
        condition: summary.condition,
    })
}

fn page_from_response(data: BrowseResponse, offset: u64) -> SearchPage {
    let api_offset = data.offset.unwrap_or(offset);
    let next_offset = data.next.as_deref().and_then(next_offset_from_href);

    let items: Vec<NewItem> = data
        .item_summaries
        .into_iter()
        .filter_map(map_summary)
        .collect();

    let total = data.total.unwrap_or(api_offset + items.len() as u64);
    SearchPage {
        items,
        total: Some(total),
        next_offset,
    }
}

/// The Browse API hands back a fully-formed `next` URL; the `offset` query
/// parameter inside it is the only part we need.
fn next_offset_from_href(href: &str) -> Option<u64> {
    let url = reqwest::Url::parse(href).ok()?;
    url.query_pairs()
        .find(|(key, _)| key.as_ref() == "offset")
        .and_then(|(_, value)| value.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_range_filter_swaps_inverted_bounds() {
        let f = SearchFilters {
            min_price_usd: Some(90.0),
            max_price_usd: Some(30.0),
            ..Default::default()
        };
        let expr = filter_expr(&f).unwrap();
        assert!(expr.contains("price:[30..90]"));
        assert!(expr.contains("priceCurrency:USD"));
    }

    #[test]
    fn open_ended_price_ranges_keep_one_side_empty() {
        let min_only = SearchFilters {
            min_price_usd: Some(5.0),
            ..Default::default()
        };
        assert!(filter_expr(&min_only).unwrap().contains("price:[5..]"));

        let max_only = SearchFilters {
            max_price_usd: Some(30.0),
            ..Default::default()
        };
        assert!(filter_expr(&max_only).unwrap().contains("price:[..30]"));
    }

    #[test]
    fn condition_format_and_flags_map_to_browse_syntax() {
        let f = SearchFilters {
            condition: Some(Condition::Refurbished),
            buying_format: Some(BuyingFormat::FixedPrice),
            free_shipping_only: Some(true),
            returns_accepted_only: Some(true),
            item_location_country: Some("us".into()),
            ..Default::default()
        };
        assert_eq!(
            filter_expr(&f).unwrap(),
            "conditionIds:{2000|2500},buyingOptions:{FIXED_PRICE},maxDeliveryCost:0,returnsAccepted:true,itemLocationCountry:US"
        );
    }

    #[test]
    fn no_filters_means_no_filter_param() {
        assert_eq!(filter_expr(&SearchFilters::default()), None);
    }

    #[test]
    fn brand_is_prefixed_to_the_query() {
        let f = SearchFilters {
            brand: Some(" Anker ".into()),
            ..Default::default()
        };
        let params = query_params("usb hub", &f, 0, 20);
        assert!(params.contains(&("q", "Anker usb hub".to_string())));
    }

    #[test]
    fn offset_zero_is_omitted_from_params() {
        let params = query_params("ssd", &SearchFilters::default(), 0, 20);
        assert!(!params.iter().any(|(k, _)| *k == "offset"));

        let params = query_params("ssd", &SearchFilters::default(), 40, 20);
        assert!(params.contains(&("offset", "40".to_string())));
    }

    #[test]
    fn sort_defaults_to_best_match() {
        let params = query_params("ssd", &SearchFilters::default(), 0, 20);
        assert!(params.contains(&("sort", "BEST_MATCH".to_string())));

        let f = SearchFilters {
            sort: Some(SortOrder::PriceDesc),
            ..Default::default()
        };
        let params = query_params("ssd", &f, 0, 20);
        assert!(params.contains(&("sort", "PRICE_PLUS_SHIPPING_HIGHEST".to_string())));
    }

    #[test]
    fn summaries_without_id_title_or_price_are_dropped() {
        let data: BrowseResponse = serde_json::from_value(serde_json::json!({
            "itemSummaries": [
                { "itemId": "v1|1|0", "title": "Priced", "price": { "value": "19.99", "currency": "USD" } },
                { "itemId": "v1|2|0", "title": "No price" },
                { "title": "No id", "price": { "value": "5.00" } },
            ],
            "total": 3,
        }))
        .unwrap();
        let page = page_from_response(data, 0);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].external_id, "v1|1|0");
        assert_eq!(page.items[0].price_cents, Some(1999));
        assert_eq!(page.total, Some(3));
    }

    #[test]
    fn summary_maps_seller_shipping_and_location() {
        let data: BrowseResponse = serde_json::from_value(serde_json::json!({
            "itemSummaries": [{
                "itemId": "v1|100|0",
                "title": "Cordless drill",
                "price": { "value": "64.50", "currency": "USD" },
                "image": { "imageUrl": "https://img.example/drill.jpg" },
                "itemWebUrl": "https://www.ebay.com/itm/100",
                "condition": "Used",
                "seller": { "username": "toolbarn" },
                "shippingOptions": [{ "shippingCost": { "value": "7.25", "currency": "USD" } }],
                "itemLocation": { "city": "Tampa", "stateOrProvince": "FL", "country": "US" },
            }],
        }))
        .unwrap();
        let page = page_from_response(data, 0);
        let item = &page.items[0];
        assert_eq!(item.price_cents, Some(6450));
        assert_eq!(item.shipping_cents, Some(725));
        assert_eq!(item.seller.as_deref(), Some("toolbarn"));
        assert_eq!(item.location.as_deref(), Some("Tampa, FL, US"));
        assert_eq!(item.condition.as_deref(), Some("Used"));
        assert_eq!(item.affiliate_url.as_deref(), Some("https://www.ebay.com/itm/100"));
        assert_eq!(item.image_url.as_deref(), Some("https://img.example/drill.jpg"));
    }

    #[test]
    fn next_offset_comes_from_the_next_href() {
        assert_eq!(
            next_offset_from_href(
                "https://api.ebay.com/buy/browse/v1/item_summary/search?q=ssd&limit=20&offset=20"
            ),
            Some(20)
        );
        assert_eq!(next_offset_from_href("not a url"), None);
    }

    #[test]
    fn total_falls_back_to_offset_plus_len() {
        let data: BrowseResponse = serde_json::from_value(serde_json::json!({
            "itemSummaries": [
                { "itemId": "v1|1|0", "title": "A", "price": { "value": "1.00" } },
                { "itemId": "v1|2|0", "title": "B", "price": { "value": "2.00" } },
            ],
        }))
        .unwrap();
        let page = page_from_response(data, 40);
        assert_eq!(page.total, Some(42));
    }
}
