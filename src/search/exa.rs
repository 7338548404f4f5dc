//! Exa neural web search provider.
//!
//! Covers the stores eBay cannot: official brand sites, Amazon, Walmart and
//! niche shops. Results are ordinary web pages, so pricing is best effort,
//! scraped from the page text when the API does not hand one back.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, SearchError};
use crate::search::{SearchFilters, SearchPage, SearchProvider, SearchStrategy};
use crate::store::NewItem;

pub const SOURCE: &str = "exa";

const DEFAULT_BASE_URL: &str = "https://api.exa.ai";
const SEARCH_PATH: &str = "/search";
const MAX_TEXT_CHARACTERS: u32 = 3000;

/// Domains pinned when the caller wants marketplace results but names none.
const MARKETPLACE_DOMAINS: &[&str] = &["amazon.com/dp", "ebay.com/itm"];

static AMAZON_ASIN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"amazon\.com/.*/([A-Z0-9]{10})").unwrap());
static EBAY_ITEM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"ebay\.com/itm/([A-Za-z0-9-]+)").unwrap());
static PRICE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\s?(\d{1,5}(?:\.\d{2})?)").unwrap());

#[derive(Debug, Clone)]
pub struct ExaConfig {
    pub api_key: SecretString,
    pub base_url: String,
}

impl ExaConfig {
    /// Build from environment variables. Only the API key is required.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var("EXA_API_KEY")
            .map_err(|_| ConfigError::MissingEnvVar("EXA_API_KEY".to_string()))?;
        let base_url =
            std::env::var("EXA_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());

        Ok(Self {
            api_key: SecretString::from(api_key),
            base_url,
        })
    }
}

pub struct ExaClient {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
}

impl ExaClient {
    pub fn new(config: &ExaConfig) -> Result<Self, SearchError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| SearchError::RequestFailed {
                provider: SOURCE.to_string(),
                reason: format!("Failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl SearchProvider for ExaClient {
    fn name(&self) -> &str {
        SOURCE
    }

    // Exa has no paging cursor; the offset only participates in cache keying.
    async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        _offset: u64,
        limit: u64,
    ) -> Result<SearchPage, SearchError> {
        let (include_domains, category) = request_plan(filters);
        let request = WireRequest {
            query,
            num_results: limit,
            kind: "auto",
            contents: WireContents {
                text: WireTextOptions {
                    max_characters: MAX_TEXT_CHARACTERS,
                },
            },
            category,
            include_domains,
            use_autoprompt: true,
        };

        let url = format!("{}{SEARCH_PATH}", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("x-api-key", self.api_key.expose_secret())
            .json(&request)
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

        let data: WireResponse =
            response
                .json()
                .await
                .map_err(|e| SearchError::InvalidResponse {
                    provider: SOURCE.to_string(),
                    reason: e.to_string(),
                })?;

        let items: Vec<NewItem> = data.results.into_iter().filter_map(map_result).collect();
        let total = items.len() as u64;
        Ok(SearchPage {
            items,
            total: Some(total),
            next_offset: None,
        })
    }
}

// ── Wire format ─────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireRequest<'a> {
    query: &'a str,
    num_results: u64,
    #[serde(rename = "type")]
    kind: &'static str,
    contents: WireContents,
    #[serde(skip_serializing_if = "Option::is_none")]
    category: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    include_domains: Option<Vec<String>>,
    use_autoprompt: bool,
}

#[derive(Serialize)]
struct WireContents {
    text: WireTextOptions,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireTextOptions {
    max_characters: u32,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    results: Vec<WireResult>,
}

#[derive(Debug, Deserialize)]
struct WireResult {
    id: Option<String>,
    title: Option<String>,
    url: Option<String>,
    text: Option<String>,
    image: Option<String>,
    price: Option<String>,
}

// ── Request shaping ─────────────────────────────────────────────────

/// Turns the strategy hint into request shape: which domains to pin and
/// whether to bias Exa toward company/storefront pages.
fn request_plan(filters: &SearchFilters) -> (Option<Vec<String>>, Option<&'static str>) {
    let requested: Vec<String> = filters
        .include_domains
        .clone()
        .unwrap_or_default()
        .into_iter()
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .collect();

    match filters.search_strategy {
        Some(SearchStrategy::Broad) => {
            let domains = (!requested.is_empty()).then_some(requested);
            (domains, None)
        }
        Some(SearchStrategy::Specialized) => {
            let domains = (!requested.is_empty()).then_some(requested);
            (domains, Some("company"))
        }
        Some(SearchStrategy::Marketplace) | None => {
            let domains = if requested.is_empty() {
                MARKETPLACE_DOMAINS.iter().map(|d| d.to_string()).collect()
            } else {
                requested
            };
            (Some(domains), Some("company"))
        }
    }
}

// ── Result mapping ──────────────────────────────────────────────────

fn map_result(result: WireResult) -> Option<NewItem> {
    let url = result.url?;
    let title = result.title?;
    let external_id = result.id.unwrap_or_else(|| url.clone());

    let affiliate_url = affiliate_url_for(&url);
    let price_cents = result
        .price
        .as_deref()
        .and_then(parse_price_cents)
        .or_else(|| result.text.as_deref().and_then(price_from_text));

    Some(NewItem {
        source: SOURCE.to_string(),
        external_id,
        title,
        price_cents,
        currency: "USD".to_string(),
        url: Some(url),
        affiliate_url,
        image_url: result.image,
        seller: None,
        shipping_cents: None,
        location: None,
        condition: None,
    })
}

/// Rewrites known marketplace links into their tagged affiliate form.
/// Anything unrecognized stays untagged.
fn affiliate_url_for(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_lowercase();

    if host.ends_with("amazon.com") {
        let asin = AMAZON_ASIN_RE.captures(url)?.get(1)?.as_str().to_string();
        return Some(format!("https://www.amazon.com/dp/{asin}?tag=sendcat-20"));
    }
    if host.ends_with("ebay.com") {
        let item = EBAY_ITEM_RE.captures(url)?.get(1)?.as_str().to_string();
        return Some(format!(
            "https://rover.ebay.com/rover/1/711-53200-1/2?mpre=https%3A%2F%2Fwww.ebay.com%2Fitm%2F{item}&toolid=10001&campid=533802690&customid=sendcat"
        ));
    }
    None
}

fn parse_price_cents(raw: &str) -> Option<i64> {
    let cleaned = raw.trim().trim_start_matches('$').trim();
    match cleaned.parse::<f64>() {
        Ok(value) => Some((value * 100.0).round() as i64),
        Err(_) => price_from_text(raw),
    }
}

/// Pulls the first dollar amount out of page text. Best effort; web pages
/// rarely mark prices up consistently.
fn price_from_text(text: &str) -> Option<i64> {
    let caps = PRICE_RE.captures(text)?;
    caps.get(1)?
        .as_str()
        .parse::<f64>()
        .ok()
        .map(|value| (value * 100.0).round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amazon_links_get_an_affiliate_tag() {
        let url = "https://www.amazon.com/Some-Product-Name/B08N5WRWNW";
        assert_eq!(
            affiliate_url_for(url).as_deref(),
            Some("https://www.amazon.com/dp/B08N5WRWNW?tag=sendcat-20")
        );
    }

    #[test]
    fn ebay_links_get_rewritten_through_rover() {
        let url = "https://www.ebay.com/itm/123456789012";
        let affiliate = affiliate_url_for(url).unwrap();
        assert!(affiliate.starts_with("https://rover.ebay.com/rover/"));
        assert!(affiliate.contains("123456789012"));
    }

    #[test]
    fn unknown_hosts_stay_untagged() {
        assert_eq!(affiliate_url_for("https://www.nvidia.com/en-us/geforce/"), None);
        assert_eq!(affiliate_url_for("not a url"), None);
    }

    #[test]
    fn price_parses_from_string_or_text() {
        assert_eq!(parse_price_cents("$49.99"), Some(4999));
        assert_eq!(parse_price_cents(" 120 "), Some(12000));
        assert_eq!(parse_price_cents("from $ 19.95 with coupon"), Some(1995));
        assert_eq!(parse_price_cents("call for pricing"), None);
        assert_eq!(price_from_text("In stock now for $349.00, ships free"), Some(34900));
        assert_eq!(price_from_text("no dollars here"), None);
    }

    #[test]
    fn results_without_url_or_title_are_dropped() {
        let mapped = map_result(WireResult {
            id: Some("doc-1".into()),
            title: None,
            url: Some("https://example.com".into()),
            text: None,
            image: None,
            price: None,
        });
        assert!(mapped.is_none());
    }

    #[test]
    fn result_falls_back_to_url_as_external_id() {
        let item = map_result(WireResult {
            id: None,
            title: Some("RTX 4070 Founders Edition".into()),
            url: Some("https://www.nvidia.com/en-us/geforce/graphics-cards/40-series/".into()),
            text: Some("Starting at $599.00".into()),
            image: None,
            price: None,
        })
        .unwrap();
        assert_eq!(item.external_id, item.url.clone().unwrap());
        assert_eq!(item.price_cents, Some(59900));
        assert_eq!(item.source, "exa");
    }

    #[test]
    fn marketplace_strategy_pins_the_default_domains() {
        let (domains, category) = request_plan(&SearchFilters::default());
        assert_eq!(
            domains.unwrap(),
            vec!["amazon.com/dp".to_string(), "ebay.com/itm".to_string()]
        );
        assert_eq!(category, Some("company"));
    }

    #[test]
    fn broad_strategy_lifts_domain_restrictions() {
        let filters = SearchFilters {
            search_strategy: Some(SearchStrategy::Broad),
            ..Default::default()
        };
        let (domains, category) = request_plan(&filters);
        assert_eq!(domains, None);
        assert_eq!(category, None);
    }

    #[test]
    fn explicit_domains_override_the_preset() {
        let filters = SearchFilters {
            include_domains: Some(vec![" nvidia.com ".into(), String::new()]),
            ..Default::default()
        };
        let (domains, _) = request_plan(&filters);
        assert_eq!(domains.unwrap(), vec!["nvidia.com".to_string()]);
    }

    #[test]
    fn request_serializes_exa_shape() {
        let request = WireRequest {
            query: "gpu",
            num_results: 10,
            kind: "auto",
            contents: WireContents {
                text: WireTextOptions {
                    max_characters: 3000,
                },
            },
            category: Some("company"),
            include_domains: Some(vec!["nvidia.com".into()]),
            use_autoprompt: true,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["numResults"], 10);
        assert_eq!(value["type"], "auto");
        assert_eq!(value["contents"]["text"]["maxCharacters"], 3000);
        assert_eq!(value["includeDomains"][0], "nvidia.com");
        assert_eq!(value["useAutoprompt"], true);
    }
}
