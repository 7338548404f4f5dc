//! Tool execution: the single entry point the orchestrator calls.
//!
//! A failing tool call never aborts the agent turn. Whatever goes wrong is
//! folded into a structured error payload handed back to the model as the
//! tool result, so the conversation can recover on the next turn.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::warn;
use uuid::Uuid;

use crate::error::ToolError;
use crate::search::{SearchFilters, SearchService, ebay, exa};
use crate::store::Item;
use crate::tools::invocation::{SearchEbayArgs, SearchWebArgs, ToolInvocation};
use crate::tools::landed_cost;

/// Most items a single tool result exposes to the model. Full items stay in
/// the store; the model only needs enough to talk about them.
const MODEL_ITEM_LIMIT: usize = 10;

/// What one tool call produced: the payload the model sees, plus the stored
/// item ids the job accumulates as its results.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub payload: Value,
    pub item_ids: Vec<Uuid>,
}

impl ToolOutcome {
    fn payload_only(payload: Value) -> Self {
        Self {
            payload,
            item_ids: Vec::new(),
        }
    }
}

/// The error shape fed back to the model when a tool call cannot complete.
pub fn error_payload(error: &ToolError) -> Value {
    json!({ "error": error.to_string() })
}

pub struct Toolbox {
    search: Arc<SearchService>,
}

impl Toolbox {
    pub fn new(search: Arc<SearchService>) -> Self {
        Self { search }
    }

    /// Runs one decoded invocation. Execution errors become a structured
    /// payload rather than an `Err`; the orchestrator forwards whatever
    /// comes back as the tool result.
    pub async fn execute(&self, invocation: &ToolInvocation) -> ToolOutcome {
        let result = match invocation {
            ToolInvocation::SearchEbay(args) => self.search_ebay(args).await,
            ToolInvocation::SearchWeb(args) => self.search_web(args).await,
            ToolInvocation::EstimateLandedCost(args) => {
                landed_cost::estimate(args).and_then(|breakdown| {
                    serde_json::to_value(&breakdown)
                        .map(ToolOutcome::payload_only)
                        .map_err(|e| ToolError::ExecutionFailed {
                            name: invocation.name().to_string(),
                            reason: e.to_string(),
                        })
                })
            }
        };

        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(tool = invocation.name(), "Tool call failed: {e}");
                ToolOutcome::payload_only(error_payload(&e))
            }
        }
    }

    async fn search_ebay(&self, args: &SearchEbayArgs) -> Result<ToolOutcome, ToolError> {
        let filters = SearchFilters {
            min_price_usd: args.min_price,
            max_price_usd: args.max_price,
            condition: args.condition,
            sort: args.sort,
            ..Default::default()
        };
        self.run_search(ebay::SOURCE, &args.query, &filters).await
    }

    async fn search_web(&self, args: &SearchWebArgs) -> Result<ToolOutcome, ToolError> {
        let filters = SearchFilters {
            include_domains: args.include_domains.clone(),
            search_strategy: args.search_strategy,
            ..Default::default()
        };
        self.run_search(exa::SOURCE, &args.query, &filters).await
    }

    async fn run_search(
        &self,
        source: &str,
        query: &str,
        filters: &SearchFilters,
    ) -> Result<ToolOutcome, ToolError> {
        let results = self
            .search
            .search(source, query, filters, None, None)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                name: format!("search_{source}"),
                reason: e.to_string(),
            })?;

        let item_ids: Vec<Uuid> = results.items.iter().map(|item| item.id).collect();
        let payload = json!({ "items": summarize_items(&results.items) });
        Ok(ToolOutcome { payload, item_ids })
    }
}

/// Per-item summary view fed to the model: title, display price, a single
/// link and a stable id. Mirrors what the UI result card shows.
fn summarize_items(items: &[Item]) -> Vec<Value> {
    items
        .iter()
        .take(MODEL_ITEM_LIMIT)
        .map(|item| {
            json!({
                "title": item.title,
                "price": item.price_cents.map(format_price),
                "url": item.affiliate_url.as_deref().or(item.url.as_deref()),
                "source": item.source,
                "id": item.external_id,
            })
        })
        .collect()
}

/// Integer cents to a "12.34" display string.
fn format_price(cents: i64) -> String {
    format!("{}.{:02}", cents / 100, (cents % 100).abs())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::error::SearchError;
    use crate::search::{SearchPage, SearchProvider};
    use crate::store::{LibSqlBackend, NewItem};

    struct FixedProvider {
        name: &'static str,
        items: Vec<NewItem>,
    }

    #[async_trait]
    impl SearchProvider for FixedProvider {
        fn name(&self) -> &str {
            self.name
        }

        async fn search(
            &self,
            _query: &str,
            _filters: &SearchFilters,
            _offset: u64,
            _limit: u64,
        ) -> Result<SearchPage, SearchError> {
            Ok(SearchPage {
                items: self.items.clone(),
                total: Some(self.items.len() as u64),
                next_offset: None,
            })
        }
    }

    fn make_item(n: usize) -> NewItem {
        NewItem {
            source: "ebay".to_string(),
            external_id: format!("v1|{n}|0"),
            title: format!("Item {n}"),
            price_cents: Some(1999),
            currency: "USD".to_string(),
            url: Some(format!("https://www.ebay.com/itm/{n}")),
            affiliate_url: None,
            image_url: None,
            seller: None,
            shipping_cents: None,
            location: None,
            condition: None,
        }
    }

    async fn toolbox_with(providers: Vec<Arc<dyn SearchProvider>>) -> Toolbox {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let mut service =
            SearchService::new(db, Duration::from_secs(60), Duration::from_secs(5));
        for provider in providers {
            service.register(provider);
        }
        Toolbox::new(Arc::new(service))
    }

    #[tokio::test]
    async fn search_results_are_capped_for_the_model_but_fully_tracked() {
        let items: Vec<NewItem> = (0..12).map(make_item).collect();
        let toolbox = toolbox_with(vec![Arc::new(FixedProvider {
            name: "ebay",
            items,
        })])
        .await;

        let invocation =
            ToolInvocation::parse("search_ebay", json!({ "query": "usb hub" })).unwrap();
        let outcome = toolbox.execute(&invocation).await;

        let model_items = outcome.payload["items"].as_array().unwrap();
        assert_eq!(model_items.len(), MODEL_ITEM_LIMIT);
        assert_eq!(outcome.item_ids.len(), 12);
        assert_eq!(model_items[0]["price"], "19.99");
        assert_eq!(model_items[0]["source"], "ebay");
        assert_eq!(model_items[0]["url"], "https://www.ebay.com/itm/0");
    }

    #[tokio::test]
    async fn failing_searches_fold_into_an_error_payload() {
        // No exa provider registered, so the web search cannot resolve.
        let toolbox = toolbox_with(vec![]).await;

        let invocation =
            ToolInvocation::parse("search_exa", json!({ "query": "rare part" })).unwrap();
        let outcome = toolbox.execute(&invocation).await;

        let message = outcome.payload["error"].as_str().unwrap();
        assert!(message.contains("exa"));
        assert!(outcome.item_ids.is_empty());
    }

    #[tokio::test]
    async fn landed_cost_flows_through_as_structured_payload() {
        let toolbox = toolbox_with(vec![]).await;

        let invocation = ToolInvocation::parse(
            "estimate_landed_cost",
            json!({ "productPriceUsd": 100.0, "weightLbs": 10.0 }),
        )
        .unwrap();
        let outcome = toolbox.execute(&invocation).await;

        assert_eq!(outcome.payload["totalUsd"], "186.30");
        assert!(outcome.item_ids.is_empty());
    }

    #[tokio::test]
    async fn invalid_estimator_input_becomes_an_error_payload() {
        let toolbox = toolbox_with(vec![]).await;

        let invocation = ToolInvocation::parse(
            "estimate_landed_cost",
            json!({ "productPriceUsd": 50.0, "weightLbs": -3.0 }),
        )
        .unwrap();
        let outcome = toolbox.execute(&invocation).await;

        assert!(outcome.payload["error"].as_str().unwrap().contains("weightLbs"));
    }

    #[test]
    fn price_formatting_covers_cents() {
        assert_eq!(format_price(1999), "19.99");
        assert_eq!(format_price(500), "5.00");
        assert_eq!(format_price(7), "0.07");
    }
}
