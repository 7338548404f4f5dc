//! Typed tool invocations.
//!
//! The model hands back a tool name plus free-form JSON arguments. Both are
//! decoded here, at the adapter boundary, into one strongly-typed variant
//! per tool. Unknown names and malformed arguments come out as tool errors
//! instead of being trusted downstream.

use serde::Deserialize;

use crate::error::ToolError;
use crate::llm::ToolSchema;
use crate::search::{Condition, SearchStrategy, SortOrder};

pub const SEARCH_EBAY: &str = "search_ebay";
pub const SEARCH_EXA: &str = "search_exa";
pub const ESTIMATE_LANDED_COST: &str = "estimate_landed_cost";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchEbayArgs {
    pub query: String,
    #[serde(default)]
    pub min_price: Option<f64>,
    #[serde(default)]
    pub max_price: Option<f64>,
    #[serde(default)]
    pub condition: Option<Condition>,
    #[serde(default)]
    pub sort: Option<SortOrder>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchWebArgs {
    pub query: String,
    #[serde(default)]
    pub include_domains: Option<Vec<String>>,
    #[serde(default)]
    pub search_strategy: Option<SearchStrategy>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostCategory {
    Electronics,
    Clothing,
    Tools,
    AutoParts,
    General,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LandedCostArgs {
    pub product_price_usd: f64,
    pub weight_lbs: f64,
    #[serde(default)]
    pub category: Option<CostCategory>,
}

/// One decoded tool call, tagged by tool name.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolInvocation {
    SearchEbay(SearchEbayArgs),
    SearchWeb(SearchWebArgs),
    EstimateLandedCost(LandedCostArgs),
}

impl ToolInvocation {
    /// Decodes a named tool call. Validation failures carry the tool name so
    /// the model can see which call went wrong.
    pub fn parse(name: &str, arguments: serde_json::Value) -> Result<Self, ToolError> {
        match name {
            SEARCH_EBAY => serde_json::from_value(arguments)
                .map(Self::SearchEbay)
                .map_err(|e| invalid_args(SEARCH_EBAY, &e)),
            SEARCH_EXA => serde_json::from_value(arguments)
                .map(Self::SearchWeb)
                .map_err(|e| invalid_args(SEARCH_EXA, &e)),
            ESTIMATE_LANDED_COST => serde_json::from_value(arguments)
                .map(Self::EstimateLandedCost)
                .map_err(|e| invalid_args(ESTIMATE_LANDED_COST, &e)),
            other => Err(ToolError::NotFound {
                name: other.to_string(),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SearchEbay(_) => SEARCH_EBAY,
            Self::SearchWeb(_) => SEARCH_EXA,
            Self::EstimateLandedCost(_) => ESTIMATE_LANDED_COST,
        }
    }

    /// Short narration shown in the thread while the tool runs.
    pub fn progress_label(&self) -> String {
        match self {
            Self::SearchEbay(args) => format!("Searching eBay for: {}", args.query),
            Self::SearchWeb(args) => format!("Searching the web for: {}", args.query),
            Self::EstimateLandedCost(_) => "Estimating landed cost to Jamaica…".to_string(),
        }
    }

    /// The query driving this call, when it is a search.
    pub fn search_query(&self) -> Option<&str> {
        match self {
            Self::SearchEbay(args) => Some(&args.query),
            Self::SearchWeb(args) => Some(&args.query),
            Self::EstimateLandedCost(_) => None,
        }
    }
}

fn invalid_args(name: &str, e: &serde_json::Error) -> ToolError {
    ToolError::InvalidArguments {
        name: name.to_string(),
        reason: e.to_string(),
    }
}

/// The fixed schema set advertised to the model on every completion call.
pub fn tool_schemas() -> Vec<ToolSchema> {
    vec![
        ToolSchema {
            name: SEARCH_EBAY.to_string(),
            description: "Search for products on eBay using high-quality structured data. \
                          Best for common items, electronics, and clothing where exact \
                          pricing and condition (new/used) are important."
                .to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "The product to search for" },
                    "minPrice": { "type": "number", "description": "Minimum price in USD" },
                    "maxPrice": { "type": "number", "description": "Maximum price in USD" },
                    "condition": {
                        "type": "string",
                        "enum": ["new", "used", "refurbished"],
                        "description": "Filter by item condition"
                    },
                    "sort": {
                        "type": "string",
                        "enum": ["bestMatch", "priceAsc", "priceDesc", "newlyListed"],
                        "description": "Sort order for results"
                    }
                },
                "required": ["query"]
            }),
        },
        ToolSchema {
            name: SEARCH_EXA.to_string(),
            description: "Adaptive web search for products. Best for official brand sites \
                          (Nvidia, Apple), Amazon, Walmart, or niche stores. Can target \
                          specific domains."
                .to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "The product to search for" },
                    "includeDomains": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Specific domains to target (e.g. ['nvidia.com', 'amazon.com'])"
                    },
                    "searchStrategy": {
                        "type": "string",
                        "enum": ["marketplace", "specialized", "broad"],
                        "description": "Level of search depth. 'broad' is best for rare items."
                    }
                },
                "required": ["query"]
            }),
        },
        ToolSchema {
            name: ESTIMATE_LANDED_COST.to_string(),
            description: "Calculate the total cost to get a product to Jamaica, including \
                          shipping, duties (CIF), and GCT."
                .to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "productPriceUsd": { "type": "number", "description": "The price of the item in USD" },
                    "weightLbs": {
                        "type": "number",
                        "description": "Estimated weight in pounds (guess if unknown, e.g. laptop=5lbs, t-shirt=0.5lbs)"
                    },
                    "category": {
                        "type": "string",
                        "enum": ["electronics", "clothing", "tools", "auto_parts", "general"],
                        "description": "Broad category for duty calculation"
                    }
                },
                "required": ["productPriceUsd", "weightLbs"]
            }),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ebay_arguments_parse_with_camel_case_fields() {
        let invocation = ToolInvocation::parse(
            SEARCH_EBAY,
            serde_json::json!({
                "query": "wireless earbuds",
                "maxPrice": 50,
                "condition": "new",
                "sort": "priceAsc",
            }),
        )
        .unwrap();
        let ToolInvocation::SearchEbay(args) = invocation else {
            panic!("wrong variant");
        };
        assert_eq!(args.query, "wireless earbuds");
        assert_eq!(args.max_price, Some(50.0));
        assert_eq!(args.condition, Some(Condition::New));
        assert_eq!(args.sort, Some(SortOrder::PriceAsc));
    }

    #[test]
    fn missing_required_query_is_invalid_arguments() {
        let err =
            ToolInvocation::parse(SEARCH_EBAY, serde_json::json!({ "maxPrice": 50 })).unwrap_err();
        assert!(matches!(
            err,
            ToolError::InvalidArguments { ref name, .. } if name == SEARCH_EBAY
        ));
    }

    #[test]
    fn wrongly_typed_arguments_are_rejected() {
        let err = ToolInvocation::parse(
            ESTIMATE_LANDED_COST,
            serde_json::json!({ "productPriceUsd": "cheap", "weightLbs": 2 }),
        )
        .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }

    #[test]
    fn unknown_tool_names_are_not_found() {
        let err = ToolInvocation::parse("order_pizza", serde_json::json!({})).unwrap_err();
        assert!(matches!(
            err,
            ToolError::NotFound { ref name } if name == "order_pizza"
        ));
    }

    #[test]
    fn landed_cost_category_is_optional() {
        let invocation = ToolInvocation::parse(
            ESTIMATE_LANDED_COST,
            serde_json::json!({ "productPriceUsd": 120.0, "weightLbs": 4.5 }),
        )
        .unwrap();
        let ToolInvocation::EstimateLandedCost(args) = invocation else {
            panic!("wrong variant");
        };
        assert_eq!(args.category, None);

        let invocation = ToolInvocation::parse(
            ESTIMATE_LANDED_COST,
            serde_json::json!({ "productPriceUsd": 80, "weightLbs": 10, "category": "auto_parts" }),
        )
        .unwrap();
        let ToolInvocation::EstimateLandedCost(args) = invocation else {
            panic!("wrong variant");
        };
        assert_eq!(args.category, Some(CostCategory::AutoParts));
    }

    #[test]
    fn progress_labels_name_the_action() {
        let search = ToolInvocation::parse(
            SEARCH_EBAY,
            serde_json::json!({ "query": "gaming laptop" }),
        )
        .unwrap();
        assert_eq!(search.progress_label(), "Searching eBay for: gaming laptop");
        assert_eq!(search.search_query(), Some("gaming laptop"));

        let estimate = ToolInvocation::parse(
            ESTIMATE_LANDED_COST,
            serde_json::json!({ "productPriceUsd": 10, "weightLbs": 1 }),
        )
        .unwrap();
        assert_eq!(estimate.search_query(), None);
    }

    #[test]
    fn schema_set_covers_every_tool() {
        let schemas = tool_schemas();
        let names: Vec<&str> = schemas.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec![SEARCH_EBAY, SEARCH_EXA, ESTIMATE_LANDED_COST]);
        for schema in &schemas {
            assert_eq!(schema.parameters["type"], "object");
            assert!(schema.parameters["required"].is_array());
        }
    }
}
