//! Landed-cost estimation for Jamaica-bound packages.
//!
//! Pure arithmetic over the supplied price, weight and category. The rates
//! are a deliberately simple freight-forwarding policy, kept in one place so
//! they can be swapped without touching the tool plumbing.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

use crate::error::ToolError;
use crate::tools::invocation::{CostCategory, ESTIMATE_LANDED_COST, LandedCostArgs};

/// Air freight rate per pound, USD.
const RATE_PER_LB: Decimal = dec!(3.50);
/// Floor charge for any package.
const MIN_SHIPPING: Decimal = dec!(5.00);
/// General Consumption Tax, applied on CIF plus duty.
const GCT_RATE: Decimal = dec!(0.15);

impl CostCategory {
    /// Import duty applied on the CIF value.
    fn duty_rate(self) -> Decimal {
        match self {
            // Computers and phones clear duty-free; GCT still applies.
            Self::Electronics => Decimal::ZERO,
            Self::Clothing => dec!(0.20),
            Self::Tools => dec!(0.20),
            Self::AutoParts => dec!(0.30),
            Self::General => dec!(0.20),
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Electronics => "electronics",
            Self::Clothing => "clothing",
            Self::Tools => "tools",
            Self::AutoParts => "auto parts",
            Self::General => "general goods",
        }
    }
}

/// Itemized landed-cost estimate. All figures are USD, rounded to cents.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LandedCostBreakdown {
    pub product_price_usd: Decimal,
    pub shipping_usd: Decimal,
    pub duty_usd: Decimal,
    pub gct_usd: Decimal,
    pub total_usd: Decimal,
    pub rationale: String,
}

/// Estimates the door-to-door cost of getting one item to Jamaica.
///
/// CIF (cost, insurance, freight) is priced as item price plus shipping;
/// duty applies on CIF by category; GCT applies on CIF plus duty.
pub fn estimate(args: &LandedCostArgs) -> Result<LandedCostBreakdown, ToolError> {
    if !args.product_price_usd.is_finite() || args.product_price_usd < 0.0 {
        return Err(invalid("productPriceUsd must be a non-negative number"));
    }
    if !args.weight_lbs.is_finite() || args.weight_lbs <= 0.0 {
        return Err(invalid("weightLbs must be a positive number"));
    }

    let price = Decimal::try_from(args.product_price_usd)
        .map_err(|_| invalid("productPriceUsd is out of range"))?;
    let weight =
        Decimal::try_from(args.weight_lbs).map_err(|_| invalid("weightLbs is out of range"))?;
    let category = args.category.unwrap_or(CostCategory::General);

    let shipping = (weight * RATE_PER_LB).max(MIN_SHIPPING).round_dp(2);
    let cif = price + shipping;
    let duty = (cif * category.duty_rate()).round_dp(2);
    let gct = ((cif + duty) * GCT_RATE).round_dp(2);
    let total = (cif + duty + gct).round_dp(2);

    let rationale = format!(
        "{} lbs air freight at ${RATE_PER_LB}/lb (${MIN_SHIPPING} minimum), {}% duty on CIF as {}, {}% GCT.",
        args.weight_lbs,
        (category.duty_rate() * dec!(100)).normalize(),
        category.label(),
        (GCT_RATE * dec!(100)).normalize(),
    );

    Ok(LandedCostBreakdown {
        product_price_usd: price.round_dp(2),
        shipping_usd: shipping,
        duty_usd: duty,
        gct_usd: gct,
        total_usd: total,
        rationale,
    })
}

fn invalid(reason: &str) -> ToolError {
    ToolError::InvalidArguments {
        name: ESTIMATE_LANDED_COST.to_string(),
        reason: reason.to_string(),
    }
}
