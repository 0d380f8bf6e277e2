use crate::pricing::money::{self, round_to_99};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum PricingError {
    #[error("invalid {field}: {reason}")]
    InvalidInput {
        field: &'static str,
        reason: &'static str,
    },
    #[error(
        "margin ({margin_percent}%) + fee ({fee_percent:.2}%) + tax ({tax_percent}%) reaches 100%"
    )]
    MarginExceedsCeiling {
        margin_percent: f64,
        fee_percent: f64,
        tax_percent: f64,
    },
}

/// Marketplace constants that change with policy revisions.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(default)]
pub struct PricingRules {
    /// Per-order charge on listings priced below the threshold.
    pub fixed_fee: f64,
    /// At or above this price the seller pays shipping and no fixed fee.
    pub free_shipping_threshold: f64,
    pub wholesale_discount: f64,
}

impl Default for PricingRules {
    fn default() -> Self {
        Self {
            fixed_fee: 6.75,
            free_shipping_threshold: 79.0,
            wholesale_discount: 0.05,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PricingInputs {
    pub cost_price: f64,
    pub margin_percent: f64,
    pub tax_percent: f64,
    pub other_costs: f64,
    /// Seller-borne shipping, already resolved or overridden by the caller.
    pub shipping: f64,
    /// Commission as a fraction of the sale price.
    pub fee_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Scenario {
    #[serde(rename = "high")]
    High,
    #[serde(rename = "low")]
    Low,
    #[serde(rename = "low-forced-high")]
    LowForcedHigh,
}

impl Scenario {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scenario::High => "high",
            Scenario::Low => "low",
            Scenario::LowForcedHigh => "low-forced-high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CostBreakdown {
    #[serde(serialize_with = "money::serialize")]
    pub base_cost: f64,
    #[serde(serialize_with = "money::serialize")]
    pub commission: f64,
    #[serde(serialize_with = "money::serialize")]
    pub fixed_fee: f64,
    #[serde(serialize_with = "money::serialize")]
    pub tax: f64,
    #[serde(serialize_with = "money::serialize")]
    pub other_costs: f64,
    #[serde(serialize_with = "money::serialize")]
    pub shipping: f64,
    #[serde(serialize_with = "money::serialize")]
    pub profit: f64,
}

impl CostBreakdown {
    pub fn total(&self) -> f64 {
        self.base_cost
            + self.commission
            + self.fixed_fee
            + self.tax
            + self.other_costs
            + self.shipping
            + self.profit
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PriceSuggestion {
    #[serde(serialize_with = "money::serialize")]
    pub price: f64,
    #[serde(serialize_with = "money::serialize")]
    pub unrounded_price: f64,
    pub scenario: Scenario,
    pub breakdown: CostBreakdown,
    #[serde(serialize_with = "money::serialize")]
    pub wholesale_price: f64,
    pub fee_rate: f64,
}

struct Rates {
    fee: f64,
    margin: f64,
    tax: f64,
    divisor: f64,
}

/// Break-even price with the `.99` convention.
///
/// The threshold test runs on unrounded prices; rounding happens once, on the
/// selected scenario.
pub fn suggest_price(
    inputs: &PricingInputs,
    rules: &PricingRules,
) -> Result<PriceSuggestion, PricingError> {
    validate(inputs)?;
    let rates = rates(inputs)?;

    let price_high = (inputs.cost_price + inputs.shipping + inputs.other_costs) / rates.divisor;
    let (scenario, unrounded, breakdown) = if price_high >= rules.free_shipping_threshold {
        (Scenario::High, price_high, high_breakdown(inputs, &rates, price_high))
    } else {
        let price_low = (inputs.cost_price + inputs.other_costs + rules.fixed_fee) / rates.divisor;
        if price_low >= rules.free_shipping_threshold {
            (
                Scenario::LowForcedHigh,
                price_high,
                high_breakdown(inputs, &rates, price_high),
            )
        } else {
            (
                Scenario::Low,
                price_low,
                low_breakdown(inputs, &rates, price_low, rules.fixed_fee),
            )
        }
    };

    let price = round_to_99(unrounded);
    Ok(PriceSuggestion {
        price,
        unrounded_price: unrounded,
        scenario,
        breakdown,
        wholesale_price: wholesale_price(price, rules.wholesale_discount),
        fee_rate: rates.fee,
    })
}

pub fn wholesale_price(price: f64, discount: f64) -> f64 {
    let discount = if (0.0..1.0).contains(&discount) {
        discount
    } else {
        PricingRules::default().wholesale_discount
    };
    round_to_99(price * (1.0 - discount))
}

fn high_breakdown(inputs: &PricingInputs, rates: &Rates, price: f64) -> CostBreakdown {
    CostBreakdown {
        base_cost: inputs.cost_price,
        commission: price * rates.fee,
        fixed_fee: 0.0,
        tax: price * rates.tax,
        other_costs: inputs.other_costs,
        shipping: inputs.shipping,
        profit: price * rates.margin,
    }
}

fn low_breakdown(inputs: &PricingInputs, rates: &Rates, price: f64, fixed_fee: f64) -> CostBreakdown {
    CostBreakdown {
        base_cost: inputs.cost_price,
        commission: price * rates.fee,
        fixed_fee,
        tax: price * rates.tax,
        other_costs: inputs.other_costs,
        shipping: 0.0,
        profit: price * rates.margin,
    }
}

fn rates(inputs: &PricingInputs) -> Result<Rates, PricingError> {
    let fee = inputs.fee_rate;
    let margin = inputs.margin_percent / 100.0;
    let tax = inputs.tax_percent / 100.0;
    let divisor = 1.0 - fee - margin - tax;
    if divisor <= 0.0 {
        return Err(PricingError::MarginExceedsCeiling {
            margin_percent: inputs.margin_percent,
            fee_percent: fee * 100.0,
            tax_percent: inputs.tax_percent,
        });
    }
    Ok(Rates {
        fee,
        margin,
        tax,
        divisor,
    })
}

fn validate(inputs: &PricingInputs) -> Result<(), PricingError> {
    validate_seller_inputs(
        inputs.cost_price,
        inputs.margin_percent,
        inputs.tax_percent,
        inputs.other_costs,
    )?;
    non_negative("shipping", inputs.shipping)?;
    if !inputs.fee_rate.is_finite() || !(0.0..1.0).contains(&inputs.fee_rate) {
        return Err(PricingError::InvalidInput {
            field: "fee_rate",
            reason: "must be a fraction between 0 and 1",
        });
    }
    Ok(())
}

/// Checks the figures the seller types in, so bad input fails before any
/// marketplace call is made.
pub fn validate_seller_inputs(
    cost_price: f64,
    margin_percent: f64,
    tax_percent: f64,
    other_costs: f64,
) -> Result<(), PricingError> {
    non_negative("cost_price", cost_price)?;
    non_negative("tax_percent", tax_percent)?;
    non_negative("other_costs", other_costs)?;
    if !margin_percent.is_finite() {
        return Err(PricingError::InvalidInput {
            field: "margin_percent",
            reason: "must be a finite number",
        });
    }
    Ok(())
}

fn non_negative(field: &'static str, value: f64) -> Result<(), PricingError> {
    if !value.is_finite() {
        return Err(PricingError::InvalidInput {
            field,
            reason: "must be a finite number",
        });
    }
    if value < 0.0 {
        return Err(PricingError::InvalidInput {
            field,
            reason: "must not be negative",
        });
    }
    Ok(())
}
