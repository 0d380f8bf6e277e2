pub mod engine;
pub mod money;

pub use engine::{
    CostBreakdown, PriceSuggestion, PricingError, PricingInputs, PricingRules, Scenario,
    suggest_price, validate_seller_inputs,
};
