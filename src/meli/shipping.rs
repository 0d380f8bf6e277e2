use crate::meli::client::MarketplaceApi;
use crate::meli::listing::Listing;
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, PickFirst, serde_as};
use tracing::{debug, warn};

// GET /users/{user}/shipping_options/free?item_id=
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FreeShippingEstimate {
    #[serde(default)]
    pub coverage: Option<Coverage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Coverage {
    #[serde(default)]
    pub all_country: Option<CoverageCost>,
}

#[serde_as]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CoverageCost {
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub list_cost: Option<f64>,
    #[serde(default)]
    pub currency_id: Option<String>,
}

impl FreeShippingEstimate {
    pub fn list_cost(&self) -> Option<f64> {
        self.coverage
            .as_ref()?
            .all_country
            .as_ref()?
            .list_cost
            .filter(|cost| cost.is_finite() && *cost > 0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShippingSource {
    /// Buyer pays; nothing to subsidise.
    NotFreeShipping,
    ListingRule,
    CostEstimate,
    /// Free shipping without a discoverable cost; the caller should ask for
    /// a manual value.
    Unresolved,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ShippingQuote {
    #[serde(serialize_with = "crate::pricing::money::serialize")]
    pub amount: f64,
    pub source: ShippingSource,
}

impl ShippingQuote {
    pub fn manual(amount: f64) -> Self {
        Self {
            amount,
            source: ShippingSource::Manual,
        }
    }

    pub fn needs_manual_override(&self) -> bool {
        self.source == ShippingSource::Unresolved
    }
}

/// Discovery strategies for a free-shipping listing, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShippingStrategy {
    ListingRule,
    CostEstimate,
}

impl ShippingStrategy {
    pub const ORDER: [ShippingStrategy; 2] =
        [ShippingStrategy::ListingRule, ShippingStrategy::CostEstimate];

    fn name(&self) -> &'static str {
        match self {
            ShippingStrategy::ListingRule => "listing_rule",
            ShippingStrategy::CostEstimate => "cost_estimate",
        }
    }

    fn source(&self) -> ShippingSource {
        match self {
            ShippingStrategy::ListingRule => ShippingSource::ListingRule,
            ShippingStrategy::CostEstimate => ShippingSource::CostEstimate,
        }
    }

    async fn run(
        &self,
        api: &dyn MarketplaceApi,
        listing: &Listing,
        account_id: &str,
        token: &str,
    ) -> Option<f64> {
        match self {
            ShippingStrategy::ListingRule => listing
                .shipping
                .free_rules
                .iter()
                .copied()
                .find(|value| value.is_finite() && *value > 0.0),
            ShippingStrategy::CostEstimate => {
                match api
                    .get_free_shipping_estimate(account_id, &listing.id, token)
                    .await
                {
                    Ok(estimate) => estimate.list_cost(),
                    Err(err) => {
                        warn!(
                            target = "repricer.meli",
                            listing_id = %listing.id,
                            error = %err,
                            "free_shipping_estimate_failed"
                        );
                        None
                    }
                }
            }
        }
    }
}

/// Seller-borne shipping subsidy for `listing`.
pub async fn resolve_shipping(
    api: &dyn MarketplaceApi,
    listing: &Listing,
    account_id: &str,
    token: &str,
) -> ShippingQuote {
    if !listing.shipping.free_shipping {
        return ShippingQuote {
            amount: 0.0,
            source: ShippingSource::NotFreeShipping,
        };
    }
    for strategy in ShippingStrategy::ORDER {
        if let Some(amount) = strategy.run(api, listing, account_id, token).await {
            debug!(
                target = "repricer.meli",
                listing_id = %listing.id,
                strategy = strategy.name(),
                amount,
                "shipping_cost_resolved"
            );
            return ShippingQuote {
                amount,
                source: strategy.source(),
            };
        }
    }
    warn!(
        target = "repricer.meli",
        listing_id = %listing.id,
        "shipping_cost_unresolved"
    );
    ShippingQuote {
        amount: 0.0,
        source: ShippingSource::Unresolved,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meli::client::MeliError;
    use crate::meli::fake::FakeMarketplace;
    use crate::meli::listing::ItemDetail;
    use serde_json::json;

    fn listing(shipping: serde_json::Value) -> Listing {
        let detail: ItemDetail = serde_json::from_value(json!({
            "id": "MLB100",
            "shipping": shipping,
        }))
        .expect("detail");
        Listing::from_detail(detail).expect("listing")
    }

    fn estimate(value: serde_json::Value) -> FreeShippingEstimate {
        serde_json::from_value(value).expect("estimate")
    }

    #[tokio::test]
    async fn buyer_paid_shipping_costs_nothing_and_skips_network() {
        let api = FakeMarketplace::new();
        let quote = resolve_shipping(&api, &listing(json!({"free_shipping": false})), "1", "t").await;
        assert_eq!(quote.amount, 0.0);
        assert_eq!(quote.source, ShippingSource::NotFreeShipping);
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn embedded_rule_wins_without_network() {
        let api = FakeMarketplace::new();
        let quote = resolve_shipping(
            &api,
            &listing(json!({
                "free_shipping": true,
                "free_methods": [
                    {"id": 1, "rule": {"value": 0}},
                    {"id": 2, "rule": {"value": 21.9}}
                ]
            })),
            "1",
            "t",
        )
        .await;
        assert_eq!(quote.amount, 21.9);
        assert_eq!(quote.source, ShippingSource::ListingRule);
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn estimate_endpoint_is_second() {
        let mut api = FakeMarketplace::new();
        api.free_shipping = Ok(estimate(json!({
            "coverage": {"all_country": {"list_cost": 18.45, "currency_id": "BRL"}}
        })));
        let quote = resolve_shipping(&api, &listing(json!({"free_shipping": true})), "1", "t").await;
        assert_eq!(quote.amount, 18.45);
        assert_eq!(quote.source, ShippingSource::CostEstimate);
        assert_eq!(api.calls(), vec!["get_free_shipping_estimate"]);
    }

    #[tokio::test]
    async fn estimate_failure_degrades_to_zero() {
        let mut api = FakeMarketplace::new();
        api.free_shipping = Err(MeliError::Transport("timeout".into()));
        let quote = resolve_shipping(&api, &listing(json!({"free_shipping": true})), "1", "t").await;
        assert_eq!(quote.amount, 0.0);
        assert!(quote.needs_manual_override());
    }

    #[test]
    fn estimate_without_coverage_has_no_cost() {
        assert_eq!(estimate(json!({})).list_cost(), None);
        assert_eq!(
            estimate(json!({"coverage": {"all_country": {"list_cost": "12.5"}}})).list_cost(),
            Some(12.5)
        );
    }
}
