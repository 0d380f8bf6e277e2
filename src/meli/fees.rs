use crate::meli::client::MarketplaceApi;
use crate::meli::listing::ListingTier;
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, PickFirst, serde_as};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
pub struct FeeScheduleQuery<'a> {
    pub price: f64,
    pub listing_type_id: &'a str,
    pub category_id: &'a str,
}

/// `listing_prices` answers with one object for a fully specified query and a
/// list keyed by listing type otherwise.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FeeScheduleResponse {
    Many(Vec<ListingPriceEntry>),
    One(ListingPriceEntry),
}

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
pub struct ListingPriceEntry {
    #[serde(default)]
    pub listing_type_id: Option<String>,
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub sale_fee_amount: Option<f64>,
}

impl FeeScheduleResponse {
    fn fee_amount_for(&self, listing_type_id: &str) -> Option<f64> {
        let matches = |entry: &&ListingPriceEntry| {
            entry
                .listing_type_id
                .as_deref()
                .is_some_and(|id| id.eq_ignore_ascii_case(listing_type_id))
        };
        match self {
            FeeScheduleResponse::Many(entries) => {
                entries.iter().find(matches).and_then(|e| e.sale_fee_amount)
            }
            FeeScheduleResponse::One(entry) => {
                if entry.listing_type_id.is_none() || matches(&entry) {
                    entry.sale_fee_amount
                } else {
                    None
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeSource {
    Schedule,
    StaticTable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeeQuote {
    /// Commission as a fraction of the sale price, `0 < rate < 1`.
    pub rate: f64,
    pub tier: ListingTier,
    pub category_id: String,
    pub source: FeeSource,
}

pub fn static_fee_rate(tier: &ListingTier) -> f64 {
    match tier {
        ListingTier::Premium => 0.19,
        ListingTier::Classic => 0.14,
        ListingTier::Other(_) => 0.15,
    }
}

/// Commission rate for a tier/category, probed at `probe_price`.
///
/// Never fails: an unusable schedule answer degrades to the static table.
pub async fn resolve_fee(
    api: &dyn MarketplaceApi,
    tier: &ListingTier,
    category_id: &str,
    probe_price: f64,
    token: Option<&str>,
) -> FeeQuote {
    let query = FeeScheduleQuery {
        price: probe_price,
        listing_type_id: tier.listing_type_id(),
        category_id,
    };
    let fallback = |reason: &str| {
        warn!(
            target = "repricer.meli",
            listing_type_id = query.listing_type_id,
            category_id,
            reason,
            "fee_schedule_fallback"
        );
        FeeQuote {
            rate: static_fee_rate(tier),
            tier: tier.clone(),
            category_id: category_id.to_string(),
            source: FeeSource::StaticTable,
        }
    };

    let response = match api.get_listing_prices(&query, token).await {
        Ok(response) => response,
        Err(err) => return fallback(&err.to_string()),
    };
    let Some(amount) = response.fee_amount_for(query.listing_type_id) else {
        return fallback("no fee entry for listing type");
    };
    let rate = amount / probe_price;
    if !(rate.is_finite() && rate > 0.0 && rate < 1.0) {
        return fallback(&format!("unusable fee amount {amount}"));
    }
    debug!(
        target = "repricer.meli",
        listing_type_id = query.listing_type_id,
        category_id,
        rate,
        "fee_schedule_resolved"
    );
    FeeQuote {
        rate,
        tier: tier.clone(),
        category_id: category_id.to_string(),
        source: FeeSource::Schedule,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meli::client::MeliError;
    use crate::meli::fake::FakeMarketplace;
    use serde_json::json;

    fn schedule(value: serde_json::Value) -> FeeScheduleResponse {
        serde_json::from_value(value).expect("schedule")
    }

    #[tokio::test]
    async fn single_object_rate_is_amount_over_probe() {
        let mut api = FakeMarketplace::new();
        api.listing_prices = Ok(schedule(json!({
            "listing_type_id": "gold_special",
            "sale_fee_amount": 14.5
        })));
        let quote = resolve_fee(&api, &ListingTier::Classic, "MLB1", 100.0, None).await;
        assert_eq!(quote.source, FeeSource::Schedule);
        assert!((quote.rate - 0.145).abs() < 1e-12);
        assert_eq!(api.calls(), vec!["get_listing_prices"]);
    }

    #[tokio::test]
    async fn list_response_selects_requested_tier() {
        let mut api = FakeMarketplace::new();
        api.listing_prices = Ok(schedule(json!([
            {"listing_type_id": "gold_special", "sale_fee_amount": 13},
            {"listing_type_id": "gold_pro", "sale_fee_amount": "18"},
            {"listing_type_id": "free", "sale_fee_amount": 0}
        ])));
        let quote = resolve_fee(&api, &ListingTier::Premium, "MLB1", 100.0, Some("t")).await;
        assert_eq!(quote.source, FeeSource::Schedule);
        assert!((quote.rate - 0.18).abs() < 1e-12);
    }

    #[tokio::test]
    async fn zero_fee_falls_back_to_static_table() {
        let mut api = FakeMarketplace::new();
        api.listing_prices = Ok(schedule(json!({"sale_fee_amount": 0})));
        let quote = resolve_fee(&api, &ListingTier::Premium, "MLB1", 100.0, None).await;
        assert_eq!(quote.source, FeeSource::StaticTable);
        assert_eq!(quote.rate, 0.19);
    }

    #[tokio::test]
    async fn failures_and_missing_tiers_use_static_table() {
        let mut api = FakeMarketplace::new();
        api.listing_prices = Err(MeliError::Status {
            status: 500,
            body: "boom".into(),
        });
        let quote = resolve_fee(&api, &ListingTier::Classic, "MLB1", 100.0, None).await;
        assert_eq!((quote.rate, quote.source), (0.14, FeeSource::StaticTable));

        api.listing_prices = Ok(schedule(json!([
            {"listing_type_id": "gold_pro", "sale_fee_amount": 18}
        ])));
        let quote = resolve_fee(
            &api,
            &ListingTier::Other("gold_premium".into()),
            "MLB1",
            100.0,
            None,
        )
        .await;
        assert_eq!((quote.rate, quote.source), (0.15, FeeSource::StaticTable));
    }

    #[tokio::test]
    async fn fee_above_probe_is_rejected() {
        let mut api = FakeMarketplace::new();
        api.listing_prices = Ok(schedule(json!({"sale_fee_amount": 120.0})));
        let quote = resolve_fee(&api, &ListingTier::Classic, "MLB1", 100.0, None).await;
        assert_eq!(quote.source, FeeSource::StaticTable);
    }
}
