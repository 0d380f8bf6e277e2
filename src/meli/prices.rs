use crate::meli::client::{MarketplaceApi, MeliError};
use crate::meli::listing::{BlockReason, Listing, VariationId};
use crate::metrics;
use crate::pricing::money;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

// ---- write payloads ----

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ItemPriceUpdate {
    Root(RootPrice),
    Variations(VariationPrices),
}

#[derive(Debug, Clone, Serialize)]
pub struct RootPrice {
    #[serde(serialize_with = "money::serialize")]
    pub price: f64,
    pub currency_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct VariationPrices {
    pub variations: Vec<VariationPrice>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VariationPrice {
    pub id: VariationId,
    #[serde(serialize_with = "money::serialize")]
    pub price: f64,
    pub currency_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PricesUpdate {
    pub prices: Vec<StandardPrice>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StandardPrice {
    #[serde(rename = "type")]
    pub price_type: &'static str,
    #[serde(serialize_with = "money::serialize")]
    pub amount: f64,
    pub currency_id: String,
    pub conditions: PriceConditions,
}

#[derive(Debug, Clone, Serialize)]
pub struct PriceConditions {
    pub context_restrictions: Vec<&'static str>,
}

impl PricesUpdate {
    pub fn standard(amount: f64, currency_id: &str) -> Self {
        Self {
            prices: vec![StandardPrice {
                price_type: "standard",
                amount,
                currency_id: currency_id.to_string(),
                conditions: PriceConditions {
                    context_restrictions: vec!["channel_marketplace"],
                },
            }],
        }
    }
}

// ---- failure classification ----

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    BadRequest,
    PolicyBlocked,
    Unauthorized,
    NotFound,
    Upstream,
}

impl FailureClass {
    /// Only these move the updater on to the next write strategy.
    pub fn allows_fallback(&self) -> bool {
        matches!(self, FailureClass::BadRequest | FailureClass::PolicyBlocked)
    }

    fn as_str(&self) -> &'static str {
        match self {
            FailureClass::BadRequest => "bad_request",
            FailureClass::PolicyBlocked => "policy_blocked",
            FailureClass::Unauthorized => "unauthorized",
            FailureClass::NotFound => "not_found",
            FailureClass::Upstream => "upstream",
        }
    }
}

const POLICY_MARKERS: &[&str] = &[
    "locked",
    "promotion",
    "campaign",
    "catalog",
    "not_modifiable",
    "policy",
    "forbidden",
];

pub fn classify_write_failure(err: &MeliError) -> FailureClass {
    match err {
        MeliError::Status { status: 401, .. } => FailureClass::Unauthorized,
        MeliError::Status { status: 403, .. } => FailureClass::PolicyBlocked,
        MeliError::Status { status: 404, .. } => FailureClass::NotFound,
        MeliError::Status {
            status: 400 | 422,
            body,
        } => {
            let body = body.to_lowercase();
            if POLICY_MARKERS.iter().any(|marker| body.contains(marker)) {
                FailureClass::PolicyBlocked
            } else {
                FailureClass::BadRequest
            }
        }
        _ => FailureClass::Upstream,
    }
}

// ---- strategies ----

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WriteStrategy {
    #[serde(rename = "per-variation")]
    PerVariation,
    #[serde(rename = "root-price")]
    RootPrice,
    #[serde(rename = "prices-endpoint")]
    PricesEndpoint,
}

impl WriteStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            WriteStrategy::PerVariation => "per-variation",
            WriteStrategy::RootPrice => "root-price",
            WriteStrategy::PricesEndpoint => "prices-endpoint",
        }
    }

    /// Strategies for `listing`, in the order they are attempted.
    pub fn plan(listing: &Listing) -> Vec<WriteStrategy> {
        let mut plan = Vec::with_capacity(3);
        if listing.has_variations() {
            plan.push(WriteStrategy::PerVariation);
        }
        plan.push(WriteStrategy::RootPrice);
        plan.push(WriteStrategy::PricesEndpoint);
        plan
    }

    async fn apply(
        &self,
        api: &dyn MarketplaceApi,
        listing: &Listing,
        price: f64,
        currency_id: &str,
        token: &str,
    ) -> Result<(), MeliError> {
        match self {
            WriteStrategy::PerVariation => {
                let body = ItemPriceUpdate::Variations(VariationPrices {
                    variations: listing
                        .variations
                        .iter()
                        .map(|variation| VariationPrice {
                            id: variation.id.clone(),
                            price,
                            currency_id: currency_id.to_string(),
                        })
                        .collect(),
                });
                api.put_item(&listing.id, &body, token).await
            }
            WriteStrategy::RootPrice => {
                let body = ItemPriceUpdate::Root(RootPrice {
                    price,
                    currency_id: currency_id.to_string(),
                });
                api.put_item(&listing.id, &body, token).await
            }
            WriteStrategy::PricesEndpoint => {
                let body = PricesUpdate::standard(price, currency_id);
                api.post_item_prices(&listing.id, &body, token).await
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Applied,
    Failed {
        class: FailureClass,
        status: Option<u16>,
        detail: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyAttempt {
    pub strategy: WriteStrategy,
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateOutcome {
    pub listing_id: String,
    pub strategy: WriteStrategy,
    #[serde(serialize_with = "money::serialize")]
    pub price: f64,
    /// Seller-facing figure; never sent to the marketplace.
    #[serde(serialize_with = "money::serialize")]
    pub wholesale_price: f64,
    pub attempts: Vec<StrategyAttempt>,
}

#[derive(Debug, Clone, Error)]
#[error("{reason}")]
pub struct UpdateFailure {
    pub class: FailureClass,
    pub reason: String,
    pub block_reason: Option<BlockReason>,
    pub attempts: Vec<StrategyAttempt>,
    #[source]
    pub upstream: MeliError,
}

#[derive(Debug, Clone, Copy)]
pub struct PriceWrite<'a> {
    pub price: f64,
    pub wholesale_price: f64,
    pub currency_id: &'a str,
}

/// Pushes `write.price` to the marketplace. Each strategy is sent at most
/// once; only `BadRequest`/`PolicyBlocked` answers advance to the next one.
pub async fn update_price(
    api: &dyn MarketplaceApi,
    listing: &Listing,
    write: PriceWrite<'_>,
    token: &str,
) -> Result<UpdateOutcome, UpdateFailure> {
    let plan = WriteStrategy::plan(listing);
    let mut attempts = Vec::with_capacity(plan.len());
    let mut last_error: Option<(FailureClass, MeliError)> = None;

    for (idx, strategy) in plan.iter().enumerate() {
        match strategy
            .apply(api, listing, write.price, write.currency_id, token)
            .await
        {
            Ok(()) => {
                metrics::write_attempt(strategy.name(), "applied");
                attempts.push(StrategyAttempt {
                    strategy: *strategy,
                    outcome: AttemptOutcome::Applied,
                });
                info!(
                    target = "repricer.meli",
                    listing_id = %listing.id,
                    strategy = strategy.name(),
                    price = write.price,
                    wholesale_price = write.wholesale_price,
                    "price_updated"
                );
                return Ok(UpdateOutcome {
                    listing_id: listing.id.clone(),
                    strategy: *strategy,
                    price: write.price,
                    wholesale_price: write.wholesale_price,
                    attempts,
                });
            }
            Err(err) => {
                let class = classify_write_failure(&err);
                metrics::write_attempt(strategy.name(), class.as_str());
                warn!(
                    target = "repricer.meli",
                    listing_id = %listing.id,
                    strategy = strategy.name(),
                    class = class.as_str(),
                    error = %err,
                    "price_write_rejected"
                );
                attempts.push(StrategyAttempt {
                    strategy: *strategy,
                    outcome: AttemptOutcome::Failed {
                        class,
                        status: err.status(),
                        detail: err.to_string(),
                    },
                });
                let has_next = idx + 1 < plan.len();
                last_error = Some((class, err));
                if !(class.allows_fallback() && has_next) {
                    break;
                }
            }
        }
    }

    let (class, upstream) = last_error.unwrap_or_else(|| {
        (
            FailureClass::Upstream,
            MeliError::Transport("no write strategy available".into()),
        )
    });
    Err(UpdateFailure {
        class,
        reason: refusal_reason(class, listing, &upstream),
        block_reason: listing.block_reason(),
        attempts,
        upstream,
    })
}

fn refusal_reason(class: FailureClass, listing: &Listing, upstream: &MeliError) -> String {
    match class {
        FailureClass::PolicyBlocked | FailureClass::BadRequest => {
            format!("price update refused: {}", listing.refusal_message())
        }
        FailureClass::Unauthorized => {
            "marketplace rejected the credential; sign in again".to_string()
        }
        FailureClass::NotFound => format!("listing {} no longer exists", listing.id),
        FailureClass::Upstream => format!("marketplace unavailable: {upstream}"),
    }
}
