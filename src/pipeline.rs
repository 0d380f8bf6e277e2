use crate::meli::auth::{AuthError, TokenProvider};
use crate::meli::client::{MarketplaceApi, MeliClient, MeliError};
use crate::meli::config::MarketplaceConfig;
use crate::meli::fees::{FeeQuote, resolve_fee};
use crate::meli::listing::{Listing, fetch_listing};
use crate::meli::prices::{self, FailureClass, PriceWrite, UpdateFailure, UpdateOutcome};
use crate::meli::search::{Resolution, canonical_listing_id, resolve_listing};
use crate::meli::shipping::{ShippingQuote, ShippingSource, resolve_shipping};
use crate::models::{
    HistoryRecord, ItemQuery, ListingSummary, PriceRequest, StageReport, UpdatePriceRequest,
};
use crate::pricing::engine::wholesale_price;
use crate::pricing::money::{self, to_money};
use crate::pricing::{
    PriceSuggestion, PricingError, PricingInputs, PricingRules, suggest_price,
    validate_seller_inputs,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::{Value, json};
use std::{future::Future, sync::Arc, time::Instant};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

/// Resolution-and-pricing core. Cheap to clone; holds no per-request state.
#[derive(Clone)]
pub struct PricingPipeline {
    api: Arc<dyn MarketplaceApi>,
    config: Arc<MarketplaceConfig>,
}

impl PricingPipeline {
    pub fn new(api: Arc<dyn MarketplaceApi>, config: MarketplaceConfig) -> Self {
        Self {
            api,
            config: Arc::new(config),
        }
    }

    /// Pipeline talking to the real marketplace API.
    pub fn from_config(config: MarketplaceConfig) -> Self {
        let api = Arc::new(MeliClient::new(&config));
        Self::new(api, config)
    }

    pub fn config(&self) -> &MarketplaceConfig {
        &self.config
    }

    /// Identifier to priced suggestion, with a per-stage transcript.
    pub async fn suggest(
        &self,
        request: PriceRequest,
        tokens: &dyn TokenProvider,
    ) -> Result<PricingReport, PipelineError> {
        self.within_deadline(self.run_suggest(request, tokens)).await
    }

    /// Identifier to listing summary with a shipping prediction; no pricing.
    pub async fn lookup(
        &self,
        query: ItemQuery,
        tokens: &dyn TokenProvider,
    ) -> Result<ListingSummary, PipelineError> {
        self.within_deadline(self.run_lookup(query, tokens)).await
    }

    /// Pushes a price to an already-known listing.
    pub async fn update_price(
        &self,
        request: UpdatePriceRequest,
        tokens: &dyn TokenProvider,
    ) -> Result<UpdateOutcome, PipelineError> {
        self.within_deadline(self.run_update(request, tokens)).await
    }

    async fn run_suggest(
        &self,
        request: PriceRequest,
        tokens: &dyn TokenProvider,
    ) -> Result<PricingReport, PipelineError> {
        let request_id = Uuid::new_v4();
        let mut stages = Vec::new();
        let identifier = require_identifier(&request.identifier)?;
        if let Some(manual) = request.manual_shipping
            && !(manual.is_finite() && manual >= 0.0)
        {
            return Err(PipelineError::validation(
                "validate_request",
                "manual_shipping must be a non-negative number",
            ));
        }
        validate_seller_inputs(
            request.cost_price,
            request.margin_percent,
            request.tax_percent,
            request.other_costs,
        )
        .map_err(|err| PipelineError::from_pricing("validate_request", err))?;
        let account_id = self.account_for(&request.account_id)?;
        let api = self.api.as_ref();

        let token = self
            .capture_stage("acquire_token", &mut stages, stages::acquire_token(tokens))
            .await?;
        let resolution = self
            .capture_stage(
                "resolve_listing",
                &mut stages,
                stages::resolve(api, identifier, &self.config.site_id, &account_id, &token),
            )
            .await?;
        let listing = self
            .capture_stage(
                "fetch_listing",
                &mut stages,
                stages::fetch(api, resolution.listing_id(), &token),
            )
            .await?;
        let (fee, shipping) = self
            .capture_stage(
                "resolve_costs",
                &mut stages,
                stages::resolve_costs(
                    api,
                    &listing,
                    &account_id,
                    &token,
                    self.config.effective_probe_price(),
                    request.manual_shipping,
                ),
            )
            .await?;
        let suggestion = self
            .capture_stage(
                "suggest_price",
                &mut stages,
                stages::suggest(&request, &fee, &shipping, &self.config.pricing),
            )
            .await?;

        info!(
            target = "repricer.pricing",
            %request_id,
            listing_id = %listing.id,
            scenario = suggestion.scenario.as_str(),
            price = suggestion.price,
            fee_rate = fee.rate,
            shipping = shipping.amount,
            "price_suggested"
        );

        Ok(PricingReport {
            request_id,
            resolution,
            listing: ListingSummary::from_listing(&listing),
            fee,
            shipping,
            suggestion,
            cost_price: request.cost_price,
            margin_percent: request.margin_percent,
            tax_percent: request.tax_percent,
            other_costs: request.other_costs,
            stages,
        })
    }

    async fn run_lookup(
        &self,
        query: ItemQuery,
        tokens: &dyn TokenProvider,
    ) -> Result<ListingSummary, PipelineError> {
        let identifier = require_identifier(&query.identifier)?;
        let account_id = self.account_for(&query.account_id)?;
        let api = self.api.as_ref();

        let token = stages::acquire_token(tokens).await?.value;
        let resolution =
            stages::resolve(api, identifier, &self.config.site_id, &account_id, &token)
                .await?
                .value;
        let listing = stages::fetch(api, resolution.listing_id(), &token)
            .await?
            .value;
        let shipping = resolve_shipping(api, &listing, &account_id, &token).await;
        Ok(ListingSummary::from_listing(&listing).with_shipping(shipping))
    }

    async fn run_update(
        &self,
        request: UpdatePriceRequest,
        tokens: &dyn TokenProvider,
    ) -> Result<UpdateOutcome, PipelineError> {
        let listing_id = canonical_listing_id(&request.listing_id, &self.config.site_id)
            .ok_or_else(|| {
                PipelineError::validation(
                    "validate_request",
                    format!(
                        "`{}` is not a {} listing id",
                        request.listing_id.trim(),
                        self.config.site_id
                    ),
                )
            })?;
        if !(request.new_price.is_finite() && request.new_price > 0.0) {
            return Err(PipelineError::validation(
                "validate_request",
                "new_price must be a positive number",
            ));
        }
        let wholesale = request
            .wholesale_price
            .filter(|value| value.is_finite() && *value >= 0.0)
            .unwrap_or_else(|| {
                wholesale_price(request.new_price, self.config.pricing.wholesale_discount)
            });
        let api = self.api.as_ref();

        let token = stages::acquire_token(tokens).await?.value;
        let listing = stages::fetch(api, &listing_id, &token).await?.value;
        if let Some(warning) = listing.update_warning() {
            warn!(target = "repricer.meli", listing_id = %listing.id, warning, "price_update_warning");
        }
        let currency_id = listing
            .currency_id
            .clone()
            .unwrap_or_else(|| self.config.currency_id.clone());

        prices::update_price(
            api,
            &listing,
            PriceWrite {
                price: request.new_price,
                wholesale_price: wholesale,
                currency_id: &currency_id,
            },
            &token,
        )
        .await
        .map_err(PipelineError::from_update)
    }

    /// Configured store account wins over the caller's.
    fn account_for(&self, caller: &str) -> Result<String, PipelineError> {
        self.config
            .seller_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .or_else(|| Some(caller.trim()).filter(|id| !id.is_empty()))
            .map(str::to_string)
            .ok_or_else(|| PipelineError::unauthorized("validate_request", "account_id is required"))
    }

    async fn within_deadline<T, Fut>(&self, fut: Fut) -> Result<T, PipelineError>
    where
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        let deadline = self.config.http.request_deadline();
        timeout(deadline, fut).await.unwrap_or_else(|_| {
            Err(PipelineError::upstream(
                "deadline",
                format!("request exceeded {}s", deadline.as_secs()),
            ))
        })
    }

    async fn capture_stage<T, Fut>(
        &self,
        name: &'static str,
        stages: &mut Vec<StageReport>,
        fut: Fut,
    ) -> Result<T, PipelineError>
    where
        Fut: Future<Output = Result<StageOutcome<T>, PipelineError>>,
    {
        let started = Instant::now();
        let outcome = fut.await?;
        let elapsed_ms = started.elapsed().as_millis();
        crate::metrics::stage_elapsed(name, elapsed_ms);
        stages.push(StageReport::new(name, elapsed_ms, outcome.output));
        Ok(outcome.value)
    }
}

fn require_identifier(raw: &str) -> Result<&str, PipelineError> {
    let identifier = raw.trim();
    if identifier.is_empty() {
        return Err(PipelineError::validation(
            "validate_request",
            "identifier is required",
        ));
    }
    Ok(identifier)
}

#[derive(Debug, Clone, Serialize)]
pub struct PricingReport {
    pub request_id: Uuid,
    pub resolution: Resolution,
    pub listing: ListingSummary,
    pub fee: FeeQuote,
    pub shipping: ShippingQuote,
    pub suggestion: PriceSuggestion,
    #[serde(serialize_with = "money::serialize")]
    pub cost_price: f64,
    pub margin_percent: f64,
    pub tax_percent: f64,
    #[serde(serialize_with = "money::serialize")]
    pub other_costs: f64,
    pub stages: Vec<StageReport>,
}

impl PricingReport {
    pub fn history_record(&self) -> HistoryRecord {
        let breakdown = &self.suggestion.breakdown;
        let shipping_type = match self.shipping.source {
            ShippingSource::NotFreeShipping => "buyer_paid",
            ShippingSource::Manual => "manual",
            _ => "free_shipping",
        };
        HistoryRecord {
            listing_id: self.listing.id.clone(),
            current_price: to_money(self.listing.price),
            listing_type: self.listing.listing_type_id.clone(),
            shipping_type: shipping_type.to_string(),
            cost_price: to_money(self.cost_price),
            margin_percent: self.margin_percent,
            commission: to_money(breakdown.commission + breakdown.fixed_fee),
            shipping: to_money(breakdown.shipping),
            profit: to_money(breakdown.profit),
            recommended_price: to_money(self.suggestion.price),
            tax: to_money(breakdown.tax),
            other_costs: to_money(breakdown.other_costs),
            wholesale_price: to_money(self.suggestion.wholesale_price),
            scenario: self.suggestion.scenario.as_str(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct PipelineError {
    stage: &'static str,
    message: String,
    kind: PipelineErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineErrorKind {
    NotFound,
    Unauthorized,
    Validation,
    Upstream,
    PolicyBlocked,
    BadRequest,
}

impl PipelineError {
    fn new(stage: &'static str, kind: PipelineErrorKind, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind,
        }
    }

    pub fn validation(stage: &'static str, message: impl Into<String>) -> Self {
        Self::new(stage, PipelineErrorKind::Validation, message)
    }

    pub fn unauthorized(stage: &'static str, message: impl Into<String>) -> Self {
        Self::new(stage, PipelineErrorKind::Unauthorized, message)
    }

    pub fn not_found(stage: &'static str, message: impl Into<String>) -> Self {
        Self::new(stage, PipelineErrorKind::NotFound, message)
    }

    pub fn upstream(stage: &'static str, message: impl Into<String>) -> Self {
        Self::new(stage, PipelineErrorKind::Upstream, message)
    }

    fn from_auth(stage: &'static str, err: AuthError) -> Self {
        match err {
            AuthError::MissingCredentials | AuthError::Rejected(_) => {
                Self::unauthorized(stage, err.to_string())
            }
            AuthError::Request(_) => Self::upstream(stage, err.to_string()),
        }
    }

    fn from_meli(stage: &'static str, err: MeliError) -> Self {
        match err.status() {
            Some(401) => Self::unauthorized(stage, err.to_string()),
            Some(404) => Self::not_found(stage, err.to_string()),
            _ => Self::upstream(stage, err.to_string()),
        }
    }

    fn from_pricing(stage: &'static str, err: PricingError) -> Self {
        Self::validation(stage, err.to_string())
    }

    fn from_update(failure: UpdateFailure) -> Self {
        let kind = match failure.class {
            FailureClass::BadRequest => PipelineErrorKind::BadRequest,
            FailureClass::PolicyBlocked => PipelineErrorKind::PolicyBlocked,
            FailureClass::Unauthorized => PipelineErrorKind::Unauthorized,
            FailureClass::NotFound => PipelineErrorKind::NotFound,
            FailureClass::Upstream => PipelineErrorKind::Upstream,
        };
        Self::new("update_price", kind, failure.reason)
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> PipelineErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}

#[derive(Debug)]
pub struct StageOutcome<T> {
    pub value: T,
    pub output: Value,
}

impl<T> StageOutcome<T> {
    fn new(value: T, output: Value) -> Self {
        Self { value, output }
    }
}

pub mod stages {
    use super::*;

    fn preview_token(token: &str) -> String {
        let visible: String = token.chars().take(8).collect();
        format!("{visible}…")
    }

    pub(super) async fn acquire_token(
        tokens: &dyn TokenProvider,
    ) -> Result<StageOutcome<String>, PipelineError> {
        let token = tokens
            .access_token()
            .await
            .map_err(|err| PipelineError::from_auth("acquire_token", err))?;
        let output = json!({ "token_preview": preview_token(&token) });
        Ok(StageOutcome::new(token, output))
    }

    pub(super) async fn resolve(
        api: &dyn MarketplaceApi,
        identifier: &str,
        site_id: &str,
        account_id: &str,
        token: &str,
    ) -> Result<StageOutcome<Resolution>, PipelineError> {
        let resolution = resolve_listing(api, identifier, site_id, account_id, token)
            .await
            .ok_or_else(|| {
                PipelineError::not_found(
                    "resolve_listing",
                    format!("no listing matches `{identifier}` for account {account_id}"),
                )
            })?;
        let output = json!({ "identifier": identifier, "resolution": resolution });
        Ok(StageOutcome::new(resolution, output))
    }

    pub(super) async fn fetch(
        api: &dyn MarketplaceApi,
        listing_id: &str,
        token: &str,
    ) -> Result<StageOutcome<Listing>, PipelineError> {
        let listing = fetch_listing(api, listing_id, token)
            .await
            .map_err(|err| PipelineError::from_meli("fetch_listing", err))?;
        let output = json!({
            "listing_id": listing.id,
            "tier": listing.tier.listing_type_id(),
            "category_id": listing.category_id,
            "free_shipping": listing.shipping.free_shipping,
            "variations": listing.variations.len(),
            "status": listing.status,
            "block_reason": listing.block_reason(),
        });
        Ok(StageOutcome::new(listing, output))
    }

    /// Fee and shipping are independent; both run concurrently and neither
    /// can fail the request.
    pub(super) async fn resolve_costs(
        api: &dyn MarketplaceApi,
        listing: &Listing,
        account_id: &str,
        token: &str,
        probe_price: f64,
        manual_shipping: Option<f64>,
    ) -> Result<StageOutcome<(FeeQuote, ShippingQuote)>, PipelineError> {
        let shipping = async {
            match manual_shipping {
                Some(amount) => ShippingQuote::manual(amount),
                None => resolve_shipping(api, listing, account_id, token).await,
            }
        };
        let (fee, shipping) = tokio::join!(
            resolve_fee(
                api,
                &listing.tier,
                &listing.category_id,
                probe_price,
                Some(token)
            ),
            shipping
        );
        let output = json!({
            "fee": fee,
            "shipping": shipping,
            "needs_manual_shipping": shipping.needs_manual_override(),
        });
        Ok(StageOutcome::new((fee, shipping), output))
    }

    pub(super) async fn suggest(
        request: &PriceRequest,
        fee: &FeeQuote,
        shipping: &ShippingQuote,
        rules: &PricingRules,
    ) -> Result<StageOutcome<PriceSuggestion>, PipelineError> {
        let inputs = PricingInputs {
            cost_price: request.cost_price,
            margin_percent: request.margin_percent,
            tax_percent: request.tax_percent,
            other_costs: request.other_costs,
            shipping: shipping.amount,
            fee_rate: fee.rate,
        };
        let suggestion = suggest_price(&inputs, rules)
            .map_err(|err| PipelineError::from_pricing("suggest_price", err))?;
        let output = json!({
            "scenario": suggestion.scenario,
            "price": to_money(suggestion.price),
            "unrounded_price": to_money(suggestion.unrounded_price),
            "threshold": rules.free_shipping_threshold,
        });
        Ok(StageOutcome::new(suggestion, output))
    }
}
