use crate::meli::listing::{BlockReason, Listing, ListingTier};
use crate::meli::shipping::ShippingQuote;
use crate::pricing::money;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
pub struct PriceRequest {
    /// SKU, free text or a listing code such as `MLB4323315483`.
    pub identifier: String,
    #[serde(default)]
    pub account_id: String,
    pub cost_price: f64,
    pub margin_percent: f64,
    #[serde(default)]
    pub tax_percent: f64,
    #[serde(default)]
    pub other_costs: f64,
    /// Supersedes the resolved shipping cost when present.
    #[serde(default)]
    pub manual_shipping: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdatePriceRequest {
    pub listing_id: String,
    pub new_price: f64,
    /// Echoed back and logged; derived from the pricing rules when absent.
    #[serde(default)]
    pub wholesale_price: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ItemQuery {
    pub identifier: String,
    #[serde(default)]
    pub account_id: String,
}

/// What the seller sees about a listing before pricing or updating it.
#[derive(Debug, Clone, Serialize)]
pub struct ListingSummary {
    pub id: String,
    pub title: String,
    #[serde(serialize_with = "money::serialize")]
    pub price: f64,
    pub currency_id: Option<String>,
    pub tier: ListingTier,
    pub listing_type_id: String,
    pub category_id: String,
    pub status: String,
    pub sub_status: Vec<String>,
    pub tags: Vec<String>,
    pub catalog_managed: bool,
    pub free_shipping: bool,
    pub logistic_type: Option<String>,
    pub has_variations: bool,
    pub thumbnail: Option<String>,
    pub permalink: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_reason: Option<BlockReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_message: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_warning: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shipping: Option<ShippingQuote>,
}

impl ListingSummary {
    pub fn from_listing(listing: &Listing) -> Self {
        let block_reason = listing.block_reason();
        Self {
            id: listing.id.clone(),
            title: listing.title.clone(),
            price: listing.current_price(),
            currency_id: listing.currency_id.clone(),
            tier: listing.tier.clone(),
            listing_type_id: listing.tier.listing_type_id().to_string(),
            category_id: listing.category_id.clone(),
            status: listing.status.clone(),
            sub_status: listing.sub_status.iter().cloned().collect(),
            tags: listing.tags.iter().cloned().collect(),
            catalog_managed: listing.catalog_managed,
            free_shipping: listing.shipping.free_shipping,
            logistic_type: listing.shipping.logistic_type.clone(),
            has_variations: listing.has_variations(),
            thumbnail: listing.thumbnail.clone(),
            permalink: listing.permalink.clone(),
            block_reason,
            block_message: block_reason.map(|reason| reason.message()),
            update_warning: listing.update_warning(),
            shipping: None,
        }
    }

    pub fn with_shipping(mut self, quote: ShippingQuote) -> Self {
        self.shipping = Some(quote);
        self
    }
}

/// Flat row handed to the calculation-history store.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryRecord {
    pub listing_id: String,
    pub current_price: Decimal,
    pub listing_type: String,
    pub shipping_type: String,
    pub cost_price: Decimal,
    pub margin_percent: f64,
    /// Percentage commission plus the fixed fee, when charged.
    pub commission: Decimal,
    pub shipping: Decimal,
    pub profit: Decimal,
    pub recommended_price: Decimal,
    pub tax: Decimal,
    pub other_costs: Decimal,
    pub wholesale_price: Decimal,
    pub scenario: &'static str,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StageReport {
    pub name: String,
    pub elapsed_ms: u128,
    pub timestamp: DateTime<Utc>,
    pub output: Value,
}

impl StageReport {
    pub fn new(name: &str, elapsed_ms: u128, output: Value) -> Self {
        Self {
            name: name.to_string(),
            elapsed_ms,
            timestamp: Utc::now(),
            output,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketplaceNotification {
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub resource: Option<String>,
    #[serde(default)]
    pub user_id: Option<Value>,
    #[serde(default)]
    pub application_id: Option<Value>,
    #[serde(default)]
    pub attempts: Option<u32>,
}
