use crate::meli::client::{MarketplaceApi, MeliError};
use serde::{Deserialize, Serialize};
use serde_with::{DefaultOnNull, DisplayFromStr, PickFirst, serde_as};
use std::{collections::BTreeSet, fmt};

// ---- wire shapes: GET /items/{id}?include_attributes=all ----

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
pub struct ItemDetail {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub base_price: Option<f64>,
    #[serde(default)]
    pub currency_id: Option<String>,
    #[serde(default)]
    pub listing_type_id: Option<String>,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    pub sub_status: Vec<String>,
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub catalog_listing: Option<bool>,
    #[serde(default)]
    pub permalink: Option<String>,
    #[serde(default)]
    pub shipping: Option<ItemShipping>,
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    pub variations: Vec<ItemVariation>,
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    pub pictures: Vec<ItemPicture>,
}

#[serde_as]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemShipping {
    #[serde(default)]
    pub free_shipping: Option<bool>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub logistic_type: Option<String>,
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    pub free_methods: Vec<FreeMethod>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FreeMethod {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub rule: Option<FreeShippingRuleWire>,
}

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
pub struct FreeShippingRuleWire {
    #[serde(default)]
    pub free_mode: Option<String>,
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub value: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ItemVariation {
    pub id: VariationId,
    #[serde(default)]
    pub price: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ItemPicture {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub secure_url: Option<String>,
}

/// Variation ids are numeric upstream but echoed back verbatim on writes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum VariationId {
    Numeric(u64),
    Text(String),
}

impl fmt::Display for VariationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariationId::Numeric(id) => write!(f, "{id}"),
            VariationId::Text(id) => f.write_str(id),
        }
    }
}

// ---- normalised listing ----

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingTier {
    Classic,
    Premium,
    Other(String),
}

impl ListingTier {
    pub fn from_raw(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "gold_special" | "classic" => Self::Classic,
            "gold_pro" | "premium" => Self::Premium,
            other => Self::Other(other.to_string()),
        }
    }

    /// Identifier the fee schedule expects as `listing_type_id`.
    pub fn listing_type_id(&self) -> &str {
        match self {
            Self::Classic => "gold_special",
            Self::Premium => "gold_pro",
            Self::Other(raw) => raw,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ShippingDescriptor {
    pub free_shipping: bool,
    pub mode: Option<String>,
    pub logistic_type: Option<String>,
    /// Raw rule values in listing order; the resolver picks the first positive one.
    pub free_rules: Vec<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Variation {
    pub id: VariationId,
    pub price: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Listing {
    pub id: String,
    pub title: String,
    pub price: f64,
    pub currency_id: Option<String>,
    pub tier: ListingTier,
    pub category_id: String,
    pub shipping: ShippingDescriptor,
    pub status: String,
    pub sub_status: BTreeSet<String>,
    pub tags: BTreeSet<String>,
    pub catalog_managed: bool,
    pub variations: Vec<Variation>,
    pub thumbnail: Option<String>,
    pub permalink: Option<String>,
}

/// Why the marketplace is likely to refuse a price change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    PromotionLock,
    CatalogManaged,
    Suspended,
    AwaitingPatch,
}

impl BlockReason {
    pub fn message(&self) -> &'static str {
        match self {
            BlockReason::PromotionLock => {
                "listing is locked by an active promotion or campaign"
            }
            BlockReason::CatalogManaged => "listing is a catalog listing managed by the marketplace",
            BlockReason::Suspended => "listing is suspended or banned",
            BlockReason::AwaitingPatch => "listing is waiting for a correction (waiting_for_patch)",
        }
    }
}

pub const GENERIC_POLICY_MESSAGE: &str =
    "the marketplace pricing policy rejected the change for this listing";

impl Listing {
    pub fn from_detail(detail: ItemDetail) -> Result<Self, MeliError> {
        let id = detail.id.trim().to_uppercase();
        if id.is_empty() {
            return Err(MeliError::Decode("item detail without id".into()));
        }
        let shipping = detail.shipping.unwrap_or_default();
        let free_rules = shipping
            .free_methods
            .iter()
            .filter_map(|method| method.rule.as_ref().and_then(|rule| rule.value))
            .collect();
        let thumbnail = detail
            .pictures
            .iter()
            .find_map(|pic| pic.secure_url.clone().or_else(|| pic.url.clone()));

        Ok(Self {
            id,
            title: detail.title.unwrap_or_default(),
            price: detail.price.or(detail.base_price).unwrap_or(0.0),
            currency_id: detail.currency_id,
            tier: ListingTier::from_raw(detail.listing_type_id.as_deref().unwrap_or("")),
            category_id: detail.category_id.unwrap_or_default(),
            shipping: ShippingDescriptor {
                free_shipping: shipping.free_shipping.unwrap_or(false),
                mode: shipping.mode,
                logistic_type: shipping.logistic_type,
                free_rules,
            },
            status: detail.status.unwrap_or_else(|| "unknown".into()),
            sub_status: detail.sub_status.into_iter().collect(),
            tags: detail.tags.into_iter().collect(),
            catalog_managed: detail.catalog_listing.unwrap_or(false),
            variations: detail
                .variations
                .into_iter()
                .map(|v| Variation {
                    id: v.id,
                    price: v.price,
                })
                .collect(),
            thumbnail,
            permalink: detail.permalink,
        })
    }

    pub fn has_variations(&self) -> bool {
        !self.variations.is_empty()
    }

    /// Sale price the buyer sees. Variation prices are authoritative when
    /// the listing has variations; the first priced one is reported.
    pub fn current_price(&self) -> f64 {
        self.variations
            .iter()
            .find_map(|variation| variation.price)
            .unwrap_or(self.price)
    }

    /// The most specific restriction wins: a pending patch or a suspension
    /// blocks regardless of catalog or promotion state.
    pub fn block_reason(&self) -> Option<BlockReason> {
        let sub = |s: &str| self.sub_status.contains(s);
        let tag = |t: &str| self.tags.contains(t);
        if sub("waiting_for_patch") {
            Some(BlockReason::AwaitingPatch)
        } else if sub("suspended") || sub("banned") {
            Some(BlockReason::Suspended)
        } else if tag("catalog_listing") || self.catalog_managed {
            Some(BlockReason::CatalogManaged)
        } else if tag("locked_by_promotion") || tag("campaign_related") {
            Some(BlockReason::PromotionLock)
        } else {
            None
        }
    }

    pub fn refusal_message(&self) -> &'static str {
        self.block_reason()
            .map(|reason| reason.message())
            .unwrap_or(GENERIC_POLICY_MESSAGE)
    }

    /// Non-blocking notice shown next to the update action.
    pub fn update_warning(&self) -> Option<&'static str> {
        (self.status == "paused").then_some("listing is paused; the update is accepted but not visible")
    }
}

pub async fn fetch_listing(
    api: &dyn MarketplaceApi,
    listing_id: &str,
    token: &str,
) -> Result<Listing, MeliError> {
    let detail = api.get_item(listing_id, token).await?;
    Listing::from_detail(detail)
}
