use crate::meli::client::{MarketplaceApi, MeliError, SellerItemsFilter};
use serde::{Deserialize, Serialize};
use serde_with::{DefaultOnNull, serde_as};
use tracing::{debug, warn};

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
pub struct SellerSearchResponse {
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    pub results: Vec<String>,
}

impl SellerSearchResponse {
    pub fn ids(self) -> Vec<String> {
        self.results
    }
}

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
pub struct SiteSearchResponse {
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    pub results: Vec<SiteSearchHit>,
    #[serde(default)]
    pub paging: Option<Paging>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteSearchHit {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Paging {
    #[serde(default)]
    pub total: u64,
}

impl SiteSearchResponse {
    pub fn ids(self) -> Vec<String> {
        self.results.into_iter().map(|hit| hit.id).collect()
    }
}

/// Lookup strategies, in the order they are attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    SellerSku,
    SiteSearch,
    SellerQuery,
}

impl SearchStrategy {
    pub const ORDER: [SearchStrategy; 3] = [
        SearchStrategy::SellerSku,
        SearchStrategy::SiteSearch,
        SearchStrategy::SellerQuery,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SearchStrategy::SellerSku => "seller_sku",
            SearchStrategy::SiteSearch => "site_search",
            SearchStrategy::SellerQuery => "seller_query",
        }
    }

    async fn run(
        &self,
        api: &dyn MarketplaceApi,
        identifier: &str,
        account_id: &str,
        token: &str,
    ) -> Result<Vec<String>, MeliError> {
        match self {
            SearchStrategy::SellerSku => {
                api.search_seller_items(account_id, SellerItemsFilter::Sku(identifier), token)
                    .await
            }
            SearchStrategy::SiteSearch => api.search_site(account_id, identifier, token).await,
            SearchStrategy::SellerQuery => {
                api.search_seller_items(account_id, SellerItemsFilter::Query(identifier), token)
                    .await
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "via", rename_all = "snake_case")]
pub enum Resolution {
    /// Identifier already had the canonical shape; no lookup was made.
    Canonical { listing_id: String },
    Search {
        listing_id: String,
        strategy: SearchStrategy,
    },
}

impl Resolution {
    pub fn listing_id(&self) -> &str {
        match self {
            Resolution::Canonical { listing_id } | Resolution::Search { listing_id, .. } => {
                listing_id
            }
        }
    }
}

/// `<site prefix><digits>`, case-insensitive. Returns the upper-cased id.
pub fn canonical_listing_id(identifier: &str, site_id: &str) -> Option<String> {
    let trimmed = identifier.trim();
    let prefix_len = site_id.len();
    if prefix_len == 0 || trimmed.len() <= prefix_len || !trimmed.is_char_boundary(prefix_len) {
        return None;
    }
    let (prefix, digits) = trimmed.split_at(prefix_len);
    if prefix.eq_ignore_ascii_case(site_id) && digits.bytes().all(|b| b.is_ascii_digit()) {
        Some(trimmed.to_ascii_uppercase())
    } else {
        None
    }
}

/// Maps a seller-typed identifier to a listing id. `None` means every
/// strategy came back empty or failed.
pub async fn resolve_listing(
    api: &dyn MarketplaceApi,
    identifier: &str,
    site_id: &str,
    account_id: &str,
    token: &str,
) -> Option<Resolution> {
    if let Some(listing_id) = canonical_listing_id(identifier, site_id) {
        debug!(target = "repricer.meli", %listing_id, "identifier_is_canonical");
        return Some(Resolution::Canonical { listing_id });
    }

    let identifier = identifier.trim();
    for strategy in SearchStrategy::ORDER {
        match strategy.run(api, identifier, account_id, token).await {
            Ok(ids) => {
                if let Some(first) = ids.into_iter().find(|id| !id.trim().is_empty()) {
                    debug!(
                        target = "repricer.meli",
                        strategy = strategy.name(),
                        listing_id = %first,
                        "identifier_resolved"
                    );
                    return Some(Resolution::Search {
                        listing_id: first.trim().to_uppercase(),
                        strategy,
                    });
                }
            }
            Err(err) => {
                warn!(
                    target = "repricer.meli",
                    strategy = strategy.name(),
                    identifier,
                    error = %err,
                    "search_strategy_failed"
                );
            }
        }
    }
    None
}
