//! MercadoLibre surface: typed endpoint shapes, the HTTP client and the
//! resolution strategies built on top of it.

pub mod auth;
pub mod client;
pub mod config;
#[cfg(test)]
pub(crate) mod fake;
pub mod fees;
pub mod listing;
pub mod prices;
pub mod search;
pub mod shipping;

pub use auth::{AuthError, RefreshTokenProvider, StaticToken, TokenProvider};
pub use client::{MarketplaceApi, MeliClient, MeliError};
pub use config::{ConfigError, MarketplaceConfig};
pub use listing::{BlockReason, Listing, ListingTier};
pub use prices::{UpdateOutcome, WriteStrategy};
