use crate::http::{build_client, with_read_retries};
use crate::meli::config::MarketplaceConfig;
use crate::meli::fees::{FeeScheduleQuery, FeeScheduleResponse};
use crate::meli::listing::ItemDetail;
use crate::meli::prices::{ItemPriceUpdate, PricesUpdate};
use crate::meli::search::{SellerSearchResponse, SiteSearchResponse};
use crate::meli::shipping::FreeShippingEstimate;
use crate::metrics;
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::{Serialize, de::DeserializeOwned};
use std::time::Instant;
use thiserror::Error;
use urlencoding::encode;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum MeliError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid response: {0}")]
    Decode(String),
}

impl MeliError {
    pub fn status(&self) -> Option<u16> {
        match self {
            MeliError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Worth another attempt for an idempotent read.
    pub fn is_transient(&self) -> bool {
        match self {
            MeliError::Transport(_) => true,
            MeliError::Status { status, .. } => *status == 429 || *status >= 500,
            MeliError::Decode(_) => false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum SellerItemsFilter<'a> {
    Sku(&'a str),
    Query(&'a str),
}

/// Marketplace endpoints the repricer consumes.
///
/// Reads may be retried by the implementation; writes must be sent exactly
/// once per call.
#[async_trait]
pub trait MarketplaceApi: Send + Sync {
    /// `GET /users/{user}/items/search?sku=` or `?q=`.
    async fn search_seller_items(
        &self,
        user_id: &str,
        filter: SellerItemsFilter<'_>,
        token: &str,
    ) -> Result<Vec<String>, MeliError>;

    /// `GET /sites/{site}/search?seller_id=&q=`.
    async fn search_site(
        &self,
        seller_id: &str,
        query: &str,
        token: &str,
    ) -> Result<Vec<String>, MeliError>;

    async fn get_item(&self, item_id: &str, token: &str) -> Result<ItemDetail, MeliError>;

    async fn get_listing_prices(
        &self,
        query: &FeeScheduleQuery<'_>,
        token: Option<&str>,
    ) -> Result<FeeScheduleResponse, MeliError>;

    async fn get_free_shipping_estimate(
        &self,
        user_id: &str,
        item_id: &str,
        token: &str,
    ) -> Result<FreeShippingEstimate, MeliError>;

    /// `PUT /items/{id}` with either a root price or per-variation prices.
    async fn put_item(
        &self,
        item_id: &str,
        body: &ItemPriceUpdate,
        token: &str,
    ) -> Result<(), MeliError>;

    /// `POST /items/{id}/prices`.
    async fn post_item_prices(
        &self,
        item_id: &str,
        body: &PricesUpdate,
        token: &str,
    ) -> Result<(), MeliError>;
}

#[derive(Clone)]
pub struct MeliClient {
    http: Client,
    root: String,
    site_id: String,
    read_retries: u32,
    retry_base_delay_ms: u64,
}

impl MeliClient {
    pub fn new(config: &MarketplaceConfig) -> Self {
        Self {
            http: build_client(&config.http),
            root: config.api_root.trim_end_matches('/').to_string(),
            site_id: config.site_id.clone(),
            read_retries: config.http.read_retries,
            retry_base_delay_ms: config.http.retry_base_delay_ms,
        }
    }

    async fn get_json<T: DeserializeOwned + Send>(
        &self,
        endpoint: &'static str,
        url: String,
        query: &[(&str, &str)],
        token: Option<&str>,
    ) -> Result<T, MeliError> {
        with_read_retries(
            self.read_retries,
            self.retry_base_delay_ms,
            MeliError::is_transient,
            || {
                let mut request = self.http.get(&url).query(query);
                if let Some(token) = token {
                    request = request.bearer_auth(token);
                }
                async move {
                    let response = send(endpoint, request).await?;
                    response
                        .json::<T>()
                        .await
                        .map_err(|err| MeliError::Decode(err.to_string()))
                }
            },
        )
        .await
    }

    async fn write<B: Serialize + ?Sized>(
        &self,
        endpoint: &'static str,
        method: Method,
        url: String,
        body: &B,
        token: &str,
    ) -> Result<(), MeliError> {
        let request = self
            .http
            .request(method, url)
            .bearer_auth(token)
            .json(body);
        send(endpoint, request).await.map(|_| ())
    }
}

async fn send(endpoint: &'static str, request: RequestBuilder) -> Result<Response, MeliError> {
    let started = Instant::now();
    let response = request.send().await.map_err(|err| {
        metrics::upstream_call(endpoint, None, started.elapsed().as_millis());
        MeliError::Transport(err.to_string())
    })?;
    let status = response.status();
    metrics::upstream_call(endpoint, Some(status.as_u16()), started.elapsed().as_millis());
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(MeliError::Status {
            status: status.as_u16(),
            body: truncate(&body, 512),
        });
    }
    Ok(response)
}

fn truncate(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        value.to_string()
    } else {
        value.chars().take(max_chars).collect()
    }
}

#[async_trait]
impl MarketplaceApi for MeliClient {
    async fn search_seller_items(
        &self,
        user_id: &str,
        filter: SellerItemsFilter<'_>,
        token: &str,
    ) -> Result<Vec<String>, MeliError> {
        let url = format!("{}/users/{}/items/search", self.root, encode(user_id));
        let (key, value) = match filter {
            SellerItemsFilter::Sku(sku) => ("sku", sku),
            SellerItemsFilter::Query(q) => ("q", q),
        };
        let payload: SellerSearchResponse = self
            .get_json("users.items.search", url, &[(key, value)], Some(token))
            .await?;
        Ok(payload.ids())
    }

    async fn search_site(
        &self,
        seller_id: &str,
        query: &str,
        token: &str,
    ) -> Result<Vec<String>, MeliError> {
        let url = format!("{}/sites/{}/search", self.root, encode(&self.site_id));
        let payload: SiteSearchResponse = self
            .get_json(
                "sites.search",
                url,
                &[("seller_id", seller_id), ("q", query)],
                Some(token),
            )
            .await?;
        Ok(payload.ids())
    }

    async fn get_item(&self, item_id: &str, token: &str) -> Result<ItemDetail, MeliError> {
        let url = format!("{}/items/{}", self.root, encode(item_id));
        self.get_json(
            "items.get",
            url,
            &[("include_attributes", "all")],
            Some(token),
        )
        .await
    }

    async fn get_listing_prices(
        &self,
        query: &FeeScheduleQuery<'_>,
        token: Option<&str>,
    ) -> Result<FeeScheduleResponse, MeliError> {
        let url = format!("{}/sites/{}/listing_prices", self.root, encode(&self.site_id));
        let price = query.price.to_string();
        self.get_json(
            "sites.listing_prices",
            url,
            &[
                ("price", price.as_str()),
                ("listing_type_id", query.listing_type_id),
                ("category_id", query.category_id),
            ],
            token,
        )
        .await
    }

    async fn get_free_shipping_estimate(
        &self,
        user_id: &str,
        item_id: &str,
        token: &str,
    ) -> Result<FreeShippingEstimate, MeliError> {
        let url = format!(
            "{}/users/{}/shipping_options/free",
            self.root,
            encode(user_id)
        );
        self.get_json(
            "users.shipping_options.free",
            url,
            &[("item_id", item_id)],
            Some(token),
        )
        .await
    }

    async fn put_item(
        &self,
        item_id: &str,
        body: &ItemPriceUpdate,
        token: &str,
    ) -> Result<(), MeliError> {
        let url = format!("{}/items/{}", self.root, encode(item_id));
        self.write("items.put", Method::PUT, url, body, token).await
    }

    async fn post_item_prices(
        &self,
        item_id: &str,
        body: &PricesUpdate,
        token: &str,
    ) -> Result<(), MeliError> {
        let url = format!("{}/items/{}/prices", self.root, encode(item_id));
        self.write("items.prices.post", Method::POST, url, body, token)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(MeliError::Transport("reset".into()).is_transient());
        assert!(
            MeliError::Status {
                status: 503,
                body: String::new()
            }
            .is_transient()
        );
        assert!(
            MeliError::Status {
                status: 429,
                body: String::new()
            }
            .is_transient()
        );
        assert!(
            !MeliError::Status {
                status: 404,
                body: String::new()
            }
            .is_transient()
        );
        assert!(!MeliError::Decode("bad json".into()).is_transient());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("preço", 4), "preç");
        assert_eq!(truncate("ok", 10), "ok");
    }

    #[test]
    fn client_trims_root() {
        let config = MarketplaceConfig {
            api_root: "http://localhost:1/".into(),
            ..MarketplaceConfig::default()
        };
        let client = MeliClient::new(&config);
        assert_eq!(client.root, "http://localhost:1");
        assert_eq!(client.site_id, "MLB");
    }
}
