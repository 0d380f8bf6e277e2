//! In-memory marketplace used by unit tests across the crate.

use crate::meli::client::{MarketplaceApi, MeliError, SellerItemsFilter};
use crate::meli::fees::{FeeScheduleQuery, FeeScheduleResponse};
use crate::meli::listing::ItemDetail;
use crate::meli::prices::{ItemPriceUpdate, PricesUpdate};
use crate::meli::shipping::FreeShippingEstimate;
use async_trait::async_trait;
use std::{sync::Mutex, time::Duration};

pub struct FakeMarketplace {
    pub seller_sku: Result<Vec<String>, MeliError>,
    pub site_search: Result<Vec<String>, MeliError>,
    pub seller_query: Result<Vec<String>, MeliError>,
    pub item: Result<ItemDetail, MeliError>,
    pub listing_prices: Result<FeeScheduleResponse, MeliError>,
    pub free_shipping: Result<FreeShippingEstimate, MeliError>,
    pub put_root: Result<(), MeliError>,
    pub put_variations: Result<(), MeliError>,
    pub post_prices: Result<(), MeliError>,
    /// Simulated latency of `get_item`.
    pub item_delay: Duration,
    calls: Mutex<Vec<String>>,
    requests: Mutex<Vec<String>>,
    writes: Mutex<Vec<serde_json::Value>>,
    tokens: Mutex<Vec<String>>,
}

fn not_found() -> MeliError {
    MeliError::Status {
        status: 404,
        body: r#"{"message":"not_found"}"#.into(),
    }
}

impl FakeMarketplace {
    pub fn new() -> Self {
        Self {
            seller_sku: Ok(Vec::new()),
            site_search: Ok(Vec::new()),
            seller_query: Ok(Vec::new()),
            item: Err(not_found()),
            listing_prices: Err(not_found()),
            free_shipping: Err(not_found()),
            put_root: Ok(()),
            put_variations: Ok(()),
            post_prices: Ok(()),
            item_delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            writes: Mutex::new(Vec::new()),
            tokens: Mutex::new(Vec::new()),
        }
    }

    pub fn with_item(mut self, detail: serde_json::Value) -> Self {
        self.item = Ok(serde_json::from_value(detail).expect("item detail fixture"));
        self
    }

    /// Endpoint names in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    /// Endpoint names with their arguments, colon separated, in call order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().expect("requests lock").clone()
    }

    /// Write bodies as sent, in call order.
    pub fn writes(&self) -> Vec<serde_json::Value> {
        self.writes.lock().expect("writes lock").clone()
    }

    /// Tokens presented to authenticated endpoints.
    pub fn tokens(&self) -> Vec<String> {
        self.tokens.lock().expect("tokens lock").clone()
    }

    fn record(&self, name: &str, args: &[&str], token: Option<&str>) {
        self.calls.lock().expect("calls lock").push(name.to_string());
        let mut request = name.to_string();
        for arg in args {
            request.push(':');
            request.push_str(arg);
        }
        self.requests.lock().expect("requests lock").push(request);
        if let Some(token) = token {
            self.tokens.lock().expect("tokens lock").push(token.to_string());
        }
    }

    fn record_write(&self, body: serde_json::Value) {
        self.writes.lock().expect("writes lock").push(body);
    }
}

#[async_trait]
impl MarketplaceApi for FakeMarketplace {
    async fn search_seller_items(
        &self,
        user_id: &str,
        filter: SellerItemsFilter<'_>,
        token: &str,
    ) -> Result<Vec<String>, MeliError> {
        match filter {
            SellerItemsFilter::Sku(sku) => {
                self.record("search_seller_sku", &[user_id, sku], Some(token));
                self.seller_sku.clone()
            }
            SellerItemsFilter::Query(query) => {
                self.record("search_seller_query", &[user_id, query], Some(token));
                self.seller_query.clone()
            }
        }
    }

    async fn search_site(
        &self,
        seller_id: &str,
        query: &str,
        token: &str,
    ) -> Result<Vec<String>, MeliError> {
        self.record("search_site", &[seller_id, query], Some(token));
        self.site_search.clone()
    }

    async fn get_item(&self, item_id: &str, token: &str) -> Result<ItemDetail, MeliError> {
        self.record("get_item", &[item_id], Some(token));
        if !self.item_delay.is_zero() {
            tokio::time::sleep(self.item_delay).await;
        }
        self.item.clone()
    }

    async fn get_listing_prices(
        &self,
        query: &FeeScheduleQuery<'_>,
        token: Option<&str>,
    ) -> Result<FeeScheduleResponse, MeliError> {
        let price = query.price.to_string();
        self.record(
            "get_listing_prices",
            &[price.as_str(), query.listing_type_id, query.category_id],
            token,
        );
        self.listing_prices.clone()
    }

    async fn get_free_shipping_estimate(
        &self,
        user_id: &str,
        item_id: &str,
        token: &str,
    ) -> Result<FreeShippingEstimate, MeliError> {
        self.record("get_free_shipping_estimate", &[user_id, item_id], Some(token));
        self.free_shipping.clone()
    }

    async fn put_item(
        &self,
        item_id: &str,
        body: &ItemPriceUpdate,
        token: &str,
    ) -> Result<(), MeliError> {
        let (name, result) = match body {
            ItemPriceUpdate::Root(_) => ("put_item_root", &self.put_root),
            ItemPriceUpdate::Variations(_) => ("put_item_variations", &self.put_variations),
        };
        self.record(name, &[item_id], Some(token));
        self.record_write(serde_json::to_value(body).expect("write body"));
        result.clone()
    }

    async fn post_item_prices(
        &self,
        item_id: &str,
        body: &PricesUpdate,
        token: &str,
    ) -> Result<(), MeliError> {
        self.record("post_item_prices", &[item_id], Some(token));
        self.record_write(serde_json::to_value(body).expect("write body"));
        self.post_prices.clone()
    }
}
