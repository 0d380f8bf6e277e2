use crate::meli::auth::{StaticToken, TokenProvider};
use crate::meli::prices::UpdateOutcome;
use crate::models::{
    ApiError, HistoryRecord, ItemQuery, ListingSummary, MarketplaceNotification, PriceRequest,
    UpdatePriceRequest,
};
use crate::pipeline::{PipelineError, PipelineErrorKind, PricingPipeline, PricingReport};
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Query, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: PricingPipeline,
    /// Used when the caller sends no `Authorization` header.
    pub server_tokens: Option<Arc<dyn TokenProvider>>,
}

pub fn router(state: AppState, body_limit: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    Router::new()
        .route("/health", get(health))
        .route("/item", get(lookup_item))
        .route("/price", post(suggest_price))
        .route("/price/update", post(update_price))
        .route("/webhooks/notifications", post(notification))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(body_limit))
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "meli-repricer",
    }))
}

/// Resolve an identifier and describe the listing, including update-block
/// diagnostics and the predicted shipping subsidy.
///
/// - Method: `GET`
/// - Path: `/item?identifier=&account_id=`
async fn lookup_item(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ItemQuery>,
) -> Result<Json<ListingSummary>, AppError> {
    crate::metrics::inc_requests("/item");
    let tokens = credential(&state, &headers)?;
    let summary = state.pipeline.lookup(query, tokens.as_ref()).await?;
    Ok(Json(summary))
}

#[derive(Debug, Serialize)]
struct PriceResponse {
    #[serde(flatten)]
    report: PricingReport,
    history: HistoryRecord,
}

/// Run resolution and pricing.
///
/// - Method: `POST`
/// - Path: `/price`
/// - Body: `PriceRequest`
/// - Response: `PricingReport` plus the flat history record
async fn suggest_price(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<PriceRequest>,
) -> Result<Json<PriceResponse>, AppError> {
    crate::metrics::inc_requests("/price");
    let tokens = credential(&state, &headers)?;
    info!(
        target = "repricer.api",
        identifier = %payload.identifier,
        "pricing requested"
    );
    let report = state.pipeline.suggest(payload, tokens.as_ref()).await?;
    let history = report.history_record();
    Ok(Json(PriceResponse { report, history }))
}

/// Push a price to the marketplace.
///
/// - Method: `POST`
/// - Path: `/price/update`
/// - Body: `UpdatePriceRequest`
/// - Response: `UpdateOutcome`; refusals map to 400/409 with the reason
async fn update_price(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<UpdatePriceRequest>,
) -> Result<Json<UpdateOutcome>, AppError> {
    crate::metrics::inc_requests("/price/update");
    let tokens = credential(&state, &headers)?;
    info!(
        target = "repricer.api",
        listing_id = %payload.listing_id,
        new_price = payload.new_price,
        "price update requested"
    );
    let outcome = state.pipeline.update_price(payload, tokens.as_ref()).await?;
    Ok(Json(outcome))
}

/// Marketplace notification callback. Acknowledged immediately; the
/// marketplace retries anything that is not a 2xx.
async fn notification(Json(payload): Json<MarketplaceNotification>) -> StatusCode {
    crate::metrics::inc_requests("/webhooks/notifications");
    info!(
        target = "repricer.api",
        topic = payload.topic.as_deref().unwrap_or("unknown"),
        resource = payload.resource.as_deref().unwrap_or(""),
        attempts = payload.attempts.unwrap_or(0),
        "notification received"
    );
    debug!(
        target = "repricer.api",
        user_id = ?payload.user_id,
        application_id = ?payload.application_id,
        "notification detail"
    );
    StatusCode::OK
}

fn credential(state: &AppState, headers: &HeaderMap) -> Result<Arc<dyn TokenProvider>, AppError> {
    if let Some(header) = headers.get(AUTHORIZATION) {
        let token = header
            .to_str()
            .ok()
            .and_then(StaticToken::from_authorization)
            .ok_or_else(|| {
                PipelineError::unauthorized("credentials", "malformed Authorization header")
            })?;
        return Ok(Arc::new(token));
    }
    state.server_tokens.clone().ok_or_else(|| {
        PipelineError::unauthorized("credentials", "missing bearer token").into()
    })
}

#[derive(Debug)]
pub enum AppError {
    Pipeline(PipelineError),
}

impl From<PipelineError> for AppError {
    fn from(value: PipelineError) -> Self {
        Self::Pipeline(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Pipeline(err) => {
                let status = match err.kind() {
                    PipelineErrorKind::NotFound => StatusCode::NOT_FOUND,
                    PipelineErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
                    PipelineErrorKind::Validation | PipelineErrorKind::BadRequest => {
                        StatusCode::BAD_REQUEST
                    }
                    PipelineErrorKind::PolicyBlocked => StatusCode::CONFLICT,
                    PipelineErrorKind::Upstream => StatusCode::BAD_GATEWAY,
                };
                let payload = ApiError {
                    error: err.stage().to_string(),
                    detail: Some(err.detail().to_string()),
                };
                (status, Json(payload)).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meli::client::MeliError;
    use crate::meli::config::MarketplaceConfig;
    use crate::meli::fake::FakeMarketplace;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    fn app(api: FakeMarketplace) -> Router {
        let pipeline = PricingPipeline::new(Arc::new(api), MarketplaceConfig::default());
        router(
            AppState {
                pipeline,
                server_tokens: None,
            },
            64 * 1024,
        )
    }

    fn item() -> Value {
        json!({
            "id": "MLB10",
            "title": "Garrafa",
            "price": 30.0,
            "currency_id": "BRL",
            "listing_type_id": "gold_special",
            "shipping": {"free_shipping": false}
        })
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, body)
    }

    fn post_json(uri: &str, body: Value, bearer: Option<&str>) -> Request<Body> {
        let mut builder = Request::post(uri).header("content-type", "application/json");
        if let Some(token) = bearer {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::from(body.to_string())).expect("request")
    }

    #[tokio::test]
    async fn health_is_public() {
        let (status, body) = send(
            app(FakeMarketplace::new()),
            Request::get("/health").body(Body::empty()).expect("request"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn price_returns_report_and_history() {
        let (status, body) = send(
            app(FakeMarketplace::new().with_item(item())),
            post_json(
                "/price",
                json!({
                    "identifier": "MLB10",
                    "account_id": "42",
                    "cost_price": 10.0,
                    "margin_percent": 10.0
                }),
                Some("APP_USR-1"),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["suggestion"]["price"], json!(22.99));
        assert_eq!(body["suggestion"]["scenario"], "low");
        assert_eq!(body["history"]["recommended_price"], json!(22.99));
        assert_eq!(body["stages"].as_array().map(Vec::len), Some(5));
    }

    #[tokio::test]
    async fn price_without_credential_is_unauthorized() {
        let (status, body) = send(
            app(FakeMarketplace::new().with_item(item())),
            post_json(
                "/price",
                json!({"identifier": "MLB10", "account_id": "42", "cost_price": 1.0, "margin_percent": 1.0}),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "credentials");
    }

    #[tokio::test]
    async fn scheme_only_bearer_is_unauthorized() {
        let (status, body) = send(
            app(FakeMarketplace::new()),
            Request::get("/item?identifier=SKU-9&account_id=42")
                .header(AUTHORIZATION, "Bearer ")
                .body(Body::empty())
                .expect("request"),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "credentials");
    }

    #[tokio::test]
    async fn unknown_item_is_404() {
        let (status, body) = send(
            app(FakeMarketplace::new()),
            Request::get("/item?identifier=SKU-9&account_id=42")
                .header(AUTHORIZATION, "Bearer APP_USR-1")
                .body(Body::empty())
                .expect("request"),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "resolve_listing");
    }

    #[tokio::test]
    async fn policy_refusal_is_409_with_reason() {
        let mut api = FakeMarketplace::new().with_item(json!({
            "id": "MLB10",
            "tags": ["catalog_listing"]
        }));
        let refusal = MeliError::Status {
            status: 400,
            body: r#"{"message":"item in catalog"}"#.into(),
        };
        api.put_root = Err(refusal.clone());
        api.post_prices = Err(refusal);

        let (status, body) = send(
            app(api),
            post_json(
                "/price/update",
                json!({"listing_id": "MLB10", "new_price": 49.99}),
                Some("APP_USR-1"),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(
            body["detail"]
                .as_str()
                .is_some_and(|detail| detail.contains("catalog"))
        );
    }

    #[tokio::test]
    async fn successful_update_echoes_strategy() {
        let (status, body) = send(
            app(FakeMarketplace::new().with_item(item())),
            post_json(
                "/price/update",
                json!({"listing_id": "MLB10", "new_price": 22.99}),
                Some("APP_USR-1"),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["strategy"], "root-price");
        assert_eq!(body["wholesale_price"], json!(21.99));
    }

    #[tokio::test]
    async fn notifications_are_acknowledged() {
        let (status, _) = send(
            app(FakeMarketplace::new()),
            post_json(
                "/webhooks/notifications",
                json!({"topic": "items", "resource": "/items/MLB10", "user_id": 42, "attempts": 1}),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }
}
