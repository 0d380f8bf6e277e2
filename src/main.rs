use eyre::WrapErr;
use repricer::PricingPipeline;
use repricer::api::{AppState, router};
use repricer::meli::{MarketplaceConfig, RefreshTokenProvider, TokenProvider};
use std::{net::SocketAddr, sync::Arc};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "repricer.api", "server crashed: {err:?}");
        std::process::exit(1);
    }
}

async fn run() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = MarketplaceConfig::load().wrap_err("loading marketplace configuration")?;
    log_config(&config);

    let server_tokens: Option<Arc<dyn TokenProvider>> =
        match RefreshTokenProvider::from_config(&config) {
            Some(provider) => Some(Arc::new(provider)),
            None => {
                warn!(
                    target = "repricer.api",
                    "no refresh-token credential configured; callers must send a bearer token"
                );
                None
            }
        };
    let state = AppState {
        pipeline: PricingPipeline::from_config(config),
        server_tokens,
    };
    let app = router(state, body_limit_from_env());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "repricer.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("binding {addr}"))?;
    axum::serve(listener, app.into_make_service())
        .await
        .wrap_err("serving http")?;
    Ok(())
}

fn log_config(config: &MarketplaceConfig) {
    let rules = &config.pricing;
    info!(
        target = "repricer.api",
        api_root = %config.api_root,
        site_id = %config.site_id,
        seller_override = config.seller_id.is_some(),
        fixed_fee = rules.fixed_fee,
        threshold = rules.free_shipping_threshold,
        read_retries = config.http.read_retries,
        "configuration loaded"
    );
}

fn body_limit_from_env() -> usize {
    std::env::var("REQUEST_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(64 * 1024)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
