use crate::pricing::PricingRules;
use serde::Deserialize;
use std::{env, path::Path, time::Duration};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config file {path}: {message}")]
    Read { path: String, message: String },
    #[error("invalid config file {path}: {message}")]
    Parse { path: String, message: String },
    #[error("invalid value for {key}: {value}")]
    InvalidEnv { key: &'static str, value: String },
}

/// Everything the core needs to talk to the marketplace and price a listing.
///
/// Built once at startup and handed to the pipeline; nothing below the binary
/// reads the process environment.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MarketplaceConfig {
    pub api_root: String,
    pub site_id: String,
    pub currency_id: String,
    /// Store owner account; wins over the caller's account id when set.
    pub seller_id: Option<String>,
    /// Price at which the fee schedule is probed. At 100 the returned fee
    /// amount equals the percentage rate.
    pub fee_probe_price: f64,
    pub pricing: PricingRules,
    pub http: HttpSettings,
    pub oauth: OAuthSettings,
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self {
            api_root: "https://api.mercadolibre.com".to_string(),
            site_id: "MLB".to_string(),
            currency_id: "BRL".to_string(),
            seller_id: None,
            fee_probe_price: 100.0,
            pricing: PricingRules::default(),
            http: HttpSettings::default(),
            oauth: OAuthSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Extra attempts for idempotent reads. Writes are never retried.
    pub read_retries: u32,
    pub retry_base_delay_ms: u64,
    pub request_deadline_secs: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            connect_timeout_secs: 5,
            read_retries: 2,
            retry_base_delay_ms: 200,
            request_deadline_secs: 45,
        }
    }
}

impl HttpSettings {
    pub fn request_deadline(&self) -> Duration {
        Duration::from_secs(self.request_deadline_secs.max(1))
    }
}

#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct OAuthSettings {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub refresh_token: Option<String>,
}

impl std::fmt::Debug for OAuthSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthSettings")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "***"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "***"))
            .finish()
    }
}

impl OAuthSettings {
    pub fn is_complete(&self) -> bool {
        [&self.client_id, &self.client_secret, &self.refresh_token]
            .iter()
            .all(|value| value.as_deref().is_some_and(|v| !v.trim().is_empty()))
    }
}

impl MarketplaceConfig {
    pub fn from_yaml_str(raw: &str, origin: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(raw).map_err(|err| ConfigError::Parse {
            path: origin.to_string(),
            message: err.to_string(),
        })
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|err| ConfigError::Read {
            path: display.clone(),
            message: err.to_string(),
        })?;
        Self::from_yaml_str(&raw, &display)
    }

    /// Optional YAML file named by `REPRICER_CONFIG`, then env overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let base = match env::var("REPRICER_CONFIG") {
            Ok(path) if !path.trim().is_empty() => Self::from_yaml_file(path.trim())?,
            _ => Self::default(),
        };
        base.with_env_overrides(|key| env::var(key).ok())
    }

    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(value) = get("ML_API_ROOT") {
            self.api_root = value.trim_end_matches('/').to_string();
        }
        if let Some(value) = get("ML_SITE_ID") {
            self.site_id = value.to_uppercase();
        }
        if let Some(value) = get("ML_CURRENCY_ID") {
            self.currency_id = value.to_uppercase();
        }
        if let Some(value) = get("SELLER_ID") {
            self.seller_id = Some(value);
        }
        if let Some(value) = get("ML_CLIENT_ID") {
            self.oauth.client_id = Some(value);
        }
        if let Some(value) = get("ML_CLIENT_SECRET") {
            self.oauth.client_secret = Some(value);
        }
        if let Some(value) = get("ML_REFRESH_TOKEN") {
            self.oauth.refresh_token = Some(value);
        }

        if let Some(value) = parse_env::<f64>(&get, "ML_FEE_PROBE_PRICE")? {
            self.fee_probe_price = value;
        }
        if let Some(value) = parse_env::<f64>(&get, "PRICING_FIXED_FEE")? {
            self.pricing.fixed_fee = value;
        }
        if let Some(value) = parse_env::<f64>(&get, "PRICING_THRESHOLD")? {
            self.pricing.free_shipping_threshold = value;
        }
        if let Some(value) = parse_env::<f64>(&get, "PRICING_WHOLESALE_DISCOUNT")? {
            self.pricing.wholesale_discount = value;
        }
        if let Some(value) = parse_env::<u64>(&get, "HTTP_TIMEOUT_SECS")? {
            self.http.timeout_secs = value;
        }
        if let Some(value) = parse_env::<u64>(&get, "HTTP_CONNECT_TIMEOUT_SECS")? {
            self.http.connect_timeout_secs = value;
        }
        if let Some(value) = parse_env::<u32>(&get, "HTTP_READ_RETRIES")? {
            self.http.read_retries = value;
        }
        if let Some(value) = parse_env::<u64>(&get, "REQUEST_DEADLINE_SECS")? {
            self.http.request_deadline_secs = value;
        }
        Ok(self)
    }

    /// The probe must be positive or every fee quote would be meaningless.
    pub fn effective_probe_price(&self) -> f64 {
        if self.fee_probe_price.is_finite() && self.fee_probe_price > 0.0 {
            self.fee_probe_price
        } else {
            100.0
        }
    }
}

fn parse_env<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match get(key) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { key, value: raw }),
        None => Ok(None),
    }
}
