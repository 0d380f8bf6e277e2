use crate::http::build_client;
use crate::meli::config::{MarketplaceConfig, OAuthSettings};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no marketplace credential available")]
    MissingCredentials,
    #[error("token endpoint rejected the refresh token (HTTP {0})")]
    Rejected(u16),
    #[error("oauth request failed: {0}")]
    Request(String),
}

/// Opaque access-token capability handed to the pipeline.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String, AuthError>;
}

/// A token the caller already holds, typically from an `Authorization` header.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Accepts `Bearer <token>` or a bare token.
    pub fn from_authorization(header: &str) -> Option<Self> {
        let raw = header.trim();
        if raw.eq_ignore_ascii_case("bearer") {
            return None;
        }
        let token = match raw.split_once(' ') {
            Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
            Some(_) => return None,
            None => raw,
        };
        (!token.is_empty()).then(|| Self::new(token))
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticToken(***)")
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn access_token(&self) -> Result<String, AuthError> {
        if self.0.trim().is_empty() {
            return Err(AuthError::MissingCredentials);
        }
        Ok(self.0.clone())
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

struct TokenState {
    refresh_token: String,
    access: Option<(String, Instant)>,
}

// Tokens are refreshed this long before the advertised expiry.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Server-side credential using the `refresh_token` grant. The marketplace
/// rotates refresh tokens, so the latest one is kept for the next refresh.
pub struct RefreshTokenProvider {
    http: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    state: Mutex<TokenState>,
}

impl RefreshTokenProvider {
    /// `None` unless client id, secret and refresh token are all configured.
    pub fn from_config(config: &MarketplaceConfig) -> Option<Self> {
        let OAuthSettings {
            client_id,
            client_secret,
            refresh_token,
        } = &config.oauth;
        if !config.oauth.is_complete() {
            return None;
        }
        Some(Self {
            http: build_client(&config.http),
            token_url: format!("{}/oauth/token", config.api_root.trim_end_matches('/')),
            client_id: client_id.clone()?,
            client_secret: client_secret.clone()?,
            state: Mutex::new(TokenState {
                refresh_token: refresh_token.clone()?,
                access: None,
            }),
        })
    }

    async fn request_token(&self, refresh_token: &str) -> Result<TokenResponse, AuthError> {
        let params = [
            ("grant_type", "refresh_token"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("refresh_token", refresh_token),
        ];
        let response = self
            .http
            .post(&self.token_url)
            .header("accept", "application/json")
            .form(&params)
            .send()
            .await
            .map_err(|err| AuthError::Request(err.to_string()))?;

        let status = response.status();
        if status.as_u16() == 400 || status.as_u16() == 401 {
            return Err(AuthError::Rejected(status.as_u16()));
        }
        if !status.is_success() {
            return Err(AuthError::Request(format!("HTTP {status}")));
        }
        response
            .json()
            .await
            .map_err(|err| AuthError::Request(err.to_string()))
    }
}

#[async_trait]
impl TokenProvider for RefreshTokenProvider {
    async fn access_token(&self) -> Result<String, AuthError> {
        let mut state = self.state.lock().await;
        if let Some((token, expires_at)) = &state.access
            && Instant::now() < *expires_at
        {
            return Ok(token.clone());
        }

        let refreshed = self.request_token(&state.refresh_token).await.inspect_err(|err| {
            warn!(target = "repricer.meli", error = %err, "token_refresh_failed");
        })?;
        let lifetime = Duration::from_secs(refreshed.expires_in.unwrap_or(21_600));
        let expires_at = Instant::now() + lifetime.saturating_sub(EXPIRY_MARGIN);
        if let Some(rotated) = refreshed.refresh_token.filter(|t| !t.trim().is_empty()) {
            state.refresh_token = rotated;
        }
        state.access = Some((refreshed.access_token.clone(), expires_at));
        debug!(
            target = "repricer.meli",
            expires_in_secs = lifetime.as_secs(),
            "token_refreshed"
        );
        Ok(refreshed.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(oauth: OAuthSettings) -> MarketplaceConfig {
        MarketplaceConfig {
            api_root: "http://127.0.0.1:9/".into(),
            oauth,
            ..MarketplaceConfig::default()
        }
    }

    #[test]
    fn parses_authorization_header() {
        assert!(StaticToken::from_authorization("Bearer APP_USR-1").is_some());
        assert!(StaticToken::from_authorization("bearer   APP_USR-1 ").is_some());
        assert!(StaticToken::from_authorization("APP_USR-1").is_some());
        assert!(StaticToken::from_authorization("Basic Zm9v").is_none());
        assert!(StaticToken::from_authorization("Bearer ").is_none());
        assert!(StaticToken::from_authorization(" bearer").is_none());
    }

    #[tokio::test]
    async fn static_token_is_returned_verbatim() {
        let token = StaticToken::from_authorization("Bearer APP_USR-1").expect("token");
        assert_eq!(token.access_token().await.expect("token"), "APP_USR-1");
        assert!(matches!(
            StaticToken::new(" ").access_token().await,
            Err(AuthError::MissingCredentials)
        ));
        assert_eq!(format!("{token:?}"), "StaticToken(***)");
    }

    #[test]
    fn refresh_provider_requires_complete_settings() {
        assert!(RefreshTokenProvider::from_config(&config(OAuthSettings::default())).is_none());

        let provider = RefreshTokenProvider::from_config(&config(OAuthSettings {
            client_id: Some("123".into()),
            client_secret: Some("secret".into()),
            refresh_token: Some("TG-1".into()),
        }))
        .expect("provider");
        assert_eq!(provider.token_url, "http://127.0.0.1:9/oauth/token");
    }

    #[tokio::test]
    async fn cached_access_token_is_reused_before_expiry() {
        let provider = RefreshTokenProvider::from_config(&config(OAuthSettings {
            client_id: Some("123".into()),
            client_secret: Some("secret".into()),
            refresh_token: Some("TG-1".into()),
        }))
        .expect("provider");
        provider.state.lock().await.access =
            Some(("APP_USR-cached".into(), Instant::now() + Duration::from_secs(600)));
        assert_eq!(
            provider.access_token().await.expect("cached"),
            "APP_USR-cached"
        );
    }
}
