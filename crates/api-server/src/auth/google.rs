use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use reqwest::{Client, Url};
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::GoogleConfig;
use crate::error::{ApiError, ApiResult};

pub const AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";

const SCOPES: &str = "openid email profile";
const STATE_TTL: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleUser {
    pub email: String,
    #[serde(default)]
    pub email_verified: Option<bool>,
    #[serde(default)]
    pub name: Option<String>,
}

impl GoogleUser {
    /// Display name, falling back to the local part of the address.
    pub fn display_name(&self) -> String {
        match self.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => self
                .email
                .split('@')
                .next()
                .unwrap_or(&self.email)
                .to_string(),
        }
    }
}

/// Google authorization-code flow: builds the consent redirect, remembers the
/// `state` it handed out and trades the returned code for the user's profile.
#[derive(Clone)]
pub struct GoogleOAuth {
    client: Client,
    config: GoogleConfig,
    pending: Arc<Mutex<HashMap<String, Instant>>>,
}

impl GoogleOAuth {
    pub fn new(config: GoogleConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("reelgen/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            config,
            pending: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn authorize_url(&self) -> ApiResult<Url> {
        let state = Uuid::new_v4().simple().to_string();
        {
            let mut pending = self.pending.lock();
            let now = Instant::now();
            pending.retain(|_, issued| now.duration_since(*issued) < STATE_TTL);
            pending.insert(state.clone(), now);
        }

        Url::parse_with_params(
            AUTHORIZE_URL,
            &[
                ("response_type", "code"),
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("scope", SCOPES),
                ("state", state.as_str()),
                ("access_type", "online"),
                ("prompt", "select_account"),
            ],
        )
        .map_err(|e| ApiError::Internal(e.into()))
    }

    /// Consumes a `state` value; each one is accepted once, within ten minutes.
    pub fn take_state(&self, state: &str) -> bool {
        let Some(issued) = self.pending.lock().remove(state) else {
            return false;
        };
        issued.elapsed() < STATE_TTL
    }

    pub async fn exchange_code(&self, code: &str) -> ApiResult<String> {
        let response = self
            .client
            .post(TOKEN_URL)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
            ])
            .send()
            .await
            .map_err(|e| upstream("token exchange", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!("Google token exchange failed ({status}): {body}");
            return Err(ApiError::bad_request(super::INVALID_AUTH));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| upstream("token exchange", e))?;
        Ok(token.access_token)
    }

    pub async fn userinfo(&self, access_token: &str) -> ApiResult<GoogleUser> {
        let response = self
            .client
            .get(USERINFO_URL)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| upstream("userinfo", e))?;

        if !response.status().is_success() {
            warn!("Google userinfo request failed ({})", response.status());
            return Err(ApiError::bad_request(super::INVALID_AUTH));
        }

        let user: GoogleUser = response.json().await.map_err(|e| upstream("userinfo", e))?;
        if user.email_verified == Some(false) {
            return Err(ApiError::bad_request("Google account e-mail is not verified."));
        }
        info!("Google sign-in for {}", user.email);
        Ok(user)
    }
}

fn upstream(step: &str, err: reqwest::Error) -> ApiError {
    warn!("Google {step} failed: {err}");
    ApiError::bad_request(super::INVALID_AUTH)
}
