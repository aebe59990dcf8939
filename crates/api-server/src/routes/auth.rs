use axum::{Router, extract::State, response::Redirect, routing::get};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::auth::{CurrentUser, GoogleOAuth, INVALID_AUTH};
use crate::error::{ApiError, ApiResult};
use crate::extractors::{Json, Query};
use crate::models::{User, UserCreate};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth/login/google", get(google_login))
        .route("/auth/google", get(google_callback))
        .route("/auth/me", get(me))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
}

fn google(state: &AppState) -> ApiResult<&GoogleOAuth> {
    state
        .google
        .as_deref()
        .ok_or_else(|| ApiError::bad_request("Google sign-in is not configured."))
}

async fn google_login(State(state): State<AppState>) -> ApiResult<Redirect> {
    let url = google(&state)?.authorize_url()?;
    Ok(Redirect::to(url.as_str()))
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

async fn google_callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> ApiResult<Json<TokenResponse>> {
    let google = google(&state)?;

    if let Some(error) = query.error {
        warn!("Google sign-in was refused: {error}");
        return Err(ApiError::bad_request(INVALID_AUTH));
    }
    let (Some(code), Some(oauth_state)) = (query.code, query.state) else {
        return Err(ApiError::bad_request(INVALID_AUTH));
    };
    if !google.take_state(&oauth_state) {
        warn!("Google callback with unknown or expired state");
        return Err(ApiError::bad_request(INVALID_AUTH));
    }

    let access_token = google.exchange_code(&code).await?;
    let profile = google.userinfo(&access_token).await?;
    let user = find_or_create(&state, &profile.email, profile.display_name()).await?;

    Ok(Json(TokenResponse {
        access_token: state.tokens.issue(user.id)?,
        token_type: "bearer".to_string(),
    }))
}

/// Signs in an existing account by e-mail, or registers a new one.
async fn find_or_create(state: &AppState, email: &str, name: String) -> ApiResult<User> {
    if let Some(user) = state.users.find_by_email(email).await? {
        return Ok(user);
    }

    let user = state
        .users
        .create(UserCreate {
            name,
            email: email.to_string(),
        })
        .await?;
    info!("Registered user {} via Google", user.id);
    Ok(user)
}

async fn me(CurrentUser(user): CurrentUser) -> Json<User> {
    Json(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthConfig, ServerConfig};
    use pretty_assertions::assert_eq;

    fn state() -> AppState {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ServerConfig::new(
            dir.path(),
            AuthConfig {
                secret: "test".into(),
                algorithm: "HS256".into(),
                expiration_minutes: 30,
            },
        );
        config.db_path = None;
        AppState::new(&config).unwrap()
    }

    #[tokio::test]
    async fn find_or_create_reuses_accounts_by_email() {
        let state = state();
        let first = find_or_create(&state, "ada@example.com", "ada".into()).await.unwrap();
        let again = find_or_create(&state, "ada@example.com", "Someone Else".into())
            .await
            .unwrap();

        assert_eq!(first, again);
        assert_eq!(state.users.find_all().await.unwrap().len(), 1);
    }
}
