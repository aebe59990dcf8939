use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{HeaderMap, header, request::Parts},
};
use uuid::Uuid;

use super::{INVALID_SCHEME, NOT_AUTHENTICATED, UNAUTHORISED, token::INVALID_TOKEN};
use crate::error::ApiError;
use crate::models::User;
use crate::state::AppState;

/// The user named by the request's bearer token.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)?;
        let claims = state.tokens.verify(token)?;
        let user_id =
            Uuid::parse_str(&claims.sub).map_err(|_| ApiError::unauthorized(INVALID_TOKEN))?;

        state
            .users
            .find_by_id(user_id)
            .await?
            .map(CurrentUser)
            .ok_or_else(|| ApiError::unauthorized(UNAUTHORISED))
    }
}

pub fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| ApiError::unauthorized(NOT_AUTHENTICATED))?
        .to_str()
        .map_err(|_| ApiError::unauthorized(INVALID_SCHEME))?;

    match value.trim().split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() => {
            Ok(token.trim())
        }
        Some((scheme, _)) if scheme.eq_ignore_ascii_case("bearer") => {
            Err(ApiError::unauthorized(NOT_AUTHENTICATED))
        }
        _ => Err(ApiError::unauthorized(INVALID_SCHEME)),
    }
}

/// Key used for per-client rate limiting: the peer address, the first
/// `X-Forwarded-For` hop, or "unknown".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientAddr(pub String);

impl<S: Send + Sync> FromRequestParts<S> for ClientAddr {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(ConnectInfo(addr)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
            return Ok(Self(addr.ip().to_string()));
        }

        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());

        Ok(Self(forwarded.unwrap_or("unknown").to_string()))
    }
}
