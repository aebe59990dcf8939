use chrono::{Duration, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::error::{ApiError, ApiResult};

pub const TOKEN_EXPIRED: &str = "Token has expired";
pub const INVALID_TOKEN: &str = "Invalid token";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
}

/// Signs and verifies HMAC access tokens.
#[derive(Clone)]
pub struct TokenIssuer {
    algorithm: Algorithm,
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(config: &AuthConfig) -> anyhow::Result<Self> {
        let algorithm = config.algorithm()?;
        Ok(Self {
            algorithm,
            encoding: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.secret.as_bytes()),
            ttl: config.ttl(),
        })
    }

    pub fn issue(&self, user_id: Uuid) -> ApiResult<String> {
        let claims = Claims {
            sub: user_id.to_string(),
            exp: (Utc::now() + self.ttl).timestamp(),
        };
        self.encode(&claims)
    }

    fn encode(&self, claims: &Claims) -> ApiResult<String> {
        encode(&Header::new(self.algorithm), claims, &self.encoding)
            .map_err(|e| ApiError::Internal(anyhow::anyhow!("failed to sign access token: {e}")))
    }

    pub fn verify(&self, token: &str) -> ApiResult<Claims> {
        let validation = Validation::new(self.algorithm);
        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => ApiError::unauthorized(TOKEN_EXPIRED),
                _ => ApiError::unauthorized(INVALID_TOKEN),
            })
    }
}
