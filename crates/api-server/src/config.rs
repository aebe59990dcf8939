use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, bail};
use chrono::Duration;
use jsonwebtoken::Algorithm;

const DEFAULT_TOKEN_MINUTES: i64 = 15;

/// Everything the router needs; the binary fills this from flags and
/// environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// SQLite database file. `None` keeps the database in memory.
    pub db_path: Option<PathBuf>,
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
    pub auth: AuthConfig,
    pub google: Option<GoogleConfig>,
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
    /// Reel uploads per client per minute, 0 disables the limit.
    pub reel_rate_limit: u32,
    pub max_upload_bytes: usize,
}

impl ServerConfig {
    pub fn new(data_dir: &std::path::Path, auth: AuthConfig) -> Self {
        Self {
            db_path: Some(data_dir.join("reelgen.db")),
            upload_dir: data_dir.join("uploads"),
            output_dir: data_dir.join("renders"),
            auth,
            google: None,
            ffmpeg_path: None,
            ffprobe_path: None,
            reel_rate_limit: 5,
            max_upload_bytes: 512 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub secret: String,
    pub algorithm: String,
    /// Access token lifetime; 0 falls back to 15 minutes.
    pub expiration_minutes: i64,
}

impl AuthConfig {
    pub fn algorithm(&self) -> anyhow::Result<Algorithm> {
        let algorithm = Algorithm::from_str(self.algorithm.trim())
            .with_context(|| format!("unknown token algorithm '{}'", self.algorithm))?;
        match algorithm {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => Ok(algorithm),
            other => bail!("token algorithm {other:?} needs a key pair; use HS256, HS384 or HS512"),
        }
    }

    pub fn ttl(&self) -> Duration {
        if self.expiration_minutes > 0 {
            Duration::minutes(self.expiration_minutes)
        } else {
            Duration::minutes(DEFAULT_TOKEN_MINUTES)
        }
    }
}

#[derive(Debug, Clone)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

impl GoogleConfig {
    /// All three values or none; a partial set is a configuration error.
    pub fn from_parts(
        client_id: Option<String>,
        client_secret: Option<String>,
        redirect_uri: Option<String>,
    ) -> anyhow::Result<Option<Self>> {
        match (client_id, client_secret, redirect_uri) {
            (Some(client_id), Some(client_secret), Some(redirect_uri)) => Ok(Some(Self {
                client_id,
                client_secret,
                redirect_uri,
            })),
            (None, None, None) => Ok(None),
            _ => bail!(
                "Google sign-in needs GOOGLE_CLIENT_ID, GOOGLE_CLIENT_SECRET and GOOGLE_REDIRECT_URI together"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn auth(algorithm: &str, minutes: i64) -> AuthConfig {
        AuthConfig {
            secret: "s".into(),
            algorithm: algorithm.into(),
            expiration_minutes: minutes,
        }
    }

    #[test]
    fn hmac_algorithms_only() {
        assert_eq!(auth("HS256", 1).algorithm().unwrap(), Algorithm::HS256);
        assert_eq!(auth("HS512", 1).algorithm().unwrap(), Algorithm::HS512);
        assert!(auth("RS256", 1).algorithm().is_err());
        assert!(auth("nope", 1).algorithm().is_err());
    }

    #[test]
    fn zero_expiration_defaults_to_fifteen_minutes() {
        assert_eq!(auth("HS256", 0).ttl(), Duration::minutes(15));
        assert_eq!(auth("HS256", 45).ttl(), Duration::minutes(45));
    }

    #[test]
    fn google_settings_come_as_a_group() {
        assert!(GoogleConfig::from_parts(None, None, None).unwrap().is_none());
        assert!(
            GoogleConfig::from_parts(Some("id".into()), Some("secret".into()), Some("http://cb".into()))
                .unwrap()
                .is_some()
        );
        assert!(GoogleConfig::from_parts(Some("id".into()), None, None).is_err());
    }

    #[test]
    fn defaults_live_under_the_data_dir() {
        let config = ServerConfig::new(std::path::Path::new("/data"), auth("HS256", 30));
        assert_eq!(config.db_path, Some(PathBuf::from("/data/reelgen.db")));
        assert_eq!(config.upload_dir, PathBuf::from("/data/uploads"));
        assert_eq!(config.output_dir, PathBuf::from("/data/renders"));
        assert_eq!(config.reel_rate_limit, 5);
    }
}
