use std::sync::Arc;

use reelgen_compositor::Ffmpeg;

use crate::auth::{GoogleOAuth, TokenIssuer};
use crate::config::ServerConfig;
use crate::db::{self, DbPool};
use crate::rate_limit::RateLimiter;
use crate::render::Renderer;
use crate::services::{ReelService, UserService};
use crate::uploads::{FileStorage, UploadStore};

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub users: UserService,
    pub reels: ReelService,
    pub uploads: Arc<dyn FileStorage>,
    pub renderer: Renderer,
    pub tokens: Arc<TokenIssuer>,
    pub google: Option<Arc<GoogleOAuth>>,
    pub reel_limiter: RateLimiter,
}

impl AppState {
    pub fn new(config: &ServerConfig) -> anyhow::Result<Self> {
        let pool = match &config.db_path {
            Some(path) => db::open_pool(path)?,
            None => db::open_memory_pool()?,
        };

        std::fs::create_dir_all(&config.upload_dir)?;
        std::fs::create_dir_all(&config.output_dir)?;

        let google = config
            .google
            .clone()
            .map(GoogleOAuth::new)
            .transpose()?
            .map(Arc::new);

        Ok(Self {
            users: UserService::new(pool.clone()),
            reels: ReelService::new(pool.clone()),
            pool,
            uploads: Arc::new(UploadStore::new(config.upload_dir.clone())),
            renderer: Renderer::new(
                Ffmpeg::new(config.ffmpeg_path.clone(), config.ffprobe_path.clone()),
                config.output_dir.clone(),
            ),
            tokens: Arc::new(TokenIssuer::new(&config.auth)?),
            google,
            reel_limiter: RateLimiter::per_minute(config.reel_rate_limit),
        })
    }
}
