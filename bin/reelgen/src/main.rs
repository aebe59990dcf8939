mod io;

use std::{
    env,
    net::{Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
};

use anyhow::{Context, anyhow};
use clap::Parser;
use reelgen_api_server::{AuthConfig, GoogleConfig, ServerConfig, create_router};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::io::{ensure_dir, resolve_data_dir};

const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(author, version, about = "Reels generator backend", long_about = None)]
struct Cli {
    #[arg(long, env = "REELGEN_HOST", default_value_t = Ipv4Addr::UNSPECIFIED)]
    host: Ipv4Addr,

    #[arg(short, long, env = "REELGEN_PORT", default_value_t = 8000)]
    port: u16,

    /// Root for the database, uploads and renders
    #[arg(long, env = "REELGEN_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// SQLite database file, or `:memory:`
    #[arg(long, env = "DB_CONNECTION")]
    db: Option<String>,

    #[arg(long, env = "UPLOAD_DIR")]
    upload_dir: Option<PathBuf>,

    #[arg(long, env = "OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    #[arg(long, env = "ACCESS_TOKEN_SECRET", hide_env_values = true)]
    token_secret: String,

    /// Access token lifetime in minutes
    #[arg(long, env = "ACCESS_TOKEN_EXPIRATION", default_value_t = 30)]
    token_expiration: i64,

    #[arg(long, env = "ALGORITHM", default_value = "HS256")]
    algorithm: String,

    #[arg(long, env = "GOOGLE_CLIENT_ID")]
    google_client_id: Option<String>,

    #[arg(long, env = "GOOGLE_CLIENT_SECRET", hide_env_values = true)]
    google_client_secret: Option<String>,

    #[arg(long, env = "GOOGLE_REDIRECT_URI")]
    google_redirect_uri: Option<String>,

    #[arg(long, env = "FFMPEG_PATH")]
    ffmpeg: Option<PathBuf>,

    #[arg(long, env = "FFPROBE_PATH")]
    ffprobe: Option<PathBuf>,

    /// Reel uploads per client per minute, 0 to disable
    #[arg(long, env = "REEL_RATE_LIMIT", default_value_t = 5)]
    reel_rate_limit: u32,

    #[arg(long, env = "MAX_UPLOAD_MB", default_value_t = 512)]
    max_upload_mb: usize,
}

impl Cli {
    fn server_config(self, data_dir: &Path) -> anyhow::Result<ServerConfig> {
        let auth = AuthConfig {
            secret: self.token_secret,
            algorithm: self.algorithm,
            expiration_minutes: self.token_expiration,
        };
        let mut config = ServerConfig::new(data_dir, auth);

        match self.db.as_deref() {
            Some(":memory:") => config.db_path = None,
            Some(path) => config.db_path = Some(PathBuf::from(path)),
            None => {}
        }
        if let Some(dir) = self.upload_dir {
            config.upload_dir = dir;
        }
        if let Some(dir) = self.output_dir {
            config.output_dir = dir;
        }

        config.google = GoogleConfig::from_parts(
            self.google_client_id,
            self.google_client_secret,
            self.google_redirect_uri,
        )?;
        config.ffmpeg_path = self.ffmpeg;
        config.ffprobe_path = self.ffprobe;
        config.reel_rate_limit = self.reel_rate_limit;
        config.max_upload_bytes = self.max_upload_mb.saturating_mul(1024 * 1024);
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    let rust_log = env::var(EnvFilter::DEFAULT_ENV).unwrap_or_default();
    let env_filter = match rust_log.is_empty() {
        true => EnvFilter::builder().parse_lossy("info"),
        false => EnvFilter::builder().parse_lossy(rust_log),
    };
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    info!("🚀 Reelgen v{APP_VERSION}");

    let data_dir = resolve_data_dir(args.data_dir.clone())?;
    ensure_dir(&data_dir)?;

    let host = args.host;
    let port = args.port;
    let config = args.server_config(&data_dir)?;

    let rt = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    rt.block_on(async {
        let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("🛑 Received Ctrl+C, shutting down server...");
                    let _ = shutdown_tx.send(()).await;
                }
                Err(err) => {
                    error!("Unable to listen for shutdown signal: {err}");
                }
            }
        });

        run_server(shutdown_rx, config, host, port).await
    })
}

async fn run_server(
    mut shutdown_signal: tokio::sync::mpsc::Receiver<()>,
    config: ServerConfig,
    host: Ipv4Addr,
    port: u16,
) -> anyhow::Result<()> {
    info!("📂 Uploads: {}", config.upload_dir.display());
    info!("📂 Renders: {}", config.output_dir.display());
    match &config.db_path {
        Some(path) => info!("🗄️ Database: {}", path.display()),
        None => info!("🗄️ Database: in memory"),
    }

    let app = create_router(config)?;

    let listener_addr = SocketAddr::from((host, port));
    let listener = tokio::net::TcpListener::bind(listener_addr)
        .await
        .map_err(|err| anyhow!("Failed to create server socket on {listener_addr}: {err:?}"))?;

    info!("✅ Listening on http://{listener_addr}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = shutdown_signal.recv().await;
        info!("🛑 Shutdown signal received.");
    })
    .await?;

    info!("✅ Web server shutdown complete.");
    Ok(())
}
