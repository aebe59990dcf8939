use std::path::PathBuf;

use clap::Parser;
use reelgen_compositor::{Ffmpeg, ReelSpec, create_reel};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Overlay 1–3 images on a video and add an audio track.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Background video
    #[arg(long)]
    video: PathBuf,

    /// Audio track muxed into the result
    #[arg(long)]
    audio: PathBuf,

    /// Overlay image, repeat up to three times
    #[arg(long = "image", required = true, num_args = 1)]
    images: Vec<PathBuf>,

    #[arg(short, long)]
    output: PathBuf,

    /// Overlay width as a fraction of the frame width (default 0.5 for one image, 0.3 otherwise)
    #[arg(long)]
    scale: Option<f32>,

    #[arg(long, env = "FFMPEG_PATH")]
    ffmpeg: Option<PathBuf>,

    #[arg(long, env = "FFPROBE_PATH")]
    ffprobe: Option<PathBuf>,

    /// Video encoder passed to ffmpeg's `-c:v`
    #[arg(long)]
    codec: Option<String>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut ffmpeg = Ffmpeg::new(cli.ffmpeg, cli.ffprobe);
    if let Some(codec) = cli.codec {
        ffmpeg = ffmpeg.with_video_codec(codec);
    }
    info!("Using {}", ffmpeg.version()?);

    let spec = ReelSpec {
        video: cli.video,
        images: cli.images,
        audio: cli.audio,
        output: cli.output,
        scale: cli.scale,
    };

    let mut last_logged = 0;
    let summary = create_reel(&ffmpeg, &spec, |progress| {
        let done = progress.frames_done;
        if done - last_logged >= 100 {
            last_logged = done;
            match progress.frames_total {
                Some(total) => info!("Processed {done}/{total} frames"),
                None => info!("Processed {done} frames"),
            }
        }
    })?;

    info!(
        "Done: {} frames at {}x{} with {} overlay(s) -> {}",
        summary.frames,
        summary.width,
        summary.height,
        summary.overlays_applied,
        spec.output.display()
    );
    Ok(())
}
