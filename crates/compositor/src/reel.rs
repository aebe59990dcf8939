use std::path::{Path, PathBuf};

use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::blend::{Overlay, composite_frame, retain_fitting};
use crate::error::{ComposeError, ComposeResult};
use crate::ffmpeg::{Ffmpeg, FrameReader, FrameWriter, VideoInfo};
use crate::layout::{default_scale, overlay_size, placements, validate_count, validate_scale};

/// Inputs for one reel: a background clip, 1–3 stills, an audio track and
/// where the result goes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReelSpec {
    pub video: PathBuf,
    pub images: Vec<PathBuf>,
    pub audio: PathBuf,
    pub output: PathBuf,
    #[serde(default)]
    pub scale: Option<f32>,
}

impl ReelSpec {
    /// Overlay width as a fraction of the frame width.
    pub fn effective_scale(&self) -> f32 {
        self.scale.unwrap_or_else(|| default_scale(self.images.len()))
    }

    pub fn validate(&self) -> ComposeResult<()> {
        validate_count(self.images.len())?;
        validate_scale(self.effective_scale())?;

        for (label, path) in [("video", &self.video), ("audio", &self.audio)] {
            if !path.is_file() {
                return Err(ComposeError::validation(format!(
                    "{label} file not found: {}",
                    path.display()
                )));
            }
        }
        for path in &self.images {
            if !path.is_file() {
                return Err(ComposeError::validation(format!(
                    "image file not found: {}",
                    path.display()
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub frames_done: u64,
    pub frames_total: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReelSummary {
    pub frames: u64,
    pub width: u32,
    pub height: u32,
    pub overlays_applied: usize,
}

/// Renders `spec.output`: every frame of the background clip gets the
/// overlays painted on, the frames are re-encoded into a temporary file next
/// to the output and the audio track is muxed in. The temporary file is
/// removed whether or not rendering succeeds.
pub fn create_reel(
    ffmpeg: &Ffmpeg,
    spec: &ReelSpec,
    mut on_progress: impl FnMut(Progress),
) -> ComposeResult<ReelSummary> {
    spec.validate()?;

    let info = ffmpeg.probe(&spec.video)?;
    info!(
        "Background video {}: {}x{} @ {} fps, {} frames",
        spec.video.display(),
        info.width,
        info.height,
        info.frame_rate(),
        info.frame_count
            .map_or_else(|| "unknown".to_string(), |n| n.to_string())
    );

    let overlays = build_overlays(&spec.images, (info.width, info.height), spec.effective_scale())?;
    if overlays.is_empty() {
        warn!("No overlay fits inside the frame, the video is re-encoded unchanged");
    }

    let out_dir = ensure_parent_dir(&spec.output)?;
    let temp_video = tempfile::Builder::new()
        .prefix(".reel-")
        .suffix(".mp4")
        .tempfile_in(&out_dir)?
        .into_temp_path();

    let mut reader = ffmpeg.open_frames(&spec.video, &info)?;
    let mut writer = ffmpeg.open_encoder(&temp_video, &info)?;

    let streamed = stream_frames(&mut reader, &mut writer, &info, &overlays, &mut on_progress);
    let decoded = reader.finish();
    let encoded = writer.finish();

    let frames = streamed?;
    decoded?;
    encoded?;

    if frames == 0 {
        return Err(ComposeError::validation(format!(
            "no frames could be decoded from {}",
            spec.video.display()
        )));
    }
    info!("Composited {frames} frames, adding audio");

    ffmpeg.mux_audio(&temp_video, &spec.audio, &spec.output)?;

    if let Err(e) = temp_video.close() {
        warn!("Failed to remove temporary video: {e}");
    }

    info!("Reel written to {}", spec.output.display());
    Ok(ReelSummary {
        frames,
        width: info.width,
        height: info.height,
        overlays_applied: overlays.len(),
    })
}

fn stream_frames(
    reader: &mut FrameReader,
    writer: &mut FrameWriter,
    info: &VideoInfo,
    overlays: &[Overlay],
    on_progress: &mut impl FnMut(Progress),
) -> ComposeResult<u64> {
    let mut buf = vec![0u8; reader.frame_len()];
    let mut frames_done = 0u64;

    while reader.next_frame(&mut buf)? {
        let mut frame = RgbImage::from_raw(info.width, info.height, buf)
            .ok_or_else(|| ComposeError::ffmpeg("decoded frame has the wrong size"))?;
        composite_frame(&mut frame, overlays);
        writer.write_frame(frame.as_raw())?;
        buf = frame.into_raw();

        frames_done += 1;
        on_progress(Progress {
            frames_done,
            frames_total: info.frame_count,
        });
    }

    Ok(frames_done)
}

/// Loads, sizes and positions the overlay images for a frame of the given
/// size. Overlays that would leave the frame are dropped here, once, rather
/// than on every frame.
pub fn build_overlays(images: &[PathBuf], frame: (u32, u32), scale: f32) -> ComposeResult<Vec<Overlay>> {
    validate_count(images.len())?;
    validate_scale(scale)?;

    let decoded = images
        .iter()
        .map(|path| Overlay::open(path))
        .collect::<ComposeResult<Vec<_>>>()?;

    let sizes = decoded
        .iter()
        .map(|img| overlay_size(frame.0, (img.width(), img.height()), scale))
        .collect::<ComposeResult<Vec<_>>>()?;

    let positions = placements(frame, &sizes)?;

    let overlays = decoded
        .iter()
        .zip(sizes)
        .zip(positions)
        .map(|((img, size), placement)| Overlay::from_image(img, size, placement))
        .collect();

    Ok(retain_fitting(overlays, frame))
}

/// Creates the directory that will hold `output` and returns it.
pub fn ensure_parent_dir(output: &Path) -> ComposeResult<PathBuf> {
    let dir = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
