use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use reelgen_compositor::{ComposeError, Ffmpeg, MAX_OVERLAYS, ReelSpec, ReelSummary, create_reel};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::Reel;
use crate::services::ReelService;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderState {
    Queued,
    Running,
    Completed,
    Failed,
}

impl RenderState {
    pub fn is_active(self) -> bool {
        matches!(self, Self::Queued | Self::Running)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderStatus {
    pub reel_id: Uuid,
    pub state: RenderState,
    pub frames_done: u64,
    pub frames_total: Option<u64>,
    pub output: Option<String>,
    pub error: Option<String>,
}

impl RenderStatus {
    fn queued(reel_id: Uuid) -> Self {
        Self {
            reel_id,
            state: RenderState::Queued,
            frames_done: 0,
            frames_total: None,
            output: None,
            error: None,
        }
    }
}

/// Runs reel compositing jobs in the background and tracks their progress.
#[derive(Clone, Debug)]
pub struct Renderer {
    ffmpeg: Arc<Ffmpeg>,
    output_dir: PathBuf,
    jobs: Arc<RwLock<HashMap<Uuid, RenderStatus>>>,
}

impl Renderer {
    pub fn new(ffmpeg: Ffmpeg, output_dir: PathBuf) -> Self {
        Self {
            ffmpeg: Arc::new(ffmpeg),
            output_dir,
            jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn ffmpeg(&self) -> &Ffmpeg {
        &self.ffmpeg
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn output_path(&self, reel_id: Uuid) -> PathBuf {
        self.output_dir.join(format!("{reel_id}.mp4"))
    }

    pub fn status(&self, reel_id: Uuid) -> Option<RenderStatus> {
        self.jobs.read().get(&reel_id).cloned()
    }

    /// Whether a render of the reel is queued or running.
    pub fn is_rendering(&self, reel_id: Uuid) -> bool {
        self.jobs
            .read()
            .get(&reel_id)
            .is_some_and(|status| status.state.is_active())
    }

    pub fn forget(&self, reel_id: Uuid) {
        self.jobs.write().remove(&reel_id);
    }

    /// Queues a render of `reel`. The finished file's path is stored on the
    /// reel row once the job completes.
    pub fn submit(&self, reel: &Reel, scale: Option<f32>, reels: ReelService) -> ApiResult<RenderStatus> {
        if reel.images.is_empty() {
            return Err(ApiError::unprocessable("Reel has no images to overlay."));
        }
        if reel.images.len() > MAX_OVERLAYS {
            return Err(ApiError::unprocessable(format!(
                "Expected 1, 2, or 3 images, got {}",
                reel.images.len()
            )));
        }

        let spec = ReelSpec {
            video: PathBuf::from(&reel.file),
            images: reel.images.iter().map(PathBuf::from).collect(),
            audio: PathBuf::from(&reel.audio),
            output: self.output_path(reel.id),
            scale,
        };
        spec.validate().map_err(|e| ApiError::unprocessable(e.to_string()))?;

        let reel_id = reel.id;
        let status = RenderStatus::queued(reel_id);
        {
            let mut jobs = self.jobs.write();
            if jobs.get(&reel_id).is_some_and(|s| s.state.is_active()) {
                return Err(ApiError::Conflict("Render already in progress.".to_string()));
            }
            jobs.insert(reel_id, status.clone());
        }

        let ffmpeg = Arc::clone(&self.ffmpeg);
        let jobs = Arc::clone(&self.jobs);

        tokio::spawn(async move {
            let result = {
                let jobs = Arc::clone(&jobs);
                tokio::task::spawn_blocking(move || run_render(&ffmpeg, &spec, reel_id, &jobs)).await
            };

            let outcome = match result {
                Ok(Ok((summary, output))) => {
                    info!(
                        "Render of reel {reel_id} finished: {} frames -> {}",
                        summary.frames,
                        output.display()
                    );
                    let output = output.to_string_lossy().to_string();
                    match reels.set_output(reel_id, output.clone()).await {
                        Ok(_) => Ok(output),
                        Err(e) => Err(format!("render finished but saving the output failed: {e}")),
                    }
                }
                Ok(Err(e)) => Err(e.to_string()),
                Err(e) => Err(format!("render task failed: {e}")),
            };

            let mut jobs = jobs.write();
            if let Some(status) = jobs.get_mut(&reel_id) {
                match outcome {
                    Ok(output) => {
                        status.state = RenderState::Completed;
                        status.output = Some(output);
                    }
                    Err(message) => {
                        error!("Render of reel {reel_id} failed: {message}");
                        status.state = RenderState::Failed;
                        status.error = Some(message);
                    }
                }
            }
        });

        Ok(status)
    }
}

fn run_render(
    ffmpeg: &Ffmpeg,
    spec: &ReelSpec,
    reel_id: Uuid,
    jobs: &RwLock<HashMap<Uuid, RenderStatus>>,
) -> Result<(ReelSummary, PathBuf), ComposeError> {
    if let Some(status) = jobs.write().get_mut(&reel_id) {
        status.state = RenderState::Running;
    }

    let summary = create_reel(ffmpeg, spec, |progress| {
        if let Some(status) = jobs.write().get_mut(&reel_id) {
            status.frames_done = progress.frames_done;
            status.frames_total = progress.frames_total;
        }
    })?;

    Ok((summary, spec.output.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_pool;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn reel(images: Vec<String>, dir: &Path) -> Reel {
        let file = dir.join("bg.mp4");
        let audio = dir.join("track.mp3");
        std::fs::write(&file, b"v").unwrap();
        std::fs::write(&audio, b"a").unwrap();
        Reel {
            id: Uuid::new_v4(),
            title: "t".into(),
            file: file.to_string_lossy().to_string(),
            audio: audio.to_string_lossy().to_string(),
            images,
            output: None,
            user_id: Uuid::new_v4(),
            created_at: Utc::now(),
        }
    }

    fn renderer(dir: &Path) -> (Renderer, ReelService) {
        let renderer = Renderer::new(
            Ffmpeg::new(Some(dir.join("no-ffmpeg")), Some(dir.join("no-ffprobe"))),
            dir.join("renders"),
        );
        (renderer, ReelService::new(open_memory_pool().unwrap()))
    }

    #[test]
    fn reels_without_images_cannot_render() {
        let dir = tempfile::tempdir().unwrap();
        let (renderer, reels) = renderer(dir.path());
        let err = renderer
            .submit(&reel(Vec::new(), dir.path()), None, reels)
            .unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(renderer.status(Uuid::new_v4()), None);
    }

    #[test]
    fn invalid_scale_is_rejected_up_front() {
        let dir = tempfile::tempdir().unwrap();
        let (renderer, reels) = renderer(dir.path());
        let image = dir.path().join("i.png");
        std::fs::write(&image, b"png").unwrap();
        let reel = reel(vec![image.to_string_lossy().to_string()], dir.path());

        let err = renderer.submit(&reel, Some(2.0), reels).unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(renderer.status(reel.id), None);
    }

    #[tokio::test]
    async fn missing_ffmpeg_marks_the_job_failed() {
        let dir = tempfile::tempdir().unwrap();
        let (renderer, reels) = renderer(dir.path());
        let image = dir.path().join("i.png");
        std::fs::write(&image, b"png").unwrap();
        let reel = reel(vec![image.to_string_lossy().to_string()], dir.path());

        let queued = renderer.submit(&reel, None, reels.clone()).unwrap();
        assert_eq!(queued.state, RenderState::Queued);

        let mut status = renderer.status(reel.id).unwrap();
        for _ in 0..200 {
            if !status.state.is_active() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            status = renderer.status(reel.id).unwrap();
        }

        assert_eq!(status.state, RenderState::Failed);
        assert!(status.error.unwrap().contains("failed to run"));
        assert!(!renderer.output_path(reel.id).exists());

        renderer.forget(reel.id);
        assert_eq!(renderer.status(reel.id), None);
    }

    #[test]
    fn output_paths_are_per_reel() {
        let (renderer, _) = renderer(Path::new("/data"));
        let id = Uuid::new_v4();
        assert_eq!(renderer.output_path(id), PathBuf::from(format!("/data/renders/{id}.mp4")));
    }
}
