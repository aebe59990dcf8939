use axum::{
    Router,
    body::Body,
    extract::{State, multipart::MultipartError},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use reelgen_compositor::MAX_OVERLAYS;
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::ClientAddr;
use crate::error::{ApiError, ApiResult};
use crate::extractors::{Json, Multipart, Path, Query};
use crate::models::{Reel, ReelCreate, ReelUpdate};
use crate::render::{RenderState, RenderStatus};
use crate::services::reels::REEL_NOT_FOUND;
use crate::state::AppState;
use crate::uploads::{FileStorage, is_within, remove_files};

const NOT_RENDERED: &str = "Reel has not been rendered.";
pub const RENDER_IN_PROGRESS: &str = "Render in progress.";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/reels", get(list_reels).post(create_reel))
        .route(
            "/reels/{id}",
            get(get_reel).patch(update_reel).delete(delete_reel),
        )
        .route("/reels/{id}/render", get(render_status).post(start_render))
        .route("/reels/{id}/output", get(download_output))
}

async fn list_reels(State(state): State<AppState>) -> ApiResult<Json<Vec<Reel>>> {
    Ok(Json(state.reels.find_all().await?))
}

async fn find_reel(state: &AppState, id: Uuid) -> ApiResult<Reel> {
    state
        .reels
        .find_by_id(id)
        .await?
        .ok_or_else(|| ApiError::not_found(REEL_NOT_FOUND))
}

/// Multipart fields of a reel upload, with the files already stored.
#[derive(Debug, Default)]
struct ReelForm {
    title: Option<String>,
    user_id: Option<String>,
    video: Option<String>,
    audio: Option<String>,
    images: Vec<String>,
}

impl ReelForm {
    fn files(&self) -> Vec<String> {
        self.video
            .iter()
            .chain(self.audio.iter())
            .chain(self.images.iter())
            .cloned()
            .collect()
    }

    fn to_create(&self) -> ApiResult<ReelCreate> {
        let title = self
            .title
            .clone()
            .ok_or_else(|| ApiError::unprocessable("title is required"))?;
        let user_id = self
            .user_id
            .as_deref()
            .ok_or_else(|| ApiError::unprocessable("user_id is required"))?;
        let user_id = Uuid::parse_str(user_id.trim())
            .map_err(|_| ApiError::unprocessable("user_id must be a UUID"))?;
        let file = self
            .video
            .clone()
            .ok_or_else(|| ApiError::unprocessable("video file is required"))?;
        let audio = self
            .audio
            .clone()
            .ok_or_else(|| ApiError::unprocessable("audio file is required"))?;

        Ok(ReelCreate {
            title,
            file,
            audio,
            images: self.images.clone(),
            user_id,
        })
    }
}

fn invalid_form(err: MultipartError) -> ApiError {
    ApiError::unprocessable(format!("Invalid multipart body: {}", err.body_text()))
}

async fn read_form(
    uploads: &dyn FileStorage,
    multipart: &mut axum::extract::Multipart,
    form: &mut ReelForm,
) -> ApiResult<()> {
    while let Some(field) = multipart.next_field().await.map_err(invalid_form)? {
        let Some(name) = field.name().map(str::to_owned) else {
            continue;
        };

        match name.as_str() {
            "title" => form.title = Some(field.text().await.map_err(invalid_form)?),
            "user_id" => form.user_id = Some(field.text().await.map_err(invalid_form)?),
            "video" | "audio" => {
                let slot_taken = if name == "video" {
                    form.video.is_some()
                } else {
                    form.audio.is_some()
                };
                if slot_taken {
                    return Err(ApiError::unprocessable(format!("only one {name} file is allowed")));
                }
                if field.file_name().is_none() {
                    return Err(ApiError::unprocessable(format!("{name} must be a file upload")));
                }

                let path = uploads.save_field(field).await?;
                if name == "video" {
                    form.video = Some(path);
                } else {
                    form.audio = Some(path);
                }
            }
            "images" => {
                // Browsers send an empty part for an untouched file input.
                if field.file_name().is_none_or(str::is_empty) {
                    continue;
                }
                if form.images.len() >= MAX_OVERLAYS {
                    return Err(ApiError::unprocessable(format!(
                        "at most {MAX_OVERLAYS} images are allowed"
                    )));
                }
                form.images.push(uploads.save_field(field).await?);
            }
            other => warn!("Ignoring unexpected reel form field '{other}'"),
        }
    }
    Ok(())
}

async fn create_reel(
    State(state): State<AppState>,
    ClientAddr(client): ClientAddr,
    Multipart(mut multipart): Multipart,
) -> ApiResult<(StatusCode, Json<Reel>)> {
    if !state.reel_limiter.check(&client) {
        warn!("Reel upload rate limit hit by {client}");
        return Err(ApiError::TooManyRequests(state.reel_limiter.message()));
    }

    let mut form = ReelForm::default();
    let created = match read_form(state.uploads.as_ref(), &mut multipart, &mut form).await {
        Ok(()) => match form.to_create() {
            Ok(data) => state.reels.create(data).await,
            Err(e) => Err(e),
        },
        Err(e) => Err(e),
    };

    match created {
        Ok(reel) => {
            info!(
                "Created reel {} for user {} with {} image(s)",
                reel.id,
                reel.user_id,
                reel.images.len()
            );
            Ok((StatusCode::CREATED, Json(reel)))
        }
        Err(e) => {
            state.uploads.remove(&form.files()).await;
            Err(e)
        }
    }
}

async fn get_reel(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Reel>> {
    Ok(Json(find_reel(&state, id).await?))
}

/// Rejects replacement paths that are not files held by the upload storage.
async fn check_stored(state: &AppState, data: &ReelUpdate) -> ApiResult<()> {
    let fields = [("file", data.file.as_ref()), ("audio", data.audio.as_ref())];
    let singles = fields
        .into_iter()
        .filter_map(|(name, key)| key.map(|key| (name, key)));
    let images = data
        .images
        .iter()
        .flatten()
        .map(|key| ("images", key));

    for (name, key) in singles.chain(images) {
        if !state.uploads.contains(key).await {
            return Err(ApiError::unprocessable(format!(
                "{name} must reference an uploaded file"
            )));
        }
    }
    Ok(())
}

async fn update_reel(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(data): Json<ReelUpdate>,
) -> ApiResult<Json<Reel>> {
    if data.images.as_ref().is_some_and(|images| images.len() > MAX_OVERLAYS) {
        return Err(ApiError::unprocessable(format!(
            "at most {MAX_OVERLAYS} images are allowed"
        )));
    }
    check_stored(&state, &data).await?;

    state
        .reels
        .update(id, data)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(REEL_NOT_FOUND))
}

/// Forgets the reel's render and removes its uploads and rendered output.
/// Only files inside the upload and output directories are touched.
pub async fn remove_reel_files(state: &AppState, reel: &Reel) {
    state.renderer.forget(reel.id);
    state.uploads.remove(&reel.input_files()).await;

    let mut outputs = vec![state.renderer.output_path(reel.id)];
    if let Some(output) = &reel.output {
        let output = std::path::Path::new(output);
        if is_within(state.renderer.output_dir(), output).await {
            outputs.push(output.to_path_buf());
        }
    }
    remove_files(outputs).await;
}

async fn delete_reel(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<StatusCode> {
    if state.renderer.is_rendering(id) {
        return Err(ApiError::Conflict(RENDER_IN_PROGRESS.to_string()));
    }

    let reel = state
        .reels
        .delete(id)
        .await?
        .ok_or_else(|| ApiError::not_found(REEL_NOT_FOUND))?;

    remove_reel_files(&state, &reel).await;

    info!("Deleted reel {id}");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Default, Deserialize)]
struct RenderParams {
    scale: Option<f32>,
}

async fn start_render(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<RenderParams>,
) -> ApiResult<(StatusCode, Json<RenderStatus>)> {
    let reel = find_reel(&state, id).await?;
    let status = state.renderer.submit(&reel, params.scale, state.reels.clone())?;
    info!("Queued render of reel {id}");
    Ok((StatusCode::ACCEPTED, Json(status)))
}

/// Live status of the latest render. Renders finished before a restart are
/// reported from the stored output path.
async fn render_status(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<RenderStatus>> {
    if let Some(status) = state.renderer.status(id) {
        return Ok(Json(status));
    }

    let reel = find_reel(&state, id).await?;
    match reel.output {
        Some(output) => Ok(Json(RenderStatus {
            reel_id: id,
            state: RenderState::Completed,
            frames_done: 0,
            frames_total: None,
            output: Some(output),
            error: None,
        })),
        None => Err(ApiError::not_found(NOT_RENDERED)),
    }
}

async fn download_output(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Response> {
    let reel = find_reel(&state, id).await?;
    let output = reel.output.ok_or_else(|| ApiError::not_found(NOT_RENDERED))?;

    let file = match tokio::fs::File::open(&output).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("Rendered file for reel {id} is missing: {output}");
            return Err(ApiError::not_found(NOT_RENDERED));
        }
        Err(e) => return Err(e.into()),
    };
    let len = file.metadata().await?.len();

    Ok((
        [
            (header::CONTENT_TYPE, "video/mp4".to_string()),
            (header::CONTENT_LENGTH, len.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"{id}.mp4\""),
            ),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}
