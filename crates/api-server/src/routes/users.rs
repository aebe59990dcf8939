use axum::{Router, extract::State, http::StatusCode, routing::get};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::extractors::{Json, Path};
use crate::models::{Reel, User, UserCreate, UserUpdate};
use crate::routes::reels::{RENDER_IN_PROGRESS, remove_reel_files};
use crate::services::users::USER_NOT_FOUND;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users).post(create_user))
        .route(
            "/users/{id}",
            get(get_user).patch(update_user).delete(delete_user),
        )
        .route("/users/{id}/reels", get(user_reels))
}

async fn list_users(State(state): State<AppState>) -> ApiResult<Json<Vec<User>>> {
    Ok(Json(state.users.find_all().await?))
}

async fn create_user(
    State(state): State<AppState>,
    Json(data): Json<UserCreate>,
) -> ApiResult<(StatusCode, Json<User>)> {
    let user = state.users.create(data).await?;
    tracing::info!("Created user {}", user.id);
    Ok((StatusCode::CREATED, Json(user)))
}

async fn get_user(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<User>> {
    state
        .users
        .find_by_id(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(USER_NOT_FOUND))
}

async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(data): Json<UserUpdate>,
) -> ApiResult<Json<User>> {
    state
        .users
        .update(id, data)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(USER_NOT_FOUND))
}

/// Deleting a user removes their reels and the files those reels own. Refused
/// while one of the reels is being rendered.
async fn delete_user(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<StatusCode> {
    let reels = state
        .users
        .reels(id)
        .await?
        .ok_or_else(|| ApiError::not_found(USER_NOT_FOUND))?;

    if reels.iter().any(|reel| state.renderer.is_rendering(reel.id)) {
        return Err(ApiError::Conflict(RENDER_IN_PROGRESS.to_string()));
    }

    if !state.users.delete(id).await? {
        return Err(ApiError::not_found(USER_NOT_FOUND));
    }

    for reel in &reels {
        remove_reel_files(&state, reel).await;
    }

    tracing::info!("Deleted user {id} with {} reel(s)", reels.len());
    Ok(StatusCode::NO_CONTENT)
}

async fn user_reels(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Vec<Reel>>> {
    state
        .users
        .reels(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(USER_NOT_FOUND))
}
