use axum::{Json, Router, extract::State, routing::get};
use serde_json::{Value, json};

use crate::db::blocking;
use crate::error::ApiResult;
use crate::state::AppState;

pub mod auth;
pub mod reels;
pub mod users;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .merge(users::router())
        .merge(reels::router())
        .merge(auth::router())
}

async fn index() -> Json<Value> {
    Json(json!({ "Hello": "World" }))
}

async fn health(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    blocking(&state.pool, |conn| {
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    })
    .await?;

    Ok(Json(json!({ "status": "ok" })))
}
