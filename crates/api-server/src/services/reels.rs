use rusqlite::types::Value;
use uuid::Uuid;

use crate::db::{DbPool, blocking};
use crate::error::{ApiError, ApiResult};
use crate::models::{Reel, ReelCreate, ReelUpdate};
use crate::repository::Repository;

pub const INVALID_REEL: &str = "Invalid reel data.";
pub const REEL_NOT_FOUND: &str = "Reel not found.";

const REELS: Repository<Reel> = Repository::new();

#[derive(Clone)]
pub struct ReelService {
    pool: DbPool,
}

impl ReelService {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn find_all(&self) -> ApiResult<Vec<Reel>> {
        blocking(&self.pool, |conn| REELS.find_all(conn)).await
    }

    pub async fn find_by_id(&self, id: Uuid) -> ApiResult<Option<Reel>> {
        blocking(&self.pool, move |conn| REELS.find_by_id(conn, &id.to_string())).await
    }

    pub async fn find_by_user(&self, user_id: Uuid) -> ApiResult<Vec<Reel>> {
        blocking(&self.pool, move |conn| {
            REELS.find_where(conn, "user_id", Value::Text(user_id.to_string()))
        })
        .await
    }

    /// Fails with "Invalid reel data." when the owner does not exist.
    pub async fn create(&self, data: ReelCreate) -> ApiResult<Reel> {
        let fields = data.into_fields()?;
        blocking(&self.pool, move |conn| REELS.create(conn, fields))
            .await
            .map_err(invalid_reel)
    }

    pub async fn update(&self, id: Uuid, data: ReelUpdate) -> ApiResult<Option<Reel>> {
        let fields = data.into_fields()?;
        blocking(&self.pool, move |conn| REELS.update(conn, &id.to_string(), fields))
            .await
            .map_err(invalid_reel)
    }

    pub async fn set_output(&self, id: Uuid, output: String) -> ApiResult<Option<Reel>> {
        blocking(&self.pool, move |conn| {
            REELS.update(conn, &id.to_string(), vec![("output", Value::Text(output))])
        })
        .await
    }

    /// Deletes the row and hands it back so the caller can clean up its files.
    pub async fn delete(&self, id: Uuid) -> ApiResult<Option<Reel>> {
        blocking(&self.pool, move |conn| {
            let id = id.to_string();
            let Some(reel) = REELS.find_by_id(conn, &id)? else {
                return Ok(None);
            };
            REELS.delete(conn, &id)?;
            Ok(Some(reel))
        })
        .await
    }
}

fn invalid_reel(err: ApiError) -> ApiError {
    if err.is_constraint_violation() {
        ApiError::bad_request(INVALID_REEL)
    } else {
        err
    }
}
