use rusqlite::types::Value;
use uuid::Uuid;

use crate::db::{DbPool, blocking};
use crate::error::{ApiError, ApiResult};
use crate::models::{Reel, User, UserCreate, UserUpdate};
use crate::repository::Repository;

pub const INVALID_USER: &str = "Invalid User data.";
pub const USER_NOT_FOUND: &str = "User not found.";

const USERS: Repository<User> = Repository::new();
const REELS: Repository<Reel> = Repository::new();

#[derive(Clone)]
pub struct UserService {
    pool: DbPool,
}

impl UserService {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn find_all(&self) -> ApiResult<Vec<User>> {
        blocking(&self.pool, |conn| USERS.find_all(conn)).await
    }

    pub async fn find_by_id(&self, id: Uuid) -> ApiResult<Option<User>> {
        blocking(&self.pool, move |conn| USERS.find_by_id(conn, &id.to_string())).await
    }

    pub async fn find_by_email(&self, email: &str) -> ApiResult<Option<User>> {
        let email = Value::Text(email.to_string());
        blocking(&self.pool, move |conn| USERS.find_one(conn, vec![("email", email)])).await
    }

    pub async fn create(&self, data: UserCreate) -> ApiResult<User> {
        let fields = data.into_fields()?;
        blocking(&self.pool, move |conn| USERS.create(conn, fields))
            .await
            .map_err(invalid_user)
    }

    pub async fn update(&self, id: Uuid, data: UserUpdate) -> ApiResult<Option<User>> {
        let fields = data.into_fields()?;
        blocking(&self.pool, move |conn| USERS.update(conn, &id.to_string(), fields))
            .await
            .map_err(invalid_user)
    }

    /// Removes the user; their reels go with them through the foreign key.
    pub async fn delete(&self, id: Uuid) -> ApiResult<bool> {
        blocking(&self.pool, move |conn| USERS.delete(conn, &id.to_string())).await
    }

    /// `None` when the user does not exist.
    pub async fn reels(&self, id: Uuid) -> ApiResult<Option<Vec<Reel>>> {
        blocking(&self.pool, move |conn| {
            let id = id.to_string();
            if USERS.find_by_id(conn, &id)?.is_none() {
                return Ok(None);
            }
            REELS.find_where(conn, "user_id", Value::Text(id)).map(Some)
        })
        .await
    }
}

fn invalid_user(err: ApiError) -> ApiError {
    if err.is_constraint_violation() {
        ApiError::bad_request(INVALID_USER)
    } else {
        err
    }
}
