use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Row, types::Type, types::Value};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::repository::{Fields, Record};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

impl Record for User {
    const TABLE: &'static str = "users";
    const COLUMNS: &'static [&'static str] = &["id", "name", "email"];

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: uuid_column(row, 0)?,
            name: row.get(1)?,
            email: row.get(2)?,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserCreate {
    pub name: String,
    pub email: String,
}

impl UserCreate {
    pub fn into_fields(self) -> ApiResult<Fields> {
        Ok(vec![
            ("name", Value::Text(required("name", self.name)?)),
            ("email", Value::Text(required("email", self.email)?)),
        ])
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
}

impl UserUpdate {
    pub fn into_fields(self) -> ApiResult<Fields> {
        let mut fields = Fields::new();
        if let Some(name) = self.name {
            fields.push(("name", Value::Text(required("name", name)?)));
        }
        if let Some(email) = self.email {
            fields.push(("email", Value::Text(required("email", email)?)));
        }
        Ok(fields)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reel {
    pub id: Uuid,
    pub title: String,
    pub file: String,
    pub audio: String,
    pub images: Vec<String>,
    pub output: Option<String>,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Reel {
    /// The uploaded inputs of this reel: video, audio and images.
    pub fn input_files(&self) -> Vec<String> {
        let mut files = vec![self.file.clone(), self.audio.clone()];
        files.extend(self.images.iter().cloned());
        files
    }
}

impl Record for Reel {
    const TABLE: &'static str = "reels";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "title",
        "file",
        "audio",
        "images",
        "output",
        "user_id",
        "created_at",
    ];

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let images: String = row.get(4)?;
        let images = serde_json::from_str(&images)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;

        let created_at: String = row.get(7)?;
        let created_at = DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?
            .with_timezone(&Utc);

        Ok(Self {
            id: uuid_column(row, 0)?,
            title: row.get(1)?,
            file: row.get(2)?,
            audio: row.get(3)?,
            images,
            output: row.get(5)?,
            user_id: uuid_column(row, 6)?,
            created_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ReelCreate {
    pub title: String,
    pub file: String,
    pub audio: String,
    pub images: Vec<String>,
    pub user_id: Uuid,
}

impl ReelCreate {
    pub fn into_fields(self) -> ApiResult<Fields> {
        Ok(vec![
            ("title", Value::Text(required("title", self.title)?)),
            ("file", Value::Text(self.file)),
            ("audio", Value::Text(self.audio)),
            ("images", images_value(&self.images)?),
            ("user_id", Value::Text(self.user_id.to_string())),
            ("created_at", Value::Text(timestamp(Utc::now()))),
        ])
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReelUpdate {
    pub title: Option<String>,
    pub file: Option<String>,
    pub audio: Option<String>,
    pub images: Option<Vec<String>>,
}

impl ReelUpdate {
    pub fn into_fields(self) -> ApiResult<Fields> {
        let mut fields = Fields::new();
        if let Some(title) = self.title {
            fields.push(("title", Value::Text(required("title", title)?)));
        }
        if let Some(file) = self.file {
            fields.push(("file", Value::Text(file)));
        }
        if let Some(audio) = self.audio {
            fields.push(("audio", Value::Text(audio)));
        }
        if let Some(images) = self.images {
            fields.push(("images", images_value(&images)?));
        }
        Ok(fields)
    }
}

fn uuid_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn required(field: &str, value: String) -> ApiResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ApiError::unprocessable(format!("{field} must not be empty")));
    }
    Ok(trimmed.to_string())
}

fn images_value(images: &[String]) -> ApiResult<Value> {
    let json = serde_json::to_string(images).map_err(anyhow::Error::from)?;
    Ok(Value::Text(json))
}

pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn blank_fields_are_rejected() {
        let err = UserCreate {
            name: "  ".into(),
            email: "a@b.c".into(),
        }
        .into_fields()
        .unwrap_err();
        assert_eq!(err.to_string(), "name must not be empty");
        assert_eq!(err.status(), axum::http::StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn partial_updates_only_carry_given_fields() {
        let fields = UserUpdate {
            name: None,
            email: Some("new@example.com".into()),
        }
        .into_fields()
        .unwrap();
        assert_eq!(fields, vec![("email", Value::Text("new@example.com".into()))]);

        assert!(ReelUpdate::default().into_fields().unwrap().is_empty());
    }

    #[test]
    fn reel_images_are_stored_as_json() {
        let fields = ReelUpdate {
            images: Some(vec!["a.png".into(), "b.png".into()]),
            ..Default::default()
        }
        .into_fields()
        .unwrap();
        assert_eq!(fields, vec![("images", Value::Text(r#"["a.png","b.png"]"#.into()))]);
    }

    #[test]
    fn input_files_leave_out_the_render() {
        let reel = Reel {
            id: Uuid::new_v4(),
            title: "t".into(),
            file: "v.mp4".into(),
            audio: "a.mp3".into(),
            images: vec!["i.png".into()],
            output: Some("out.mp4".into()),
            user_id: Uuid::new_v4(),
            created_at: Utc::now(),
        };
        assert_eq!(reel.input_files(), vec!["v.mp4", "a.mp3", "i.png"]);
    }
}
