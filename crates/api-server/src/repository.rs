use std::marker::PhantomData;

use rusqlite::{Connection, OptionalExtension, Row, params_from_iter, types::Value};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};

/// Column/value pairs handed to the repository. Keys must be columns of the
/// record's table.
pub type Fields = Vec<(&'static str, Value)>;

/// A row type stored in its own table with a TEXT `id` primary key.
pub trait Record: Sized + Send + 'static {
    const TABLE: &'static str;
    /// Every column of the table, `id` included, in the order `from_row` reads them.
    const COLUMNS: &'static [&'static str];

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

/// Generic create/read/update/delete over one [`Record`] table.
///
/// Column names are checked against [`Record::COLUMNS`] before they are
/// spliced into SQL; values always travel as bound parameters.
pub struct Repository<T> {
    _record: PhantomData<fn() -> T>,
}

impl<T: Record> Default for Repository<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Repository<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Repository<T> {}

impl<T: Record> Repository<T> {
    pub const fn new() -> Self {
        Self {
            _record: PhantomData,
        }
    }

    fn check_columns<'a>(&self, keys: impl IntoIterator<Item = &'a str>) -> ApiResult<()> {
        for key in keys {
            if !T::COLUMNS.iter().any(|column| *column == key) {
                return Err(ApiError::bad_request(format!(
                    "Invalid attribute {key} for {}",
                    T::TABLE
                )));
            }
        }
        Ok(())
    }

    fn select_sql(where_clause: &str) -> String {
        format!(
            "SELECT {} FROM {}{where_clause} ORDER BY rowid",
            T::COLUMNS.join(", "),
            T::TABLE
        )
    }

    fn query(&self, conn: &Connection, where_clause: &str, values: Vec<Value>) -> ApiResult<Vec<T>> {
        let mut stmt = conn.prepare(&Self::select_sql(where_clause))?;
        let rows = stmt.query_map(params_from_iter(values), T::from_row)?;
        let items = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    /// Inserts a row, generating a UUID v4 `id` when none is given, and
    /// returns it as stored.
    pub fn create(&self, conn: &Connection, mut fields: Fields) -> ApiResult<T> {
        self.check_columns(fields.iter().map(|(k, _)| *k))?;

        let id = match fields.iter().find(|(k, _)| *k == "id") {
            Some((_, Value::Text(id))) => id.clone(),
            Some(_) => return Err(ApiError::bad_request("id must be text")),
            None => {
                let id = Uuid::new_v4().to_string();
                fields.push(("id", Value::Text(id.clone())));
                id
            }
        };

        let columns = fields.iter().map(|(k, _)| *k).collect::<Vec<_>>().join(", ");
        let placeholders = vec!["?"; fields.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({columns}) VALUES ({placeholders})",
            T::TABLE
        );
        conn.execute(&sql, params_from_iter(fields.into_iter().map(|(_, v)| v)))?;

        self.find_by_id(conn, &id)?.ok_or_else(|| {
            ApiError::Internal(anyhow::anyhow!("{} row {id} missing after insert", T::TABLE))
        })
    }

    pub fn find_by_id(&self, conn: &Connection, id: &str) -> ApiResult<Option<T>> {
        let sql = Self::select_sql(" WHERE id = ?1");
        let found = conn.query_row(&sql, [id], T::from_row).optional()?;
        Ok(found)
    }

    /// First row (in insertion order) matching every filter.
    pub fn find_one(&self, conn: &Connection, filters: Fields) -> ApiResult<Option<T>> {
        self.check_columns(filters.iter().map(|(k, _)| *k))?;

        let where_clause = if filters.is_empty() {
            String::new()
        } else {
            let conditions = filters
                .iter()
                .map(|(k, _)| format!("{k} = ?"))
                .collect::<Vec<_>>()
                .join(" AND ");
            format!(" WHERE {conditions}")
        };
        let values = filters.into_iter().map(|(_, v)| v).collect();

        let found = self.query(conn, &where_clause, values)?;
        Ok(found.into_iter().next())
    }

    pub fn find_where(&self, conn: &Connection, column: &'static str, value: Value) -> ApiResult<Vec<T>> {
        self.check_columns([column])?;
        self.query(conn, &format!(" WHERE {column} = ?"), vec![value])
    }

    pub fn find_all(&self, conn: &Connection) -> ApiResult<Vec<T>> {
        self.query(conn, "", Vec::new())
    }

    /// Applies `fields` to the row with `id`. `None` when no such row exists;
    /// an empty field set just reads the row back.
    pub fn update(&self, conn: &Connection, id: &str, fields: Fields) -> ApiResult<Option<T>> {
        self.check_columns(fields.iter().map(|(k, _)| *k))?;
        if fields.iter().any(|(k, _)| *k == "id") {
            return Err(ApiError::bad_request("id cannot be changed"));
        }
        if fields.is_empty() {
            return self.find_by_id(conn, id);
        }

        let assignments = fields
            .iter()
            .map(|(k, _)| format!("{k} = ?"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("UPDATE {} SET {assignments} WHERE id = ?", T::TABLE);
        let values = fields
            .into_iter()
            .map(|(_, v)| v)
            .chain(std::iter::once(Value::Text(id.to_string())));

        let changed = conn.execute(&sql, params_from_iter(values))?;
        if changed == 0 {
            return Ok(None);
        }
        self.find_by_id(conn, id)
    }

    pub fn delete(&self, conn: &Connection, id: &str) -> ApiResult<bool> {
        let sql = format!("DELETE FROM {} WHERE id = ?1", T::TABLE);
        Ok(conn.execute(&sql, [id])? > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Debug, PartialEq)]
    struct Note {
        id: String,
        body: String,
        tag: Option<String>,
    }

    impl Record for Note {
        const TABLE: &'static str = "notes";
        const COLUMNS: &'static [&'static str] = &["id", "body", "tag"];

        fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
            Ok(Self {
                id: row.get(0)?,
                body: row.get(1)?,
                tag: row.get(2)?,
            })
        }
    }

    const NOTES: Repository<Note> = Repository::new();

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE notes (id TEXT PRIMARY KEY NOT NULL, body TEXT NOT NULL UNIQUE, tag TEXT);",
        )
        .unwrap();
        conn
    }

    fn text(s: &str) -> Value {
        Value::Text(s.to_string())
    }

    #[test]
    fn create_generates_uuid_ids() {
        let conn = conn();
        let note = NOTES.create(&conn, vec![("body", text("hello"))]).unwrap();
        assert!(Uuid::parse_str(&note.id).is_ok());
        assert_eq!(note.body, "hello");
        assert_eq!(note.tag, None);
    }

    #[test]
    fn create_keeps_given_id() {
        let conn = conn();
        let note = NOTES
            .create(&conn, vec![("id", text("fixed")), ("body", text("b"))])
            .unwrap();
        assert_eq!(note.id, "fixed");
        assert_eq!(NOTES.find_by_id(&conn, "fixed").unwrap(), Some(note));
    }

    #[test]
    fn create_surfaces_constraint_violations() {
        let conn = conn();
        NOTES.create(&conn, vec![("body", text("same"))]).unwrap();
        let err = NOTES.create(&conn, vec![("body", text("same"))]).unwrap_err();
        assert!(err.is_constraint_violation());
    }

    #[test]
    fn unknown_columns_are_rejected() {
        let conn = conn();
        let err = NOTES.find_one(&conn, vec![("nope", text("x"))]).unwrap_err();
        assert_eq!(err.to_string(), "Invalid attribute nope for notes");
        assert!(NOTES.create(&conn, vec![("body; DROP TABLE notes", text("x"))]).is_err());
    }

    #[test]
    fn find_one_and_where_filter_in_insertion_order() {
        let conn = conn();
        let a = NOTES.create(&conn, vec![("body", text("a")), ("tag", text("t"))]).unwrap();
        let b = NOTES.create(&conn, vec![("body", text("b")), ("tag", text("t"))]).unwrap();
        NOTES.create(&conn, vec![("body", text("c"))]).unwrap();

        let first = NOTES.find_one(&conn, vec![("tag", text("t"))]).unwrap();
        assert_eq!(first.map(|n| n.id), Some(a.id.clone()));

        let both = NOTES.find_one(&conn, vec![("tag", text("t")), ("body", text("b"))]).unwrap();
        assert_eq!(both.map(|n| n.id), Some(b.id.clone()));

        let tagged = NOTES.find_where(&conn, "tag", text("t")).unwrap();
        assert_eq!(tagged.iter().map(|n| n.body.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);

        assert_eq!(NOTES.find_all(&conn).unwrap().len(), 3);
        assert_eq!(NOTES.find_one(&conn, vec![("body", text("zzz"))]).unwrap(), None);
    }

    #[test]
    fn update_changes_only_given_fields() {
        let conn = conn();
        let note = NOTES.create(&conn, vec![("body", text("a")), ("tag", text("t"))]).unwrap();

        let updated = NOTES
            .update(&conn, &note.id, vec![("tag", Value::Null)])
            .unwrap()
            .unwrap();
        assert_eq!(updated.body, "a");
        assert_eq!(updated.tag, None);

        let unchanged = NOTES.update(&conn, &note.id, Vec::new()).unwrap();
        assert_eq!(unchanged, Some(updated));

        assert_eq!(NOTES.update(&conn, "missing", vec![("body", text("x"))]).unwrap(), None);
        assert!(NOTES.update(&conn, &note.id, vec![("id", text("other"))]).is_err());
    }

    #[test]
    fn delete_reports_whether_a_row_went_away() {
        let conn = conn();
        let note = NOTES.create(&conn, vec![("body", text("a"))]).unwrap();
        assert!(NOTES.delete(&conn, &note.id).unwrap());
        assert!(!NOTES.delete(&conn, &note.id).unwrap());
        assert_eq!(NOTES.find_by_id(&conn, &note.id).unwrap(), None);
    }
}
