use crate::Database;
use crate::models::{DocumentRow, UserRow};
use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use parley_types::store::{Filter, ID_FIELD, Order};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, Row, params_from_iter};
use serde_json::Value;
use uuid::Uuid;

/// A compiled `WHERE` fragment and its positional parameters.
pub struct Predicate {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

const DOCUMENT_COLUMNS: &str = "seq, collection, id, fields, permissions, created_at";

impl Database {
    // -- Documents --

    /// Insert a document. Returns `None` when `(collection, id)` is taken.
    pub fn insert_document(
        &self,
        collection: &str,
        id: Option<&str>,
        fields: &str,
        permissions: &str,
    ) -> Result<Option<DocumentRow>> {
        let id = id.map(str::to_string).unwrap_or_else(|| Uuid::new_v4().simple().to_string());
        let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);

        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO documents (collection, id, fields, permissions, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                (collection, &id, fields, permissions, &created_at),
            )?;
            if inserted == 0 {
                return Ok(None);
            }
            query_document(conn, collection, &id)
        })
    }

    pub fn get_document(&self, collection: &str, id: &str) -> Result<Option<DocumentRow>> {
        self.with_conn(|conn| query_document(conn, collection, id))
    }

    /// Merge `patch` (a JSON object) into the stored fields. Returns `None`
    /// when the document does not exist.
    pub fn patch_document(&self, collection: &str, id: &str, patch: &str) -> Result<Option<DocumentRow>> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE documents SET fields = json_patch(fields, ?3) WHERE collection = ?1 AND id = ?2",
                (collection, id, patch),
            )?;
            if updated == 0 {
                return Ok(None);
            }
            query_document(conn, collection, id)
        })
    }

    /// One page of matching documents plus the total match count.
    pub fn list_documents(
        &self,
        collection: &str,
        predicate: &Predicate,
        order: Order,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<DocumentRow>, u64)> {
        self.with_conn(|conn| {
            let mut params = vec![SqlValue::Text(collection.to_string())];
            params.extend(predicate.params.iter().cloned());

            let total: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM documents WHERE collection = ?1{}", predicate.sql),
                params_from_iter(params.iter()),
                |row| row.get(0),
            )?;

            let direction = match order {
                Order::OldestFirst => "ASC",
                Order::NewestFirst => "DESC",
            };
            let sql = format!(
                "SELECT {} FROM documents WHERE collection = ?1{} ORDER BY seq {} LIMIT {} OFFSET {}",
                DOCUMENT_COLUMNS, predicate.sql, direction, limit, offset
            );

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(params.iter()), map_document)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok((rows, total.max(0) as u64))
        })
    }

    // -- Users --

    pub fn upsert_user(&self, id: &str, email: &str, name: Option<&str>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, email, name) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET email = excluded.email, name = excluded.name",
                (id, email.trim(), name),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id, email, name, created_at FROM users WHERE email = ?1")?;
            let row = stmt.query_row([email.trim()], map_user).optional()?;
            Ok(row)
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id, email, name, created_at FROM users WHERE id = ?1")?;
            let row = stmt.query_row([id], map_user).optional()?;
            Ok(row)
        })
    }
}

/// Compile filters into an `AND`-joined fragment whose parameters start at
/// `?2` (`?1` is the collection).
pub fn compile_filters(filters: &[Filter]) -> std::result::Result<Predicate, String> {
    let mut sql = String::new();
    let mut params = Vec::new();

    for filter in filters {
        match filter {
            Filter::Equal(field, value) => {
                params.push(to_sql(value));
                sql.push_str(&format!(" AND {} IS ?{}", field_expr(field)?, params.len() + 1));
            }
            Filter::NotEqual(field, value) => {
                params.push(to_sql(value));
                sql.push_str(&format!(" AND {} IS NOT ?{}", field_expr(field)?, params.len() + 1));
            }
            Filter::In(field, values) => {
                let expr = field_expr(field)?;
                if values.is_empty() {
                    sql.push_str(" AND 0");
                    continue;
                }
                let mut slots = Vec::with_capacity(values.len());
                for value in values {
                    params.push(to_sql(value));
                    slots.push(format!("?{}", params.len() + 1));
                }
                sql.push_str(&format!(" AND {} IN ({})", expr, slots.join(", ")));
            }
        }
    }

    Ok(Predicate { sql, params })
}

/// Field names are interpolated into SQL, so only plain identifiers pass.
fn field_expr(field: &str) -> std::result::Result<String, String> {
    if field == ID_FIELD {
        return Ok("id".to_string());
    }
    if field.is_empty() || !field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(format!("unsupported field name '{}'", field));
    }
    Ok(format!("json_extract(fields, '$.{}')", field))
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(*b as i64),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn query_document(conn: &Connection, collection: &str, id: &str) -> Result<Option<DocumentRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM documents WHERE collection = ?1 AND id = ?2",
        DOCUMENT_COLUMNS
    ))?;
    let row = stmt.query_row((collection, id), map_document).optional()?;
    Ok(row)
}

fn map_document(row: &Row<'_>) -> rusqlite::Result<DocumentRow> {
    Ok(DocumentRow {
        seq: row.get(0)?,
        collection: row.get(1)?,
        id: row.get(2)?,
        fields: row.get(3)?,
        permissions: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn map_user(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        created_at: row.get(3)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
