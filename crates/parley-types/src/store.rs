//! Contracts for the two external collaborators: the document store and the
//! identity resolver. Implementations live outside the engine.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::models::{UserId, UserProfile};
use crate::permissions::PermissionGrant;

pub type Fields = Map<String, Value>;

/// Field name that addresses the document id in filters.
pub const ID_FIELD: &str = "$id";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    #[error("document already exists: {collection}/{id}")]
    Conflict { collection: String, id: String },

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("malformed document: {0}")]
    Malformed(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub collection: String,
    pub fields: Fields,
    pub permissions: Vec<PermissionGrant>,
    pub created_at: DateTime<Utc>,
}

impl Document {
    /// Decode into a typed record, injecting the document id as `id`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        let mut fields = self.fields.clone();
        fields.insert("id".into(), Value::String(self.id.clone()));
        serde_json::from_value(Value::Object(fields))
            .map_err(|e| StoreError::Malformed(format!("{}/{}: {}", self.collection, self.id, e)))
    }
}

/// Encode a typed record as document fields. The `id` key is dropped since
/// ids live beside the fields, not inside them.
pub fn encode<T: Serialize>(record: &T) -> Result<Fields, StoreError> {
    match serde_json::to_value(record) {
        Ok(Value::Object(mut fields)) => {
            fields.remove("id");
            Ok(fields)
        }
        Ok(other) => Err(StoreError::Malformed(format!("expected an object, got {}", other))),
        Err(e) => Err(StoreError::Malformed(e.to_string())),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Equal(String, Value),
    NotEqual(String, Value),
    In(String, Vec<Value>),
}

impl Filter {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self::Equal(field.to_string(), value.into())
    }

    pub fn ne(field: &str, value: impl Into<Value>) -> Self {
        Self::NotEqual(field.to_string(), value.into())
    }

    pub fn any_of<V: Into<Value>>(field: &str, values: impl IntoIterator<Item = V>) -> Self {
        Self::In(field.to_string(), values.into_iter().map(Into::into).collect())
    }
}

/// Ordering by insertion sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Order {
    #[default]
    OldestFirst,
    NewestFirst,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListQuery {
    pub filters: Vec<Filter>,
    pub order: Order,
    pub limit: u32,
    pub offset: u32,
}

impl ListQuery {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            ..Default::default()
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order(mut self, order: Order) -> Self {
        self.order = order;
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub documents: Vec<Document>,
    /// Count of all matching documents, ignoring limit and offset.
    pub total: u64,
}

/// A document database with per-document atomic writes and no cross-document
/// transactions.
pub trait DocumentStore: Send + Sync {
    /// `id = None` lets the store assign one. `Some(id)` is create-if-absent:
    /// an existing document with that id yields `StoreError::Conflict`.
    fn create(
        &self,
        collection: &str,
        id: Option<&str>,
        fields: Fields,
        permissions: &[PermissionGrant],
    ) -> Result<Document, StoreError>;

    fn get(&self, collection: &str, id: &str) -> Result<Document, StoreError>;

    fn list(&self, collection: &str, query: &ListQuery) -> Result<Page, StoreError>;

    /// Shallow merge of `fields` into the stored document.
    fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<Document, StoreError>;
}

/// Maps emails to stable user ids, and ids back to display profiles.
pub trait IdentityResolver: Send + Sync {
    fn resolve_by_email(&self, email: &str) -> Result<Option<UserId>, StoreError>;

    fn profile(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError>;
}

impl<T: DocumentStore + ?Sized> DocumentStore for Arc<T> {
    fn create(
        &self,
        collection: &str,
        id: Option<&str>,
        fields: Fields,
        permissions: &[PermissionGrant],
    ) -> Result<Document, StoreError> {
        (**self).create(collection, id, fields, permissions)
    }

    fn get(&self, collection: &str, id: &str) -> Result<Document, StoreError> {
        (**self).get(collection, id)
    }

    fn list(&self, collection: &str, query: &ListQuery) -> Result<Page, StoreError> {
        (**self).list(collection, query)
    }

    fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<Document, StoreError> {
        (**self).update(collection, id, fields)
    }
}

impl<T: IdentityResolver + ?Sized> IdentityResolver for Arc<T> {
    fn resolve_by_email(&self, email: &str) -> Result<Option<UserId>, StoreError> {
        (**self).resolve_by_email(email)
    }

    fn profile(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError> {
        (**self).profile(user_id)
    }
}
