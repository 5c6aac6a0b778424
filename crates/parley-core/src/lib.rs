//! Conversation membership and messaging engine.
//!
//! The engine is stateless between calls: every operation is a short
//! sequence of document-store round trips. Single-document writes are atomic;
//! multi-document sequences are not, so read paths tolerate the partial state
//! a failed sequence can leave behind.

pub mod error;
pub mod ledger;
pub mod poster;
pub mod read_state;
pub mod registry;
pub mod router;

#[cfg(test)]
mod testing;

use parley_types::store::{Document, DocumentStore, Fields, IdentityResolver, ListQuery, StoreError};
use serde_json::Value;
use sha2::{Digest, Sha256};

pub use error::ChatError;
pub use registry::Created;

/// Page size for every store listing the engine performs.
pub const PAGE_SIZE: u32 = 100;

pub struct Engine<S, R> {
    store: S,
    resolver: R,
}

impl<S: DocumentStore, R: IdentityResolver> Engine<S, R> {
    pub fn new(store: S, resolver: R) -> Self {
        Self { store, resolver }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Page through a listing until every match has been collected.
    fn list_all(&self, collection: &str, query: ListQuery) -> Result<Vec<Document>, StoreError> {
        let mut query = ListQuery { limit: PAGE_SIZE, offset: 0, ..query };
        let mut out = Vec::new();

        loop {
            let page = self.store.list(collection, &query)?;
            let fetched = page.documents.len() as u32;
            out.extend(page.documents);

            if fetched == 0 || out.len() as u64 >= page.total {
                return Ok(out);
            }
            query.offset += fetched;
        }
    }
}

/// Deterministic document key: `prefix` + first 128 bits of SHA-256 over
/// the length-prefixed parts, so no two distinct part lists share a key.
fn derived_key(prefix: &str, parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.len().to_string().as_bytes());
        hasher.update(b":");
        hasher.update(part.as_bytes());
    }
    format!("{}{}", prefix, hex::encode(&hasher.finalize()[..16]))
}

/// Unwrap a `json!` object literal into document fields.
fn fields(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        _ => Fields::new(),
    }
}
