use chrono::{DateTime, Utc};
use parley_types::models::{UserId, UserProfile};
use parley_types::permissions::PermissionGrant;
use parley_types::store::{
    Document, DocumentStore, Fields, IdentityResolver, ListQuery, Page, StoreError,
};
use serde_json::Value;
use tracing::{debug, error};

use crate::Database;
use crate::models::DocumentRow;
use crate::queries::compile_filters;

impl DocumentStore for Database {
    fn create(
        &self,
        collection: &str,
        id: Option<&str>,
        fields: Fields,
        permissions: &[PermissionGrant],
    ) -> Result<Document, StoreError> {
        let fields = Value::Object(fields).to_string();
        let rendered: Vec<String> = permissions.iter().map(ToString::to_string).collect();
        let permissions = serde_json::to_string(&rendered).map_err(|e| StoreError::Malformed(e.to_string()))?;

        match self
            .insert_document(collection, id, &fields, &permissions)
            .map_err(unavailable)?
        {
            Some(row) => {
                debug!("Created {}/{}", row.collection, row.id);
                into_document(row)
            }
            None => Err(StoreError::Conflict {
                collection: collection.to_string(),
                id: id.unwrap_or_default().to_string(),
            }),
        }
    }

    fn get(&self, collection: &str, id: &str) -> Result<Document, StoreError> {
        self.get_document(collection, id)
            .map_err(unavailable)?
            .ok_or_else(|| not_found(collection, id))
            .and_then(into_document)
    }

    fn list(&self, collection: &str, query: &ListQuery) -> Result<Page, StoreError> {
        let predicate = compile_filters(&query.filters).map_err(StoreError::InvalidQuery)?;
        let (rows, total) = self
            .list_documents(collection, &predicate, query.order, query.limit, query.offset)
            .map_err(unavailable)?;

        let documents = rows.into_iter().map(into_document).collect::<Result<Vec<_>, _>>()?;
        Ok(Page { documents, total })
    }

    fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<Document, StoreError> {
        let patch = Value::Object(fields).to_string();
        self.patch_document(collection, id, &patch)
            .map_err(unavailable)?
            .ok_or_else(|| not_found(collection, id))
            .and_then(into_document)
    }
}

impl IdentityResolver for Database {
    fn resolve_by_email(&self, email: &str) -> Result<Option<UserId>, StoreError> {
        Ok(self.get_user_by_email(email).map_err(unavailable)?.map(|u| u.id))
    }

    fn profile(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError> {
        Ok(self.get_user_by_id(user_id).map_err(unavailable)?.map(|u| UserProfile {
            id: u.id,
            email: u.email,
            name: u.name,
        }))
    }
}

fn into_document(row: DocumentRow) -> Result<Document, StoreError> {
    let malformed = |what: &str, e: &dyn std::fmt::Display| {
        StoreError::Malformed(format!("{}/{} {}: {}", row.collection, row.id, what, e))
    };

    let fields = match serde_json::from_str::<Value>(&row.fields) {
        Ok(Value::Object(map)) => map,
        Ok(other) => return Err(malformed("fields", &format!("not an object: {}", other))),
        Err(e) => return Err(malformed("fields", &e)),
    };

    let rendered: Vec<String> = serde_json::from_str(&row.permissions).map_err(|e| malformed("permissions", &e))?;
    let permissions = rendered
        .iter()
        .map(|p| p.parse::<PermissionGrant>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| malformed("permissions", &e))?;

    let created_at = row
        .created_at
        .parse::<DateTime<Utc>>()
        .map_err(|e| malformed("created_at", &e))?;

    Ok(Document {
        id: row.id,
        collection: row.collection,
        fields,
        permissions,
        created_at,
    })
}

fn not_found(collection: &str, id: &str) -> StoreError {
    StoreError::NotFound {
        collection: collection.to_string(),
        id: id.to_string(),
    }
}

fn unavailable(e: anyhow::Error) -> StoreError {
    error!("Database error: {:#}", e);
    StoreError::Unavailable(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_types::permissions::Capability;
    use parley_types::store::{Filter, ID_FIELD, Order};
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn create_get_update_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        let perms = [PermissionGrant::user("alice", Capability::Read)];

        let doc = db
            .create("conversations", None, fields(json!({ "kind": "group", "title": "Team" })), &perms)
            .unwrap();
        assert_eq!(doc.id.len(), 32);
        assert_eq!(doc.permissions, perms);

        let updated = db
            .update("conversations", &doc.id, fields(json!({ "title": "Renamed", "lastMessageText": "hi" })))
            .unwrap();
        assert_eq!(updated.fields["kind"], json!("group"));
        assert_eq!(updated.fields["title"], json!("Renamed"));
        assert_eq!(updated.fields["lastMessageText"], json!("hi"));

        let fetched = db.get("conversations", &doc.id).unwrap();
        assert_eq!(fetched, updated);
    }

    #[test]
    fn create_with_explicit_id_is_create_if_absent() {
        let db = Database::open_in_memory().unwrap();
        db.create("conversations", Some("dm_1"), fields(json!({ "n": 1 })), &[]).unwrap();

        let err = db.create("conversations", Some("dm_1"), fields(json!({ "n": 2 })), &[]).unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
        assert_eq!(db.get("conversations", "dm_1").unwrap().fields["n"], json!(1));

        // Same id in another collection is unrelated
        db.create("messages", Some("dm_1"), fields(json!({})), &[]).unwrap();
    }

    #[test]
    fn missing_documents_are_not_found() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(db.get("messages", "nope"), Err(StoreError::NotFound { .. })));
        assert!(matches!(
            db.update("messages", "nope", fields(json!({ "a": 1 }))),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn list_filters_orders_and_pages() {
        let db = Database::open_in_memory().unwrap();
        for (conv, user) in [("c1", "alice"), ("c1", "bob"), ("c2", "alice"), ("c3", "carol")] {
            db.create(
                "memberships",
                None,
                fields(json!({ "conversationId": conv, "userId": user, "pinned": false })),
                &[],
            )
            .unwrap();
        }

        let page = db
            .list("memberships", &ListQuery::new(10).filter(Filter::eq("userId", "alice")))
            .unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.documents[0].fields["conversationId"], json!("c1"));

        let page = db
            .list(
                "memberships",
                &ListQuery::new(10)
                    .filter(Filter::eq("conversationId", "c1"))
                    .filter(Filter::ne("userId", "alice")),
            )
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.documents[0].fields["userId"], json!("bob"));

        let page = db
            .list("memberships", &ListQuery::new(10).filter(Filter::any_of("conversationId", ["c2", "c3"])))
            .unwrap();
        assert_eq!(page.total, 2);

        let page = db
            .list("memberships", &ListQuery::new(1).offset(1).order(Order::NewestFirst))
            .unwrap();
        assert_eq!(page.total, 4);
        assert_eq!(page.documents.len(), 1);
        assert_eq!(page.documents[0].fields["userId"], json!("alice"));
        assert_eq!(page.documents[0].fields["conversationId"], json!("c2"));

        let page = db
            .list("memberships", &ListQuery::new(10).filter(Filter::eq("pinned", false)))
            .unwrap();
        assert_eq!(page.total, 4);
    }

    #[test]
    fn list_by_document_id_and_empty_set() {
        let db = Database::open_in_memory().unwrap();
        let a = db.create("conversations", None, fields(json!({})), &[]).unwrap();
        db.create("conversations", None, fields(json!({})), &[]).unwrap();

        let page = db
            .list("conversations", &ListQuery::new(10).filter(Filter::any_of(ID_FIELD, [a.id.clone()])))
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.documents[0].id, a.id);

        let none: Vec<String> = vec![];
        let page = db
            .list("conversations", &ListQuery::new(10).filter(Filter::any_of(ID_FIELD, none)))
            .unwrap();
        assert_eq!(page.total, 0);
    }

    #[test]
    fn rejects_unsafe_field_names() {
        let db = Database::open_in_memory().unwrap();
        let err = db
            .list("messages", &ListQuery::new(1).filter(Filter::eq("x') OR 1=1 --", "y")))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidQuery(_)));
    }

    #[test]
    fn resolves_users_case_insensitively() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_user("u1", "Bob@X.com", Some("Bob")).unwrap();

        assert_eq!(db.resolve_by_email(" bob@x.com ").unwrap(), Some("u1".to_string()));
        assert_eq!(db.resolve_by_email("nobody@x.com").unwrap(), None);

        let profile = db.profile("u1").unwrap().unwrap();
        assert_eq!(profile.name.as_deref(), Some("Bob"));
        assert!(db.profile("u2").unwrap().is_none());
    }
}
