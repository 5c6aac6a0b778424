//! Test support: an in-memory database behind a store wrapper that can be
//! told to fail specific operations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use parley_db::Database;
use parley_types::permissions::PermissionGrant;
use parley_types::store::{Document, DocumentStore, Fields, ListQuery, Page, StoreError};

use crate::Engine;

pub type TestEngine = Engine<FlakyStore, Arc<Database>>;

#[derive(Default)]
struct Faults {
    lists: AtomicBool,
    updates: AtomicBool,
    /// Collection whose creates fail, after letting the given number through.
    creates_in: Mutex<Option<(&'static str, usize)>>,
}

#[derive(Clone)]
pub struct FlakyStore {
    db: Arc<Database>,
    faults: Arc<Faults>,
}

impl FlakyStore {
    pub fn new() -> Self {
        let db = Database::open_in_memory().unwrap();
        for (id, name) in [("alice", Some("Alice")), ("bob", Some("Bob")), ("carol", Some("Carol")), ("eve", None)] {
            db.upsert_user(id, &format!("{}@x.com", id), name).unwrap();
        }
        Self {
            db: Arc::new(db),
            faults: Arc::default(),
        }
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn fail_lists(&self, fail: bool) {
        self.faults.lists.store(fail, Ordering::SeqCst);
    }

    pub fn fail_updates(&self, fail: bool) {
        self.faults.updates.store(fail, Ordering::SeqCst);
    }

    pub fn fail_creates_in(&self, collection: Option<&'static str>) {
        *self.faults.creates_in.lock().unwrap() = collection.map(|c| (c, 0));
    }

    /// Let `allowed` creates in `collection` succeed, then fail the rest.
    pub fn fail_creates_in_after(&self, collection: &'static str, allowed: usize) {
        *self.faults.creates_in.lock().unwrap() = Some((collection, allowed));
    }

    fn down(what: &str) -> StoreError {
        StoreError::Unavailable(format!("injected {} failure", what))
    }
}

impl DocumentStore for FlakyStore {
    fn create(
        &self,
        collection: &str,
        id: Option<&str>,
        fields: Fields,
        permissions: &[PermissionGrant],
    ) -> Result<Document, StoreError> {
        if let Some((target, allowed)) = self.faults.creates_in.lock().unwrap().as_mut() {
            if *target == collection {
                if *allowed == 0 {
                    return Err(Self::down("create"));
                }
                *allowed -= 1;
            }
        }
        self.db.create(collection, id, fields, permissions)
    }

    fn get(&self, collection: &str, id: &str) -> Result<Document, StoreError> {
        self.db.get(collection, id)
    }

    fn list(&self, collection: &str, query: &ListQuery) -> Result<Page, StoreError> {
        if self.faults.lists.load(Ordering::SeqCst) {
            return Err(Self::down("list"));
        }
        self.db.list(collection, query)
    }

    fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<Document, StoreError> {
        if self.faults.updates.load(Ordering::SeqCst) {
            return Err(Self::down("update"));
        }
        self.db.update(collection, id, fields)
    }
}

pub fn engine() -> TestEngine {
    engine_with(FlakyStore::new())
}

pub fn engine_with(store: FlakyStore) -> TestEngine {
    let resolver = store.db().clone();
    Engine::new(store, resolver)
}
