//! In-memory remote document service
//!
//! Behaves like the real service: `create` upserts by id, `delete` of a
//! missing document succeeds. Failures can be injected globally or per
//! entity id, and every write is logged in call order.

use async_trait::async_trait;
use fieldsync::client::remote::{ChangeCallback, ErrorCallback, Filter, RemoteService};
use fieldsync::client::Subscription;
use fieldsync::shared::entity::ID_FIELD;
use fieldsync::shared::{Document, RemoteError};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

struct Watcher {
    collection: String,
    filters: Vec<Filter>,
    on_change: ChangeCallback,
    on_error: ErrorCallback,
}

#[derive(Default)]
struct Watchers {
    next_id: u64,
    active: HashMap<u64, Arc<Watcher>>,
}

#[derive(Default)]
pub struct FakeRemote {
    collections: Mutex<HashMap<String, BTreeMap<String, Document>>>,
    failure: Mutex<Option<RemoteError>>,
    entity_failures: Mutex<HashMap<String, RemoteError>>,
    delay: Mutex<Duration>,
    calls: Mutex<Vec<(String, String)>>,
    watchers: Arc<Mutex<Watchers>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every call with `error` until [`FakeRemote::recover`]
    pub fn fail_with(&self, error: RemoteError) {
        *self.failure.lock() = Some(error);
    }

    pub fn recover(&self) {
        *self.failure.lock() = None;
    }

    /// Fail writes to one entity id
    pub fn fail_entity(&self, entity_id: &str, error: RemoteError) {
        self.entity_failures.lock().insert(entity_id.to_string(), error);
    }

    /// Latency added to every write
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn seed(&self, collection: &str, document: Value) {
        let document = document.as_object().cloned().expect("seed documents are objects");
        let id = document[ID_FIELD].as_str().expect("seed documents carry an id").to_string();
        self.collections
            .lock()
            .entry(collection.to_string())
            .or_default()
            .insert(id, document);
    }

    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.collections
            .lock()
            .get(collection)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, collection: &str, id: &str) -> Option<Document> {
        self.collections.lock().get(collection).and_then(|docs| docs.get(id).cloned())
    }

    /// Writes that reached the store, as `(kind, entity_id)`
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().clone()
    }

    pub fn write_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Push an error to every live subscription
    pub fn emit_error(&self, error: RemoteError) {
        let watchers: Vec<Arc<Watcher>> = self.watchers.lock().active.values().cloned().collect();
        for watcher in watchers {
            (watcher.on_error)(error.clone());
        }
    }

    fn check(&self, entity_id: Option<&str>) -> Result<(), RemoteError> {
        if let Some(error) = self.failure.lock().clone() {
            return Err(error);
        }
        if let Some(error) = entity_id.and_then(|id| self.entity_failures.lock().get(id).cloned()) {
            return Err(error);
        }
        Ok(())
    }

    async fn write(&self, kind: &str, collection: &str, id: &str, payload: Option<&Document>) -> Result<(), RemoteError> {
        self.check(Some(id))?;
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        {
            let mut collections = self.collections.lock();
            let docs = collections.entry(collection.to_string()).or_default();
            match payload {
                Some(payload) => {
                    let mut document = payload.clone();
                    document.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
                    docs.insert(id.to_string(), document);
                }
                None => {
                    docs.remove(id);
                }
            }
            self.calls.lock().push((kind.to_string(), id.to_string()));
        }

        self.notify(collection);
        Ok(())
    }

    fn matching(&self, collection: &str, filters: &[Filter]) -> Vec<Document> {
        self.documents(collection)
            .into_iter()
            .filter(|doc| filters.iter().all(|f| f.matches(doc)))
            .collect()
    }

    fn notify(&self, collection: &str) {
        let watchers: Vec<Arc<Watcher>> = self
            .watchers
            .lock()
            .active
            .values()
            .filter(|w| w.collection == collection)
            .cloned()
            .collect();
        for watcher in watchers {
            (watcher.on_change)(self.matching(collection, &watcher.filters));
        }
    }
}

#[async_trait]
impl RemoteService for FakeRemote {
    async fn create(&self, collection: &str, id: &str, payload: &Document) -> Result<(), RemoteError> {
        self.write("create", collection, id, Some(payload)).await
    }

    async fn update(&self, collection: &str, id: &str, payload: &Document) -> Result<(), RemoteError> {
        self.write("update", collection, id, Some(payload)).await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), RemoteError> {
        self.write("delete", collection, id, None).await
    }

    async fn query(&self, collection: &str, filters: &[Filter]) -> Result<Vec<Document>, RemoteError> {
        self.check(None)?;
        Ok(self.matching(collection, filters))
    }

    fn subscribe(
        &self,
        collection: &str,
        filters: Vec<Filter>,
        on_change: ChangeCallback,
        on_error: ErrorCallback,
    ) -> Subscription {
        let watcher = Arc::new(Watcher {
            collection: collection.to_string(),
            filters,
            on_change,
            on_error,
        });

        let id = {
            let mut watchers = self.watchers.lock();
            watchers.next_id += 1;
            let id = watchers.next_id;
            watchers.active.insert(id, watcher.clone());
            id
        };

        match self.check(None) {
            Ok(()) => (watcher.on_change)(self.matching(collection, &watcher.filters)),
            Err(error) => (watcher.on_error)(error),
        }

        let watchers = Arc::downgrade(&self.watchers);
        Subscription::new(move || {
            if let Some(watchers) = watchers.upgrade() {
                watchers.lock().active.remove(&id);
            }
        })
    }
}
