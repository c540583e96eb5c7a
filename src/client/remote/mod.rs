//! # Remote Service Boundary
//!
//! The remote document store is an external collaborator. Everything the
//! subsystem needs from it is the [`RemoteService`] trait: create, update,
//! delete, query and subscribe, each of which can fail with a
//! [`RemoteError`].
//!
//! `create` must behave as an upsert keyed by the client-generated id, so a
//! create replayed after an ambiguous failure does not duplicate the entity.

pub mod http;

pub use http::HttpRemote;

use crate::client::subscription::Subscription;
use crate::shared::entity::{Document, ID_FIELD};
use crate::shared::error::RemoteError;
use async_trait::async_trait;
use serde_json::Value;

/// Invoked with the full result set every time it changes
pub type ChangeCallback = Box<dyn Fn(Vec<Document>) + Send + Sync>;

/// Invoked when the live subscription fails
pub type ErrorCallback = Box<dyn Fn(RemoteError) + Send + Sync>;

/// Equality filter applied to remote queries
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub value: Value,
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn by_id(id: &str) -> Self {
        Self::eq(ID_FIELD, id)
    }

    pub fn matches(&self, document: &Document) -> bool {
        document.get(&self.field) == Some(&self.value)
    }
}

/// Remote document service consumed by the sync engine and façades
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Create (or idempotently overwrite) a document under a client id
    async fn create(&self, collection: &str, id: &str, payload: &Document) -> Result<(), RemoteError>;

    async fn update(&self, collection: &str, id: &str, payload: &Document) -> Result<(), RemoteError>;

    async fn delete(&self, collection: &str, id: &str) -> Result<(), RemoteError>;

    /// Documents of a collection matching every filter
    async fn query(&self, collection: &str, filters: &[Filter]) -> Result<Vec<Document>, RemoteError>;

    /// Live query; `on_change` receives the full matching set on each change
    fn subscribe(
        &self,
        collection: &str,
        filters: Vec<Filter>,
        on_change: ChangeCallback,
        on_error: ErrorCallback,
    ) -> Subscription;
}
