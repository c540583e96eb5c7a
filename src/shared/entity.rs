//! Domain entity contract
//!
//! Every entity type served by a resilient façade implements [`Entity`].
//! Payloads travel as JSON objects ([`Document`]) so the local store and
//! the remote service stay schema-agnostic.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::shared::error::{Result, SyncError};

/// Schema-agnostic JSON object payload
pub type Document = serde_json::Map<String, Value>;

/// Field every document carries its entity id under
pub const ID_FIELD: &str = "id";

/// A domain entity persisted through the resilient façade
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Collection name used both remotely and in the local store
    const COLLECTION: &'static str;

    fn id(&self) -> Option<&str>;

    fn set_id(&mut self, id: String);

    /// Field/value pair identifying an existing entity when no id is given
    fn natural_key(&self) -> Option<(&'static str, String)> {
        None
    }

    /// Key used to order read results
    fn sort_key(&self) -> String;

    /// Cheap structural checks run before any write is attempted
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

/// Generate a client-side entity or operation id.
///
/// UUIDv7: millisecond timestamp prefix plus random tail, so ids sort by
/// creation time and a replayed create lands on the same key.
pub fn new_id() -> String {
    Uuid::now_v7().to_string()
}

/// Serialize an entity into its document form
pub fn to_document<E: Entity>(entity: &E) -> Result<Document> {
    match serde_json::to_value(entity)? {
        Value::Object(map) => Ok(map),
        _ => Err(SyncError::validation(
            E::COLLECTION,
            "entity must serialize to a JSON object",
        )),
    }
}

/// Deserialize a document back into an entity
pub fn from_document<E: Entity>(document: Document) -> Result<E> {
    Ok(serde_json::from_value(Value::Object(document))?)
}

/// Read the id out of a document
pub fn document_id(document: &Document) -> Option<&str> {
    document.get(ID_FIELD).and_then(Value::as_str)
}
