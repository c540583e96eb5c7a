//! # Resilient Service Façade
//!
//! One generic read/write API per entity type that keeps working when the
//! remote service does not.
//!
//! ## Writes
//!
//! `upsert` and `remove` try the remote service first. A transient failure
//! (network, server, database) stores the snapshot locally, queues the
//! operation and hands it to the recovery controller; the caller still gets
//! the client-generated id back. A permanent failure (validation, auth,
//! permission, unknown) is returned to the caller and nothing is queued.
//!
//! A successful remote write is queued as well when auditing is enabled, so
//! the queue replays it idempotently and the remote copy stays the source
//! of truth.
//!
//! An entity that still has queued operations is never written directly:
//! the new write is stored and queued behind them, so delivery keeps the
//! per-entity order.
//!
//! ## Reads
//!
//! Remote results come first, followed by offline records whose id the
//! remote set does not contain; the remote copy wins on a shared id. When
//! the remote query fails, the local store alone answers.

use crate::client::local_db::{LocalDatabase, OfflineOperation, OfflineRecord};
use crate::client::offline::queue::{OperationType, PendingOperation};
use crate::client::offline::recovery::RecoveryController;
use crate::client::remote::{Filter, RemoteService};
use crate::client::subscription::Subscription;
use crate::client::sync::SyncService;
use crate::shared::entity::{document_id, from_document, new_id, to_document, Document, Entity, ID_FIELD};
use crate::shared::error::{RemoteError, Result, SyncError};
use serde_json::Value;
use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Remote documents followed by offline-only documents, remote winning on shared ids
pub fn merge_documents(remote: Vec<Document>, offline: Vec<Document>) -> Vec<Document> {
    let remote_ids: HashSet<String> = remote
        .iter()
        .filter_map(|doc| document_id(doc).map(str::to_owned))
        .collect();

    let offline_only = offline
        .into_iter()
        .filter(|doc| document_id(doc).map_or(true, |id| !remote_ids.contains(id)));

    remote.into_iter().chain(offline_only).collect()
}

/// Decode documents and order them by the entity sort key; undecodable documents are skipped
pub fn into_sorted_entities<E: Entity>(documents: Vec<Document>) -> Vec<E> {
    let mut entities: Vec<E> = documents
        .into_iter()
        .filter_map(|doc| match from_document::<E>(doc) {
            Ok(entity) => Some(entity),
            Err(error) => {
                tracing::warn!(collection = E::COLLECTION, error = %error, "Skipping undecodable document");
                None
            }
        })
        .collect();
    entities.sort_by_cached_key(|entity| entity.sort_key());
    entities
}

enum Feed {
    Changed(Vec<Document>),
    Failed(RemoteError),
}

/// Backend-availability-transparent service for one entity type
pub struct ResilientService<E: Entity> {
    sync: Arc<SyncService>,
    recovery: Arc<RecoveryController>,
    audit_successful_writes: bool,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Clone for ResilientService<E> {
    fn clone(&self) -> Self {
        Self {
            sync: Arc::clone(&self.sync),
            recovery: Arc::clone(&self.recovery),
            audit_successful_writes: self.audit_successful_writes,
            _entity: PhantomData,
        }
    }
}

impl<E: Entity> std::fmt::Debug for ResilientService<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientService")
            .field("collection", &E::COLLECTION)
            .field("audit_successful_writes", &self.audit_successful_writes)
            .finish()
    }
}

impl<E: Entity> ResilientService<E> {
    pub fn new(sync: Arc<SyncService>, recovery: Arc<RecoveryController>) -> Self {
        Self {
            sync,
            recovery,
            audit_successful_writes: true,
            _entity: PhantomData,
        }
    }

    /// Queue successful remote writes as well
    pub fn with_audit(mut self, enabled: bool) -> Self {
        self.audit_successful_writes = enabled;
        self
    }

    fn remote(&self) -> &dyn RemoteService {
        self.sync.remote().as_ref()
    }

    fn db(&self) -> &LocalDatabase {
        self.sync.queue().database()
    }

    /// Create or update an entity; returns its id once the write is accepted
    pub async fn upsert(&self, mut entity: E) -> Result<String> {
        entity.validate()?;

        let existing = self.find_existing(&entity).await;
        let id = entity
            .id()
            .map(str::to_owned)
            .or_else(|| existing.as_ref().and_then(|doc| document_id(doc).map(str::to_owned)))
            .unwrap_or_else(new_id);
        let op_type = if existing.is_some() {
            OperationType::Update
        } else {
            OperationType::Create
        };

        entity.set_id(id.clone());
        let payload = to_document(&entity)?;
        let operation = PendingOperation::new(op_type, E::COLLECTION, id.as_str(), payload, self.sync.queue().max_retries())
            .with_pre_image(existing.filter(|_| op_type == OperationType::Update));
        let offline_operation = match op_type {
            OperationType::Create => OfflineOperation::Create,
            _ => OfflineOperation::Update,
        };
        let record = OfflineRecord::pending(E::COLLECTION, id.as_str(), operation.payload.clone(), offline_operation);

        if self.db().has_pending_for(E::COLLECTION, &id).await? {
            let queued = self.sync.queue_offline_write(&record, operation).await?;
            tracing::debug!(collection = E::COLLECTION, entity_id = %id, operation_id = %queued.id, "Write queued behind pending work");
            return Ok(id);
        }

        let outcome = match op_type {
            OperationType::Create => self.remote().create(E::COLLECTION, &id, &operation.payload).await,
            _ => self.remote().update(E::COLLECTION, &id, &operation.payload).await,
        };

        match outcome {
            Ok(()) => {
                tracing::debug!(collection = E::COLLECTION, entity_id = %id, op_type = %op_type, "Remote write applied");
                self.audit(operation).await;
                Ok(id)
            }
            Err(error) => {
                self.fall_back(SyncError::Remote(error), operation, Some(record)).await?;
                Ok(id)
            }
        }
    }

    /// Delete an entity; accepted locally when the remote service is unreachable
    pub async fn remove(&self, id: &str) -> Result<()> {
        let snapshot = self
            .lookup_document(id)
            .await
            .unwrap_or_else(|| Document::from_iter([(ID_FIELD.to_string(), Value::String(id.to_string()))]));
        let operation = PendingOperation::new(OperationType::Delete, E::COLLECTION, id, snapshot, self.sync.queue().max_retries());

        if self.db().has_pending_for(E::COLLECTION, id).await? {
            self.db().remove_record(E::COLLECTION, id).await?;
            self.sync.queue_pending(operation).await?;
            tracing::debug!(collection = E::COLLECTION, entity_id = id, "Delete queued behind pending work");
            return Ok(());
        }

        match self.remote().delete(E::COLLECTION, id).await {
            Ok(()) => {
                self.db().remove_record(E::COLLECTION, id).await?;
                self.audit(operation).await;
                Ok(())
            }
            Err(error) => self.fall_back(SyncError::Remote(error), operation, None).await,
        }
    }

    /// All entities: remote merged with offline-only records, sorted
    pub async fn get_all(&self) -> Result<Vec<E>> {
        let offline = self.offline_documents().await?;

        match self.remote().query(E::COLLECTION, &[]).await {
            Ok(remote) => Ok(into_sorted_entities(merge_documents(remote, offline))),
            Err(error) => {
                tracing::warn!(collection = E::COLLECTION, error = %error, "Remote query failed, serving local records");
                Ok(into_sorted_entities(offline))
            }
        }
    }

    /// One entity by id: remote first, then the local store
    pub async fn get_by_id(&self, id: &str) -> Result<Option<E>> {
        self.lookup_document(id).await.map(from_document).transpose()
    }

    /// Live merged view; the callback always receives best-effort data
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(Vec<E>) + Send + Sync + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let changes = tx.clone();

        let remote_subscription = self.remote().subscribe(
            E::COLLECTION,
            Vec::new(),
            Box::new(move |documents: Vec<Document>| {
                let _ = changes.send(Feed::Changed(documents));
            }),
            Box::new(move |error: RemoteError| {
                let _ = tx.send(Feed::Failed(error));
            }),
        );

        let service = self.clone();
        let task = tokio::spawn(async move {
            while let Some(feed) = rx.recv().await {
                let entities = match feed {
                    Feed::Changed(remote) => {
                        let offline = service.offline_documents().await.unwrap_or_else(|error| {
                            tracing::warn!(collection = E::COLLECTION, error = %error, "Local read failed during subscription");
                            Vec::new()
                        });
                        into_sorted_entities(merge_documents(remote, offline))
                    }
                    Feed::Failed(error) => {
                        tracing::warn!(collection = E::COLLECTION, error = %error, "Subscription error, falling back to one-shot read");
                        service.get_all().await.unwrap_or_else(|error| {
                            tracing::error!(collection = E::COLLECTION, error = %error, "Fallback read failed");
                            Vec::new()
                        })
                    }
                };
                callback(entities);
            }
        });

        Subscription::new(move || {
            remote_subscription.unsubscribe();
            task.abort();
        })
    }

    /// Queue a write the remote service already applied
    async fn audit(&self, operation: PendingOperation) {
        if !self.audit_successful_writes {
            return;
        }
        if let Err(error) = self.sync.queue_pending(operation).await {
            tracing::error!(collection = E::COLLECTION, error = %error, "Failed to queue audited write");
        }
    }

    /// Route a failed remote write: permanent failures go back to the
    /// caller, transient ones are stored locally and queued
    async fn fall_back(&self, error: SyncError, operation: PendingOperation, record: Option<OfflineRecord>) -> Result<()> {
        let code = self.recovery.classifier().classify_error(&error);
        if !code.can_retry() {
            self.recovery.handle_error(&error, &operation).await;
            return Err(error);
        }

        let queued = match &record {
            Some(record) => self.sync.queue_offline_write(record, operation).await?,
            None => {
                self.db().remove_record(&operation.collection, &operation.entity_id).await?;
                self.sync.queue_pending(operation.clone()).await?;
                operation
            }
        };

        self.recovery.handle_error(&error, &queued).await;
        Ok(())
    }

    async fn offline_documents(&self) -> Result<Vec<Document>> {
        Ok(self
            .db()
            .get_all_records(E::COLLECTION)
            .await?
            .into_iter()
            .map(|record| record.payload)
            .collect())
    }

    async fn lookup_document(&self, id: &str) -> Option<Document> {
        match self.remote().query(E::COLLECTION, &[Filter::by_id(id)]).await {
            Ok(documents) => {
                if let Some(document) = documents.into_iter().next() {
                    return Some(document);
                }
            }
            Err(error) => {
                tracing::debug!(collection = E::COLLECTION, entity_id = id, error = %error, "Remote lookup failed");
            }
        }

        match self.db().get_record(E::COLLECTION, id).await {
            Ok(record) => record.map(|r| r.payload),
            Err(error) => {
                tracing::warn!(collection = E::COLLECTION, entity_id = id, error = %error, "Local lookup failed");
                None
            }
        }
    }

    /// Current state of the entity this write targets, by id or natural key
    async fn find_existing(&self, entity: &E) -> Option<Document> {
        if let Some(id) = entity.id() {
            return self.lookup_document(id).await;
        }
        let (field, value) = entity.natural_key()?;
        let filter = Filter::eq(field, value.clone());

        match self.remote().query(E::COLLECTION, std::slice::from_ref(&filter)).await {
            Ok(documents) => {
                if let Some(document) = documents.into_iter().next() {
                    return Some(document);
                }
            }
            Err(error) => {
                tracing::debug!(collection = E::COLLECTION, field, error = %error, "Natural key lookup failed remotely");
            }
        }

        self.offline_documents()
            .await
            .ok()?
            .into_iter()
            .find(|doc| filter.matches(doc))
    }
}
