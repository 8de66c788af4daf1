// Copyright (c) 2026 TwinGuard Project
// SPDX-License-Identifier: AGPL-3.0
//! # Entity Service Boundary
//!
//! The authoritative, sharded persistence tier, consumed as an interface:
//! the enforcement state machines load permission documents from it, forward
//! authorized twin-channel signals to it, broadcast live-channel signals
//! through it, and observe the events it emits.
//!
//! [`InMemoryEntityService`] is the test double used by the integration
//! suite and by single-process wiring; it records traffic and replays canned
//! responses.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;

use crate::domain::entity::{CorrelationId, EntityId};
use crate::domain::error::ServiceError;
use crate::domain::events::EntityEvent;
use crate::domain::signal::{Signal, SignalResponse};

/// Which permission document an enforcement instance loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    Policy,
    Acl,
}

/// Result of a permission-document load.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentFetch {
    Found { document: Value, revision: i64 },
    /// The authoritative tier confirmed no document exists.
    Missing,
}

/// The authoritative persistence tier.
#[async_trait]
pub trait EntityService: Send + Sync {
    /// Load the permission document governing `id`.
    async fn fetch_permission_document(
        &self,
        id: &EntityId,
        kind: DocumentKind,
        correlation_id: &CorrelationId,
    ) -> Result<DocumentFetch, ServiceError>;

    /// Point-to-point forward of an authorized twin-channel signal.
    async fn forward(&self, signal: Signal) -> Result<SignalResponse, ServiceError>;

    /// Broadcast an authorized live-channel signal over pub/sub.
    async fn publish(&self, signal: Signal) -> Result<(), ServiceError>;

    /// Events emitted by the authoritative tier.
    fn events(&self) -> broadcast::Receiver<EntityEvent>;
}

/// In-memory entity service double.
pub struct InMemoryEntityService {
    documents: RwLock<HashMap<(EntityId, DocumentKind), (Value, i64)>>,
    query_responses: RwLock<HashMap<EntityId, Value>>,
    forwarded: Mutex<Vec<Signal>>,
    published: Mutex<Vec<Signal>>,
    fail_next_load: Mutex<Option<ServiceError>>,
    load_delay: Mutex<Option<Duration>>,
    forward_delay: Mutex<Option<Duration>>,
    load_count: AtomicU64,
    events: broadcast::Sender<EntityEvent>,
}

impl InMemoryEntityService {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            documents: RwLock::new(HashMap::new()),
            query_responses: RwLock::new(HashMap::new()),
            forwarded: Mutex::new(Vec::new()),
            published: Mutex::new(Vec::new()),
            fail_next_load: Mutex::new(None),
            load_delay: Mutex::new(None),
            forward_delay: Mutex::new(None),
            load_count: AtomicU64::new(0),
            events,
        }
    }

    pub fn set_document(&self, id: EntityId, kind: DocumentKind, document: Value, revision: i64) {
        self.documents
            .write()
            .insert((id, kind), (document, revision));
    }

    pub fn remove_document(&self, id: &EntityId, kind: DocumentKind) {
        self.documents.write().remove(&(id.clone(), kind));
    }

    /// Payload returned for query commands targeting `id`.
    pub fn set_query_response(&self, id: EntityId, payload: Value) {
        self.query_responses.write().insert(id, payload);
    }

    /// Make the next permission-document load fail with `error`.
    pub fn fail_next_load(&self, error: ServiceError) {
        *self.fail_next_load.lock() = Some(error);
    }

    /// Delay every permission-document load; lets tests observe the
    /// Synchronizing window.
    pub fn set_load_delay(&self, delay: Duration) {
        *self.load_delay.lock() = Some(delay);
    }

    /// Delay every point-to-point forward; lets tests observe the Querying
    /// window.
    pub fn set_forward_delay(&self, delay: Duration) {
        *self.forward_delay.lock() = Some(delay);
    }

    /// Number of permission-document loads served so far.
    pub fn load_count(&self) -> u64 {
        self.load_count.load(Ordering::SeqCst)
    }

    /// Signals forwarded point-to-point so far.
    pub fn forwarded(&self) -> Vec<Signal> {
        self.forwarded.lock().clone()
    }

    /// Signals broadcast on the live channel so far.
    pub fn published(&self) -> Vec<Signal> {
        self.published.lock().clone()
    }

    /// Emit an authoritative event to all observers.
    pub fn emit(&self, event: EntityEvent) {
        let _ = self.events.send(event);
    }
}

impl Default for InMemoryEntityService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EntityService for InMemoryEntityService {
    async fn fetch_permission_document(
        &self,
        id: &EntityId,
        kind: DocumentKind,
        _correlation_id: &CorrelationId,
    ) -> Result<DocumentFetch, ServiceError> {
        let delay = *self.load_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.load_count.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.fail_next_load.lock().take() {
            return Err(error);
        }
        Ok(match self.documents.read().get(&(id.clone(), kind)) {
            Some((document, revision)) => DocumentFetch::Found {
                document: document.clone(),
                revision: *revision,
            },
            None => DocumentFetch::Missing,
        })
    }

    async fn forward(&self, signal: Signal) -> Result<SignalResponse, ServiceError> {
        let delay = *self.forward_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let correlation_id = signal.correlation_id.clone();
        let payload = self.query_responses.read().get(&signal.entity_id).cloned();
        self.forwarded.lock().push(signal);
        Ok(SignalResponse {
            correlation_id,
            status: if payload.is_some() { 200 } else { 204 },
            payload,
        })
    }

    async fn publish(&self, signal: Signal) -> Result<(), ServiceError> {
        self.published.lock().push(signal);
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<EntityEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entity::{ResourcePath, ResourceType};
    use crate::domain::permission::AuthorizationContext;
    use serde_json::json;

    #[tokio::test]
    async fn test_fetch_found_and_missing() {
        let service = InMemoryEntityService::new();
        let id = EntityId::new("policy:1");
        service.set_document(id.clone(), DocumentKind::Policy, json!({"entries": {}}), 4);

        let fetch = service
            .fetch_permission_document(&id, DocumentKind::Policy, &CorrelationId::generate())
            .await
            .unwrap();
        assert!(matches!(fetch, DocumentFetch::Found { revision: 4, .. }));

        let missing = service
            .fetch_permission_document(&EntityId::new("policy:2"), DocumentKind::Policy, &CorrelationId::generate())
            .await
            .unwrap();
        assert_eq!(missing, DocumentFetch::Missing);
    }

    #[tokio::test]
    async fn test_forward_records_and_replays() {
        let service = InMemoryEntityService::new();
        let id = EntityId::new("thing:1");
        service.set_query_response(id.clone(), json!({"thingId": "thing:1"}));

        let signal = Signal::query(
            id,
            AuthorizationContext::single("iot:user"),
            ResourceType::Thing,
            ResourcePath::root(),
        );
        let response = service.forward(signal).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(service.forwarded().len(), 1);
    }
}
