// Copyright (c) 2026 TwinGuard Project
// SPDX-License-Identifier: AGPL-3.0

//! Integration tests for enforcer lookup and signal routing.
//!
//! Covered behavior:
//! - cache-first resolution with best-effort write-back on a miss
//! - legacy-schema entities routed to the ACL-backed variant
//! - "not found" never cached
//! - deleted cache entries treated as misses
//! - upstream lookup failures surfaced to the caller
//! - dispatcher routing of creation commands for unknown entities

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use twinguard_core::application::{
    EnforcerAddress, EnforcerLookup, EnforcerRegistry, EntityLookup, LookupContext, LookupError,
    LookupResult,
};
use twinguard_core::domain::cache::{CacheEntry, SCHEMA_VERSION_LEGACY};
use twinguard_core::domain::entity::{CorrelationId, EntityId, ResourceType};
use twinguard_core::domain::permission::AuthorizationContext;
use twinguard_core::domain::signal::{EnforcementOutcome, Signal};
use twinguard_core::infrastructure::evaluator::StaticEvaluatorFactory;
use twinguard_core::infrastructure::{
    EnforcementConfig, InMemoryEntityService, InMemoryReplicatedCache, ReplicatedCache,
    SignalDispatcher,
};

/// Scripted external lookup function; counts invocations.
struct StubEntityLookup {
    result: Mutex<Option<LookupResult>>,
    fail: Mutex<Option<String>>,
    calls: AtomicU64,
}

impl StubEntityLookup {
    fn returning(result: Option<LookupResult>) -> Arc<Self> {
        Arc::new(Self {
            result: Mutex::new(result),
            fail: Mutex::new(None),
            calls: AtomicU64::new(0),
        })
    }

    fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            result: Mutex::new(None),
            fail: Mutex::new(Some(message.to_string())),
            calls: AtomicU64::new(0),
        })
    }

    fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EntityLookup for StubEntityLookup {
    async fn lookup(
        &self,
        _id: &EntityId,
        _correlation_id: &CorrelationId,
    ) -> Result<Option<LookupResult>, LookupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.fail.lock().clone() {
            return Err(LookupError::Upstream(message));
        }
        Ok(self.result.lock().clone())
    }
}

fn ctx() -> LookupContext {
    LookupContext::new(CorrelationId::generate())
}

#[tokio::test]
async fn test_miss_falls_back_then_serves_from_cache() {
    let cache = Arc::new(InMemoryReplicatedCache::new(16));
    let stub = StubEntityLookup::returning(Some(LookupResult {
        policy_id: Some(EntityId::new("policy:42")),
        has_acl: false,
        revision: 3,
    }));
    let lookup = EnforcerLookup::new(cache.clone(), stub.clone());
    let thing = EntityId::new("thing:42");

    let address = lookup.resolve(&thing, &ctx()).await.unwrap();
    assert_eq!(
        address,
        EnforcerAddress::PolicyBacked(EntityId::new("policy:42"))
    );
    assert_eq!(stub.calls(), 1);

    // The derived entry is written back asynchronously.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let cached = cache.get(&thing).await.unwrap().unwrap();
    assert_eq!(cached.policy_id, Some(EntityId::new("policy:42")));
    assert_eq!(cached.revision, 3);

    // The second resolution never reaches the entity service.
    let address = lookup.resolve(&thing, &ctx()).await.unwrap();
    assert_eq!(
        address,
        EnforcerAddress::PolicyBacked(EntityId::new("policy:42"))
    );
    assert_eq!(stub.calls(), 1);
}

#[tokio::test]
async fn test_legacy_entity_routes_to_acl_variant() {
    let cache = Arc::new(InMemoryReplicatedCache::new(16));
    let stub = StubEntityLookup::returning(Some(LookupResult {
        policy_id: None,
        has_acl: true,
        revision: 1,
    }));
    let lookup = EnforcerLookup::new(cache.clone(), stub.clone());
    let thing = EntityId::new("thing:legacy");

    let address = lookup.resolve(&thing, &ctx()).await.unwrap();
    assert_eq!(address, EnforcerAddress::AclBacked(thing.clone()));

    tokio::time::sleep(Duration::from_millis(50)).await;
    let cached = cache.get(&thing).await.unwrap().unwrap();
    assert_eq!(cached.schema_version, SCHEMA_VERSION_LEGACY);
}

#[tokio::test]
async fn test_not_found_is_never_cached() {
    let cache = Arc::new(InMemoryReplicatedCache::new(16));
    let stub = StubEntityLookup::returning(None);
    let lookup = EnforcerLookup::new(cache.clone(), stub.clone());
    let thing = EntityId::new("thing:absent");

    for _ in 0..2 {
        let err = lookup.resolve(&thing, &ctx()).await.unwrap_err();
        assert!(matches!(err, LookupError::NotFound(_)));
    }
    // Each resolution hit the entity service; no negative was cached.
    assert_eq!(stub.calls(), 2);
    assert!(cache.get(&thing).await.unwrap().is_none());
}

#[tokio::test]
async fn test_entity_without_permission_model_is_not_cached() {
    let cache = Arc::new(InMemoryReplicatedCache::new(16));
    let stub = StubEntityLookup::returning(Some(LookupResult {
        policy_id: None,
        has_acl: false,
        revision: 2,
    }));
    let lookup = EnforcerLookup::new(cache.clone(), stub.clone());
    let thing = EntityId::new("thing:orphan");

    let err = lookup.resolve(&thing, &ctx()).await.unwrap_err();
    assert!(matches!(err, LookupError::NotFound(_)));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(cache.get(&thing).await.unwrap().is_none());
}

#[tokio::test]
async fn test_deleted_cache_entry_is_a_miss() {
    let cache = Arc::new(InMemoryReplicatedCache::new(16));
    cache
        .put(CacheEntry::tombstone(EntityId::new("thing:7"), 9))
        .await
        .unwrap();
    let stub = StubEntityLookup::returning(Some(LookupResult {
        policy_id: Some(EntityId::new("policy:7")),
        has_acl: false,
        revision: 10,
    }));
    let lookup = EnforcerLookup::new(cache.clone(), stub.clone());

    let address = lookup
        .resolve(&EntityId::new("thing:7"), &ctx())
        .await
        .unwrap();
    assert_eq!(
        address,
        EnforcerAddress::PolicyBacked(EntityId::new("policy:7"))
    );
    assert_eq!(stub.calls(), 1);
}

#[tokio::test]
async fn test_upstream_failure_surfaces() {
    let cache = Arc::new(InMemoryReplicatedCache::new(16));
    let stub = StubEntityLookup::failing("shard unreachable");
    let lookup = EnforcerLookup::new(cache, stub);

    let err = lookup
        .resolve(&EntityId::new("thing:1"), &ctx())
        .await
        .unwrap_err();
    assert!(matches!(err, LookupError::Upstream(_)));
}

#[tokio::test]
async fn test_dispatcher_routes_legacy_create_to_acl_bootstrap() {
    let service = Arc::new(InMemoryEntityService::new());
    let cache = Arc::new(InMemoryReplicatedCache::new(16));
    let registry = EnforcerRegistry::new(
        service.clone(),
        cache.clone(),
        Arc::new(StaticEvaluatorFactory),
        EnforcementConfig::default(),
    );
    let stub = StubEntityLookup::returning(None);
    let dispatcher = SignalDispatcher::new(EnforcerLookup::new(cache, stub), registry);

    let thing = EntityId::new("thing:9");
    let create = Signal::create(
        thing.clone(),
        AuthorizationContext::single("iot:creator"),
        ResourceType::Thing,
    )
    .with_schema_version(SCHEMA_VERSION_LEGACY);

    let reply = dispatcher.dispatch(create).await.unwrap();
    assert!(matches!(reply, Ok(EnforcementOutcome::Forwarded(_))));
    assert_eq!(service.forwarded().len(), 1);
    assert!(dispatcher
        .registry()
        .contains(&EnforcerAddress::AclBacked(thing)));
}

#[tokio::test]
async fn test_dispatcher_rejects_non_create_for_unknown_entity() {
    let service = Arc::new(InMemoryEntityService::new());
    let cache = Arc::new(InMemoryReplicatedCache::new(16));
    let registry = EnforcerRegistry::new(
        service,
        cache.clone(),
        Arc::new(StaticEvaluatorFactory),
        EnforcementConfig::default(),
    );
    let stub = StubEntityLookup::returning(None);
    let dispatcher = SignalDispatcher::new(EnforcerLookup::new(cache, stub), registry);

    let query = Signal::query(
        EntityId::new("thing:absent"),
        AuthorizationContext::single("iot:user"),
        ResourceType::Thing,
        twinguard_core::domain::entity::ResourcePath::root(),
    );
    let err = dispatcher.dispatch(query).await.unwrap_err();
    assert!(matches!(
        err,
        twinguard_core::infrastructure::DispatchError::Lookup(LookupError::NotFound(_))
    ));
}
