// Copyright (c) 2026 TwinGuard Project
// SPDX-License-Identifier: AGPL-3.0
//! # Enforcer Lookup/Routing
//!
//! Stateless-per-request resolution of "which enforcement instance handles
//! entity X". The replicated cache is consulted first; on a miss the external
//! lookup function queries the entity service for the minimal projection and
//! the derived entry is written back best-effort. "Not found" is never
//! cached, so a concurrently completing write is not masked by a stale
//! negative.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::cache::CacheEntry;
use crate::domain::entity::{CorrelationId, EntityId};
use crate::infrastructure::cache::{CacheError, ReplicatedCache};

/// Where an entity's signals are enforced.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EnforcerAddress {
    /// Current schema: enforcement keyed by the owning policy id.
    PolicyBacked(EntityId),
    /// Legacy schema: enforcement keyed by the thing id itself.
    AclBacked(EntityId),
}

impl EnforcerAddress {
    pub fn entity_id(&self) -> &EntityId {
        match self {
            EnforcerAddress::PolicyBacked(id) | EnforcerAddress::AclBacked(id) => id,
        }
    }
}

/// Immutable correlation record for one lookup request.
#[derive(Debug, Clone)]
pub struct LookupContext {
    pub correlation_id: CorrelationId,
}

impl LookupContext {
    pub fn new(correlation_id: CorrelationId) -> Self {
        Self { correlation_id }
    }
}

/// Minimal projection of an entity returned by the external lookup function.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupResult {
    pub policy_id: Option<EntityId>,
    pub has_acl: bool,
    pub revision: i64,
}

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("entity {0} not found or has no permission model")]
    NotFound(EntityId),
    #[error("replicated cache error during lookup: {0}")]
    Cache(#[from] CacheError),
    #[error("entity lookup failed: {0}")]
    Upstream(String),
}

/// The external lookup function: queries the entity service for the minimal
/// projection needed to route. `Ok(None)` means the entity does not exist.
#[async_trait]
pub trait EntityLookup: Send + Sync {
    async fn lookup(
        &self,
        id: &EntityId,
        correlation_id: &CorrelationId,
    ) -> Result<Option<LookupResult>, LookupError>;
}

/// Cache-first enforcer address resolution.
pub struct EnforcerLookup {
    cache: Arc<dyn ReplicatedCache>,
    fallback: Arc<dyn EntityLookup>,
}

impl EnforcerLookup {
    pub fn new(cache: Arc<dyn ReplicatedCache>, fallback: Arc<dyn EntityLookup>) -> Self {
        Self { cache, fallback }
    }

    pub async fn resolve(
        &self,
        id: &EntityId,
        ctx: &LookupContext,
    ) -> Result<EnforcerAddress, LookupError> {
        if let Some(entry) = self.cache.get(id).await? {
            if !entry.deleted {
                debug!(
                    entity_id = %id,
                    correlation_id = %ctx.correlation_id,
                    "lookup served from cache"
                );
                return Ok(Self::route(&entry));
            }
        }

        let result = self
            .fallback
            .lookup(id, &ctx.correlation_id)
            .await?
            .ok_or_else(|| LookupError::NotFound(id.clone()))?;

        let entry = match (&result.policy_id, result.has_acl) {
            (Some(policy_id), _) => {
                CacheEntry::current(id.clone(), policy_id.clone(), result.revision)
            }
            (None, true) => CacheEntry::legacy(id.clone(), result.revision),
            (None, false) => {
                // No permission model attached at all; do not cache the
                // negative so a concurrent create is not masked.
                return Err(LookupError::NotFound(id.clone()));
            }
        };

        let address = Self::route(&entry);

        // Best-effort write-back; routing never waits on replication.
        let cache = self.cache.clone();
        let write_back = entry.clone();
        tokio::spawn(async move {
            if let Err(e) = cache.put(write_back).await {
                warn!(error = %e, "cache write-back after lookup failed");
            }
        });

        debug!(
            entity_id = %id,
            correlation_id = %ctx.correlation_id,
            address = ?address,
            "lookup resolved via entity service"
        );
        Ok(address)
    }

    fn route(entry: &CacheEntry) -> EnforcerAddress {
        if entry.is_legacy() {
            EnforcerAddress::AclBacked(entry.entity_id.clone())
        } else {
            match &entry.policy_id {
                Some(policy_id) => EnforcerAddress::PolicyBacked(policy_id.clone()),
                None => EnforcerAddress::PolicyBacked(entry.entity_id.clone()),
            }
        }
    }
}
