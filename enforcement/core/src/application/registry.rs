// Copyright (c) 2026 TwinGuard Project
// SPDX-License-Identifier: AGPL-3.0
//! # Enforcer Registry
//!
//! Ownership of the per-entity enforcement instances: a concurrent map keyed
//! by enforcer address plus a factory. An instance is created on first
//! access; it removes itself from the map when its task ends (idle eviction,
//! entity deletion or synchronization failure), so the next signal creates a
//! fresh one that resynchronizes from scratch.

use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::application::acl_enforcer::AclEnforcer;
use crate::application::enforcer::{Enforcer, EnforcerHandle, EnforcementReply};
use crate::application::lookup::EnforcerAddress;
use crate::application::policy_enforcer::PolicyEnforcer;
use crate::domain::permission::PolicyEvaluatorFactory;
use crate::domain::signal::Signal;
use crate::infrastructure::cache::ReplicatedCache;
use crate::infrastructure::config::EnforcementConfig;
use crate::infrastructure::entity_service::EntityService;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("enforcement instance terminated before answering; retry")]
    InstanceGone,
}

/// Creates, tracks and addresses enforcement instances.
pub struct EnforcerRegistry {
    instances: Arc<DashMap<EnforcerAddress, EnforcerHandle>>,
    service: Arc<dyn EntityService>,
    cache: Arc<dyn ReplicatedCache>,
    evaluator_factory: Arc<dyn PolicyEvaluatorFactory>,
    config: EnforcementConfig,
    shutdown: CancellationToken,
}

impl EnforcerRegistry {
    pub fn new(
        service: Arc<dyn EntityService>,
        cache: Arc<dyn ReplicatedCache>,
        evaluator_factory: Arc<dyn PolicyEvaluatorFactory>,
        config: EnforcementConfig,
    ) -> Self {
        Self {
            instances: Arc::new(DashMap::new()),
            service,
            cache,
            evaluator_factory,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Deliver a signal to the instance at `address`, spawning it if needed.
    ///
    /// A send can race with self-termination; one respawn covers that window,
    /// and a second failure is reported to the caller as retryable.
    pub async fn deliver(
        &self,
        address: &EnforcerAddress,
        signal: Signal,
    ) -> Result<EnforcementReply, DeliveryError> {
        let handle = self.handle_for(address);
        match handle.enforce(signal.clone()).await {
            Ok(reply) => Ok(reply),
            Err(_) => {
                self.instances.remove(address);
                let handle = self.handle_for(address);
                handle
                    .enforce(signal)
                    .await
                    .map_err(|_| DeliveryError::InstanceGone)
            }
        }
    }

    /// Get the live handle for `address`, spawning a fresh instance when none
    /// exists (or the previous one already closed its inbox).
    pub fn handle_for(&self, address: &EnforcerAddress) -> EnforcerHandle {
        if let Some(existing) = self.instances.get(address) {
            if !existing.is_closed() {
                return existing.clone();
            }
        }
        let entry = self.instances.entry(address.clone());
        let handle = entry
            .and_modify(|handle| {
                if handle.is_closed() {
                    *handle = self.spawn(address);
                }
            })
            .or_insert_with(|| self.spawn(address));
        handle.clone()
    }

    fn spawn(&self, address: &EnforcerAddress) -> EnforcerHandle {
        debug!(address = ?address, "spawning enforcement instance");
        let entity_id = address.entity_id().clone();
        let (handle, task) = match address {
            EnforcerAddress::PolicyBacked(policy_id) => Enforcer::spawn(
                entity_id,
                PolicyEnforcer::new(policy_id.clone(), self.evaluator_factory.clone()),
                self.service.clone(),
                self.cache.clone(),
                self.config.clone(),
                self.shutdown.child_token(),
            ),
            EnforcerAddress::AclBacked(thing_id) => Enforcer::spawn(
                entity_id,
                AclEnforcer::new(thing_id.clone(), self.evaluator_factory.clone()),
                self.service.clone(),
                self.cache.clone(),
                self.config.clone(),
                self.shutdown.child_token(),
            ),
        };

        // Self-removal: once the task ends the map entry is dropped so the
        // next access creates a fresh instance.
        let instances = self.instances.clone();
        let address = address.clone();
        tokio::spawn(async move {
            let _ = task.await;
            instances.remove(&address);
        });

        handle
    }

    pub fn active_instances(&self) -> usize {
        self.instances.len()
    }

    pub fn contains(&self, address: &EnforcerAddress) -> bool {
        self.instances.contains_key(address)
    }

    /// Stop all instances; used on node shutdown.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
