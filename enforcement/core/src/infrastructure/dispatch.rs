// Copyright (c) 2026 TwinGuard Project
// SPDX-License-Identifier: AGPL-3.0
//! # Signal Dispatcher
//!
//! Thin front end: resolve the target enforcer address for a signal's entity
//! and deliver it. The only routing decision made here is for creation
//! commands addressing entities the lookup cannot resolve yet — those are
//! routed by the command itself (legacy schema or ACL payload goes to the
//! ACL-backed variant, everything else to the policy-backed one).

use thiserror::Error;
use tracing::debug;

use crate::application::enforcer::EnforcementReply;
use crate::application::lookup::{EnforcerAddress, EnforcerLookup, LookupContext, LookupError};
use crate::application::registry::{DeliveryError, EnforcerRegistry};
use crate::domain::cache::SCHEMA_VERSION_LEGACY;
use crate::domain::entity::EntityId;
use crate::domain::signal::{Signal, SignalKind};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

pub struct SignalDispatcher {
    lookup: EnforcerLookup,
    registry: EnforcerRegistry,
}

impl SignalDispatcher {
    pub fn new(lookup: EnforcerLookup, registry: EnforcerRegistry) -> Self {
        Self { lookup, registry }
    }

    pub fn registry(&self) -> &EnforcerRegistry {
        &self.registry
    }

    /// Route `signal` to the enforcement instance responsible for its entity
    /// and await the enforcement outcome.
    pub async fn dispatch(&self, signal: Signal) -> Result<EnforcementReply, DispatchError> {
        let ctx = LookupContext::new(signal.correlation_id.clone());
        let address = match self.lookup.resolve(&signal.entity_id, &ctx).await {
            Ok(address) => address,
            Err(LookupError::NotFound(_)) if signal.is_create() => {
                let address = Self::route_create(&signal);
                debug!(
                    entity_id = %signal.entity_id,
                    address = ?address,
                    "creation command for unknown entity; routing by command"
                );
                address
            }
            Err(e) => return Err(e.into()),
        };
        Ok(self.registry.deliver(&address, signal).await?)
    }

    fn route_create(signal: &Signal) -> EnforcerAddress {
        if signal.schema_version == SCHEMA_VERSION_LEGACY || signal.carries_acl() {
            return EnforcerAddress::AclBacked(signal.entity_id.clone());
        }
        // Prefer the policy the creation command names; fall back to an
        // implicit policy sharing the entity's id.
        let policy_id = match &signal.kind {
            SignalKind::ModifyCommand { .. } => signal
                .payload
                .get("policyId")
                .and_then(|v| v.as_str())
                .map(EntityId::new),
            _ => None,
        };
        EnforcerAddress::PolicyBacked(policy_id.unwrap_or_else(|| signal.entity_id.clone()))
    }
}
