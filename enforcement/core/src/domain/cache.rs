// Copyright (c) 2026 TwinGuard Project
// SPDX-License-Identifier: AGPL-3.0
//! # Replicated Cache Entries
//!
//! Lightweight, revision-tagged projection of an entity's routing metadata.
//! Entries converge last-writer-wins by revision; the `deleted` flag marks a
//! deletion/recreation boundary across which revisions may restart.

use serde::{Deserialize, Serialize};

use super::entity::EntityId;

/// Schema generation that stores permissions as an inline ACL.
pub const SCHEMA_VERSION_LEGACY: u8 = 1;

/// Schema generation that references a separate policy entity.
pub const SCHEMA_VERSION_CURRENT: u8 = 2;

/// Routing metadata for one entity, held in the replicated cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub entity_id: EntityId,
    pub revision: i64,
    #[serde(default)]
    pub deleted: bool,
    pub schema_version: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<EntityId>,
}

impl CacheEntry {
    pub fn current(entity_id: EntityId, policy_id: EntityId, revision: i64) -> Self {
        Self {
            entity_id,
            revision,
            deleted: false,
            schema_version: SCHEMA_VERSION_CURRENT,
            policy_id: Some(policy_id),
        }
    }

    pub fn legacy(entity_id: EntityId, revision: i64) -> Self {
        Self {
            entity_id,
            revision,
            deleted: false,
            schema_version: SCHEMA_VERSION_LEGACY,
            policy_id: None,
        }
    }

    pub fn tombstone(entity_id: EntityId, revision: i64) -> Self {
        Self {
            entity_id,
            revision,
            deleted: true,
            schema_version: SCHEMA_VERSION_CURRENT,
            policy_id: None,
        }
    }

    pub fn is_legacy(&self) -> bool {
        self.schema_version == SCHEMA_VERSION_LEGACY
    }

    /// Last-writer-wins merge rule. A tombstone supersedes any live entry at
    /// the same or higher revision; otherwise the higher revision wins.
    pub fn supersedes(&self, existing: &CacheEntry) -> bool {
        if self.revision > existing.revision {
            return true;
        }
        self.revision == existing.revision && self.deleted && !existing.deleted
    }
}
