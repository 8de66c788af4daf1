// Copyright (c) 2026 TwinGuard Project
// SPDX-License-Identifier: AGPL-3.0
//! # Authoritative Entity Events
//!
//! Events emitted by the entity service that the enforcement state machines
//! observe to keep their permission models current without polling. Policy
//! events carry whole documents (full rebuild); ACL events may be entry-level
//! (incremental patch).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::entity::EntityId;
use super::permission::{AclDocument, AclEntry, Subject};

/// An authoritative event observed by an enforcement instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntityEvent {
    PolicyCreated {
        policy_id: EntityId,
        policy: Value,
        revision: i64,
    },
    PolicyModified {
        policy_id: EntityId,
        policy: Value,
        revision: i64,
    },
    PolicyDeleted {
        policy_id: EntityId,
        revision: i64,
    },
    AclModified {
        thing_id: EntityId,
        acl: AclDocument,
        revision: i64,
    },
    AclEntryCreated {
        thing_id: EntityId,
        subject: Subject,
        entry: AclEntry,
        revision: i64,
    },
    AclEntryModified {
        thing_id: EntityId,
        subject: Subject,
        entry: AclEntry,
        revision: i64,
    },
    AclEntryDeleted {
        thing_id: EntityId,
        subject: Subject,
        revision: i64,
    },
    ThingDeleted {
        thing_id: EntityId,
        revision: i64,
    },
}

impl EntityEvent {
    /// The entity this event concerns (the policy id for policy events, the
    /// thing id for ACL and thing events).
    pub fn entity_id(&self) -> &EntityId {
        match self {
            EntityEvent::PolicyCreated { policy_id, .. }
            | EntityEvent::PolicyModified { policy_id, .. }
            | EntityEvent::PolicyDeleted { policy_id, .. } => policy_id,
            EntityEvent::AclModified { thing_id, .. }
            | EntityEvent::AclEntryCreated { thing_id, .. }
            | EntityEvent::AclEntryModified { thing_id, .. }
            | EntityEvent::AclEntryDeleted { thing_id, .. }
            | EntityEvent::ThingDeleted { thing_id, .. } => thing_id,
        }
    }

    pub fn revision(&self) -> i64 {
        match self {
            EntityEvent::PolicyCreated { revision, .. }
            | EntityEvent::PolicyModified { revision, .. }
            | EntityEvent::PolicyDeleted { revision, .. }
            | EntityEvent::AclModified { revision, .. }
            | EntityEvent::AclEntryCreated { revision, .. }
            | EntityEvent::AclEntryModified { revision, .. }
            | EntityEvent::AclEntryDeleted { revision, .. }
            | EntityEvent::ThingDeleted { revision, .. } => *revision,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_accessors() {
        let event = EntityEvent::PolicyModified {
            policy_id: EntityId::new("policy:1"),
            policy: json!({}),
            revision: 7,
        };
        assert_eq!(event.entity_id().as_str(), "policy:1");
        assert_eq!(event.revision(), 7);
    }

    #[test]
    fn test_event_serde_tagging() {
        let event = EntityEvent::ThingDeleted {
            thing_id: EntityId::new("thing:1"),
            revision: 3,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "thing_deleted");
    }
}
