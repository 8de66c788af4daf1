// Copyright (c) 2026 TwinGuard Project
// SPDX-License-Identifier: AGPL-3.0
//! # Signals
//!
//! The external message contract: commands, events and responses flowing
//! between the dispatcher, the enforcement state machines and the
//! authoritative entity service.
//!
//! `read_subjects` is computed by the core and overwritten before any
//! forward/publish; callers must not rely on a value they supply there.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

use super::cache::SCHEMA_VERSION_CURRENT;
use super::entity::{CorrelationId, EntityId, ResourcePath, ResourceType};
use super::permission::{AuthorizationContext, Subject};

/// Delivery path marker: `Twin` goes point-to-point to the persistence tier,
/// `Live` is broadcast over pub/sub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Twin,
    Live,
}

/// Classification of a protected signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignalKind {
    ModifyCommand {
        #[serde(default)]
        is_create: bool,
        /// The command can alter who is authorized (e.g. it touches the
        /// policy reference); forwarding it triggers a resynchronization.
        #[serde(default)]
        changes_authorization: bool,
        /// The command payload includes an ACL document (legacy schema).
        #[serde(default)]
        carries_acl: bool,
        /// Inline policy supplied with a thing-creation command; used for a
        /// one-shot authorization check when no enforcer state exists yet.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        inline_policy: Option<Value>,
    },
    QueryCommand,
    MessageCommand,
    Event,
}

/// A command, event or message crossing the enforcement boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// The protected entity this signal targets.
    pub entity_id: EntityId,
    pub correlation_id: CorrelationId,
    /// When the signal entered the enforcement tier.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    pub authorization_context: AuthorizationContext,
    /// Computed by the core; any caller-supplied value is discarded.
    #[serde(default)]
    pub read_subjects: HashSet<Subject>,
    pub resource_path: ResourcePath,
    pub resource_type: ResourceType,
    pub channel: Channel,
    #[serde(flatten)]
    pub kind: SignalKind,
    /// Trusted internal traffic; bypasses authorization.
    #[serde(default)]
    pub sudo: bool,
    pub schema_version: u8,
    pub payload: Value,
}

impl Signal {
    fn base(
        kind: SignalKind,
        entity_id: EntityId,
        ctx: AuthorizationContext,
        resource_type: ResourceType,
        path: ResourcePath,
        channel: Channel,
    ) -> Self {
        Self {
            entity_id,
            correlation_id: CorrelationId::generate(),
            timestamp: Utc::now(),
            authorization_context: ctx,
            read_subjects: HashSet::new(),
            resource_path: path,
            resource_type,
            channel,
            kind,
            sudo: false,
            schema_version: SCHEMA_VERSION_CURRENT,
            payload: Value::Null,
        }
    }

    pub fn modify(
        entity_id: EntityId,
        ctx: AuthorizationContext,
        resource_type: ResourceType,
        path: ResourcePath,
    ) -> Self {
        Self::base(
            SignalKind::ModifyCommand {
                is_create: false,
                changes_authorization: false,
                carries_acl: false,
                inline_policy: None,
            },
            entity_id,
            ctx,
            resource_type,
            path,
            Channel::Twin,
        )
    }

    pub fn create(entity_id: EntityId, ctx: AuthorizationContext, resource_type: ResourceType) -> Self {
        Self::base(
            SignalKind::ModifyCommand {
                is_create: true,
                changes_authorization: true,
                carries_acl: false,
                inline_policy: None,
            },
            entity_id,
            ctx,
            resource_type,
            ResourcePath::root(),
            Channel::Twin,
        )
    }

    pub fn query(
        entity_id: EntityId,
        ctx: AuthorizationContext,
        resource_type: ResourceType,
        path: ResourcePath,
    ) -> Self {
        Self::base(
            SignalKind::QueryCommand,
            entity_id,
            ctx,
            resource_type,
            path,
            Channel::Twin,
        )
    }

    pub fn message(entity_id: EntityId, ctx: AuthorizationContext, path: ResourcePath) -> Self {
        Self::base(
            SignalKind::MessageCommand,
            entity_id,
            ctx,
            ResourceType::Message,
            path,
            Channel::Live,
        )
    }

    pub fn live_event(
        entity_id: EntityId,
        ctx: AuthorizationContext,
        resource_type: ResourceType,
        path: ResourcePath,
    ) -> Self {
        Self::base(SignalKind::Event, entity_id, ctx, resource_type, path, Channel::Live)
    }

    pub fn with_correlation_id(mut self, id: CorrelationId) -> Self {
        self.correlation_id = id;
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_schema_version(mut self, version: u8) -> Self {
        self.schema_version = version;
        self
    }

    pub fn with_sudo(mut self) -> Self {
        self.sudo = true;
        self
    }

    pub fn is_create(&self) -> bool {
        matches!(self.kind, SignalKind::ModifyCommand { is_create: true, .. })
    }

    pub fn carries_acl(&self) -> bool {
        matches!(self.kind, SignalKind::ModifyCommand { carries_acl: true, .. })
    }

    pub fn changes_authorization(&self) -> bool {
        matches!(
            self.kind,
            SignalKind::ModifyCommand {
                changes_authorization: true,
                ..
            }
        )
    }

    pub fn is_live(&self) -> bool {
        self.channel == Channel::Live
    }
}

/// Response from the authoritative tier to a forwarded signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalResponse {
    pub correlation_id: CorrelationId,
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl SignalResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// What the enforcement tier hands back to the original caller on success.
#[derive(Debug, Clone, PartialEq)]
pub enum EnforcementOutcome {
    /// The signal was forwarded point-to-point; the authoritative response.
    Forwarded(SignalResponse),
    /// The signal was broadcast on the live channel.
    Published,
    /// A query completed; the filtered view of the response entity.
    QueryResult(Value),
}
