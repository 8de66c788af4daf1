// Copyright (c) 2026 TwinGuard Project
// SPDX-License-Identifier: AGPL-3.0
//! # Permission Model Contracts
//!
//! The enforcement tier does not implement the policy-evaluation algebra
//! itself; it consumes it through the [`PolicyEvaluator`] /
//! [`PolicyEvaluatorFactory`] interfaces. What *is* owned here is the legacy
//! [`AclDocument`] model, whose whole-entity granularity is simple enough to
//! evaluate directly.
//!
//! | Contract | Used for |
//! |----------|----------|
//! | `PolicyEvaluator` | grant lookup, partial/full permission checks, JSON views |
//! | `PolicyEvaluatorFactory` | compiling a policy JSON document into an evaluator |
//! | `AclDocument` | legacy ACL entities (whole-entity grants, `acl` field gated) |

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use super::entity::{ResourcePath, ResourceType};

/// A permission a subject may hold on a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Permission {
    Read,
    Write,
    Administrate,
}

/// A caller identity (e.g. `iot:solution-user`, `integration:hub`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subject(String);

impl Subject {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Subject {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The subjects a caller claims; consumed read-only by the core.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationContext {
    subjects: Vec<Subject>,
}

impl AuthorizationContext {
    pub fn new(subjects: Vec<Subject>) -> Self {
        Self { subjects }
    }

    pub fn single(subject: impl Into<String>) -> Self {
        Self {
            subjects: vec![Subject::new(subject)],
        }
    }

    pub fn subjects(&self) -> &[Subject] {
        &self.subjects
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }

    /// True when any claimed subject appears in `granted`.
    pub fn intersects(&self, granted: &HashSet<Subject>) -> bool {
        self.subjects.iter().any(|s| granted.contains(s))
    }
}

#[derive(Debug, Error)]
pub enum EvaluatorError {
    #[error("invalid policy document: {0}")]
    InvalidDocument(String),
}

/// Compiled permission model for a policy-backed entity.
///
/// Pure, synchronous and stateless per call; provided by the external
/// permission-evaluator component. Grants are keyed by resource — a resource
/// type plus a path — so a grant on the thing root says nothing about the
/// policy root or the message tree.
pub trait PolicyEvaluator: Send + Sync {
    /// All subjects holding `permission` somewhere at or below `path` of the
    /// given resource type.
    fn subjects_with_permission(
        &self,
        resource_type: ResourceType,
        path: &ResourcePath,
        permission: Permission,
    ) -> HashSet<Subject>;

    /// The context holds `permission` unconditionally on the exact resource.
    fn has_unrestricted_permission(
        &self,
        ctx: &AuthorizationContext,
        resource_type: ResourceType,
        path: &ResourcePath,
        permission: Permission,
    ) -> bool;

    /// The context holds `permission` on at least part of the resource
    /// (sub-tree grants count; the response filter redacts the rest).
    fn has_partial_permission(
        &self,
        ctx: &AuthorizationContext,
        resource_type: ResourceType,
        path: &ResourcePath,
        permission: Permission,
    ) -> bool;

    /// Filtered view of `object` keeping only the fields readable under `ctx`.
    fn build_json_view(
        &self,
        object: &Value,
        ctx: &AuthorizationContext,
        resource_type: ResourceType,
    ) -> Value;
}

/// Compiles a policy JSON document into a [`PolicyEvaluator`].
pub trait PolicyEvaluatorFactory: Send + Sync {
    fn compile(&self, policy: &Value) -> Result<Arc<dyn PolicyEvaluator>, EvaluatorError>;
}

/// A single legacy ACL grant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclEntry {
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub write: bool,
    #[serde(default)]
    pub administrate: bool,
}

impl AclEntry {
    pub fn grants(&self, permission: Permission) -> bool {
        match permission {
            Permission::Read => self.read,
            Permission::Write => self.write,
            Permission::Administrate => self.administrate,
        }
    }
}

/// Legacy access-control list: subject → grant, whole-entity granularity.
///
/// An ACL document is only valid while at least one entry holds ADMINISTRATE;
/// entry-level patches that would orphan the document are refused upstream,
/// so [`AclDocument::validate`] is a consistency check rather than a gate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AclDocument {
    entries: HashMap<Subject, AclEntry>,
}

impl AclDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(value: &Value) -> Result<Self, EvaluatorError> {
        serde_json::from_value(value.clone())
            .map_err(|e| EvaluatorError::InvalidDocument(e.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, subject: &Subject) -> Option<&AclEntry> {
        self.entries.get(subject)
    }

    pub fn set_entry(&mut self, subject: Subject, entry: AclEntry) {
        self.entries.insert(subject, entry);
    }

    pub fn remove_entry(&mut self, subject: &Subject) {
        self.entries.remove(subject);
    }

    pub fn validate(&self) -> Result<(), EvaluatorError> {
        if self.entries.values().any(|e| e.administrate) {
            Ok(())
        } else {
            Err(EvaluatorError::InvalidDocument(
                "ACL must contain at least one ADMINISTRATE entry".to_string(),
            ))
        }
    }

    pub fn subjects_with(&self, permission: Permission) -> HashSet<Subject> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.grants(permission))
            .map(|(subject, _)| subject.clone())
            .collect()
    }

    /// ACLs have no path granularity: a grant covers the whole entity, so
    /// partial and unrestricted checks coincide.
    pub fn has_permission(&self, ctx: &AuthorizationContext, permission: Permission) -> bool {
        ctx.subjects()
            .iter()
            .any(|s| self.entries.get(s).is_some_and(|e| e.grants(permission)))
    }

    /// Whole-entity view for a reader: everything when READ is held, with the
    /// `acl` field stripped unless the reader also holds ADMINISTRATE.
    pub fn build_view(&self, object: &Value, ctx: &AuthorizationContext) -> Value {
        if !self.has_permission(ctx, Permission::Read) {
            return Value::Object(serde_json::Map::new());
        }
        let mut view = object.clone();
        if !self.has_permission(ctx, Permission::Administrate) {
            if let Value::Object(map) = &mut view {
                map.remove("acl");
            }
        }
        view
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn acl_with(subject: &str, read: bool, write: bool, administrate: bool) -> AclDocument {
        let mut acl = AclDocument::new();
        acl.set_entry(
            Subject::new(subject),
            AclEntry {
                read,
                write,
                administrate,
            },
        );
        acl
    }

    #[test]
    fn test_acl_grants_per_permission() {
        let acl = acl_with("iot:user", true, false, false);
        let ctx = AuthorizationContext::single("iot:user");

        assert!(acl.has_permission(&ctx, Permission::Read));
        assert!(!acl.has_permission(&ctx, Permission::Write));
        assert!(!acl.has_permission(&ctx, Permission::Administrate));
    }

    #[test]
    fn test_acl_unknown_subject_denied() {
        let acl = acl_with("iot:user", true, true, true);
        let ctx = AuthorizationContext::single("iot:stranger");

        assert!(!acl.has_permission(&ctx, Permission::Read));
    }

    #[test]
    fn test_acl_subjects_with_permission() {
        let mut acl = acl_with("iot:admin", true, true, true);
        acl.set_entry(
            Subject::new("iot:reader"),
            AclEntry {
                read: true,
                ..Default::default()
            },
        );

        let readers = acl.subjects_with(Permission::Read);
        assert_eq!(readers.len(), 2);
        let admins = acl.subjects_with(Permission::Administrate);
        assert_eq!(admins.len(), 1);
        assert!(admins.contains(&Subject::new("iot:admin")));
    }

    #[test]
    fn test_acl_validate_requires_administrate() {
        let acl = acl_with("iot:reader", true, false, false);
        assert!(acl.validate().is_err());

        let acl = acl_with("iot:admin", true, true, true);
        assert!(acl.validate().is_ok());
    }

    #[test]
    fn test_acl_view_strips_acl_field_without_administrate() {
        let acl = acl_with("iot:reader", true, false, false);
        let ctx = AuthorizationContext::single("iot:reader");
        let object = json!({"thingId": "t1", "attributes": {"a": 1}, "acl": {"iot:reader": {"read": true}}});

        let view = acl.build_view(&object, &ctx);
        assert_eq!(view["thingId"], "t1");
        assert!(view.get("acl").is_none());
    }

    #[test]
    fn test_acl_view_empty_without_read() {
        let acl = acl_with("iot:writer", false, true, false);
        let ctx = AuthorizationContext::single("iot:writer");
        let object = json!({"thingId": "t1"});

        let view = acl.build_view(&object, &ctx);
        assert_eq!(view, json!({}));
    }

    #[test]
    fn test_acl_json_round() {
        let value = json!({
            "iot:admin": {"read": true, "write": true, "administrate": true}
        });
        let acl = AclDocument::from_json(&value).unwrap();
        assert!(acl.has_permission(
            &AuthorizationContext::single("iot:admin"),
            Permission::Administrate
        ));
    }
}
