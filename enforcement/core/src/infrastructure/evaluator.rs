// Copyright (c) 2026 TwinGuard Project
// SPDX-License-Identifier: AGPL-3.0
//! # Static Policy Evaluator
//!
//! A reference implementation of the external permission-evaluator contract,
//! backed by a flat grant table. Production deployments plug in the real
//! policy engine; this one serves tests and single-process wiring.
//!
//! Document format:
//!
//! ```json
//! {
//!   "grants": [
//!     {"subject": "iot:user", "resource": "thing", "path": "/attributes", "permissions": ["READ", "WRITE"]}
//!   ]
//! }
//! ```
//!
//! Grant semantics follow the enforcement algebra: grants are keyed by
//! resource (type plus path), a grant on a path covers the whole sub-tree
//! below it (unrestricted), and counts partially towards any ancestor (the
//! response filter redacts the rest). `resource` defaults to `thing`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;

use crate::domain::entity::{ResourcePath, ResourceType};
use crate::domain::permission::{
    AuthorizationContext, EvaluatorError, Permission, PolicyEvaluator, PolicyEvaluatorFactory,
    Subject,
};

fn default_grant_resource() -> ResourceType {
    ResourceType::Thing
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Grant {
    subject: Subject,
    #[serde(default = "default_grant_resource")]
    resource: ResourceType,
    path: ResourcePath,
    permissions: Vec<Permission>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GrantDocument {
    grants: Vec<Grant>,
}

/// Grant-table evaluator compiled from a [`GrantDocument`].
pub struct StaticPolicyEvaluator {
    grants: Vec<Grant>,
}

impl StaticPolicyEvaluator {
    pub fn from_document(document: &Value) -> Result<Self, EvaluatorError> {
        let parsed: GrantDocument = serde_json::from_value(document.clone())
            .map_err(|e| EvaluatorError::InvalidDocument(e.to_string()))?;
        Ok(Self {
            grants: parsed.grants,
        })
    }

    fn grants_for<'a>(
        &'a self,
        ctx: &'a AuthorizationContext,
        resource_type: ResourceType,
        permission: Permission,
    ) -> impl Iterator<Item = &'a Grant> + 'a {
        self.grants.iter().filter(move |g| {
            g.resource == resource_type
                && g.permissions.contains(&permission)
                && ctx.subjects().iter().any(|s| s == &g.subject)
        })
    }

    fn view_node(
        &self,
        value: &Value,
        resource_type: ResourceType,
        path: &ResourcePath,
        ctx: &AuthorizationContext,
    ) -> Option<Value> {
        if self.has_unrestricted_permission(ctx, resource_type, path, Permission::Read) {
            return Some(value.clone());
        }
        if let Value::Object(map) = value {
            let mut kept = Map::new();
            for (key, child) in map {
                let child_path = path.join(key);
                if let Some(view) = self.view_node(child, resource_type, &child_path, ctx) {
                    kept.insert(key.clone(), view);
                }
            }
            if !kept.is_empty() {
                return Some(Value::Object(kept));
            }
        }
        None
    }
}

impl PolicyEvaluator for StaticPolicyEvaluator {
    fn subjects_with_permission(
        &self,
        resource_type: ResourceType,
        path: &ResourcePath,
        permission: Permission,
    ) -> HashSet<Subject> {
        self.grants
            .iter()
            .filter(|g| {
                g.resource == resource_type
                    && g.permissions.contains(&permission)
                    && g.path.overlaps(path)
            })
            .map(|g| g.subject.clone())
            .collect()
    }

    fn has_unrestricted_permission(
        &self,
        ctx: &AuthorizationContext,
        resource_type: ResourceType,
        path: &ResourcePath,
        permission: Permission,
    ) -> bool {
        self.grants_for(ctx, resource_type, permission)
            .any(|g| g.path.is_prefix_of(path))
    }

    fn has_partial_permission(
        &self,
        ctx: &AuthorizationContext,
        resource_type: ResourceType,
        path: &ResourcePath,
        permission: Permission,
    ) -> bool {
        self.grants_for(ctx, resource_type, permission)
            .any(|g| g.path.overlaps(path))
    }

    fn build_json_view(
        &self,
        object: &Value,
        ctx: &AuthorizationContext,
        resource_type: ResourceType,
    ) -> Value {
        self.view_node(object, resource_type, &ResourcePath::root(), ctx)
            .unwrap_or_else(|| Value::Object(Map::new()))
    }
}

/// Factory compiling [`GrantDocument`]s into [`StaticPolicyEvaluator`]s.
#[derive(Debug, Clone, Default)]
pub struct StaticEvaluatorFactory;

impl PolicyEvaluatorFactory for StaticEvaluatorFactory {
    fn compile(&self, policy: &Value) -> Result<Arc<dyn PolicyEvaluator>, EvaluatorError> {
        Ok(Arc::new(StaticPolicyEvaluator::from_document(policy)?))
    }
}

/// Convenience constructor for thing-resource grant documents, used
/// throughout the tests.
pub fn grant_document(grants: &[(&str, &str, &[Permission])]) -> Value {
    let grants: Vec<Value> = grants
        .iter()
        .map(|(subject, path, permissions)| {
            serde_json::json!({
                "subject": subject,
                "path": path,
                "permissions": permissions,
            })
        })
        .collect();
    serde_json::json!({ "grants": grants })
}

/// Like [`grant_document`], with an explicit resource type per grant.
pub fn typed_grant_document(grants: &[(&str, ResourceType, &str, &[Permission])]) -> Value {
    let grants: Vec<Value> = grants
        .iter()
        .map(|(subject, resource, path, permissions)| {
            serde_json::json!({
                "subject": subject,
                "resource": resource,
                "path": path,
                "permissions": permissions,
            })
        })
        .collect();
    serde_json::json!({ "grants": grants })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn evaluator() -> StaticPolicyEvaluator {
        let doc = grant_document(&[
            ("iot:writer", "/a", &[Permission::Read, Permission::Write]),
            ("iot:leaf-reader", "/a/b", &[Permission::Read]),
        ]);
        StaticPolicyEvaluator::from_document(&doc).unwrap()
    }

    #[test]
    fn test_unrestricted_covers_subtree() {
        let e = evaluator();
        let ctx = AuthorizationContext::single("iot:writer");
        assert!(e.has_unrestricted_permission(
            &ctx,
            ResourceType::Thing,
            &ResourcePath::parse("/a/b"),
            Permission::Write
        ));
        assert!(!e.has_unrestricted_permission(
            &ctx,
            ResourceType::Thing,
            &ResourcePath::parse("/c"),
            Permission::Write
        ));
    }

    #[test]
    fn test_partial_counts_descendant_grants() {
        let e = evaluator();
        let ctx = AuthorizationContext::single("iot:leaf-reader");
        // Reading the root is partially allowed (the filter will redact).
        assert!(e.has_partial_permission(
            &ctx,
            ResourceType::Thing,
            &ResourcePath::root(),
            Permission::Read
        ));
        assert!(!e.has_unrestricted_permission(
            &ctx,
            ResourceType::Thing,
            &ResourcePath::root(),
            Permission::Read
        ));
    }

    #[test]
    fn test_subjects_with_permission() {
        let e = evaluator();
        let readers = e.subjects_with_permission(
            ResourceType::Thing,
            &ResourcePath::parse("/a"),
            Permission::Read,
        );
        assert!(readers.contains(&Subject::new("iot:writer")));
        assert!(readers.contains(&Subject::new("iot:leaf-reader")));
        let writers = e.subjects_with_permission(
            ResourceType::Thing,
            &ResourcePath::parse("/a"),
            Permission::Write,
        );
        assert_eq!(writers.len(), 1);
    }

    #[test]
    fn test_resource_types_partition_grants() {
        let doc = typed_grant_document(&[(
            "iot:thing-reader",
            ResourceType::Thing,
            "/",
            &[Permission::Read],
        )]);
        let e = StaticPolicyEvaluator::from_document(&doc).unwrap();
        let ctx = AuthorizationContext::single("iot:thing-reader");
        let root = ResourcePath::root();

        assert!(e.has_unrestricted_permission(&ctx, ResourceType::Thing, &root, Permission::Read));
        assert!(!e.has_unrestricted_permission(&ctx, ResourceType::Policy, &root, Permission::Read));
        assert!(e
            .subjects_with_permission(ResourceType::Policy, &root, Permission::Read)
            .is_empty());
    }

    #[test]
    fn test_json_view_redacts_ungranted_fields() {
        let e = evaluator();
        let ctx = AuthorizationContext::single("iot:leaf-reader");
        let object = json!({"a": {"b": 1, "x": 2}, "c": 3});
        let view = e.build_json_view(&object, &ctx, ResourceType::Thing);
        assert_eq!(view, json!({"a": {"b": 1}}));
    }

    #[test]
    fn test_json_view_empty_without_grants() {
        let e = evaluator();
        let ctx = AuthorizationContext::single("iot:stranger");
        let view = e.build_json_view(&json!({"a": 1}), &ctx, ResourceType::Thing);
        assert_eq!(view, json!({}));
    }

    #[test]
    fn test_invalid_document_rejected() {
        assert!(StaticPolicyEvaluator::from_document(&json!({"nope": true})).is_err());
    }
}
