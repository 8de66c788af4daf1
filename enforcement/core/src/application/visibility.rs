// Copyright (c) 2026 TwinGuard Project
// SPDX-License-Identifier: AGPL-3.0
//! # Response Visibility
//!
//! Builds the caller-visible view of a response entity: the permission-model
//! filtered JSON view, widened by the always-safe whitelist fields of the
//! resource type (a caller who was allowed to query at all may always learn
//! the entity's id).

use serde_json::{Map, Value};

use crate::domain::entity::ResourceType;
use crate::domain::permission::{AuthorizationContext, PolicyEvaluator};

/// Filter `payload` through a compiled policy evaluator and re-attach the
/// whitelist fields from the original payload.
pub fn policy_filtered_view(
    evaluator: &dyn PolicyEvaluator,
    ctx: &AuthorizationContext,
    payload: &Value,
    resource_type: ResourceType,
) -> Value {
    let mut view = evaluator.build_json_view(payload, ctx, resource_type);
    apply_whitelist(&mut view, payload, resource_type);
    view
}

/// Copy the always-safe fields of `resource_type` from `original` into
/// `view`, without overwriting anything the filter already kept.
pub fn apply_whitelist(view: &mut Value, original: &Value, resource_type: ResourceType) {
    let Some(field) = resource_type.whitelisted_field() else {
        return;
    };
    let Value::Object(original_map) = original else {
        return;
    };
    let Some(safe_value) = original_map.get(field) else {
        return;
    };
    if !view.is_object() {
        *view = Value::Object(Map::new());
    }
    if let Value::Object(view_map) = view {
        view_map
            .entry(field.to_string())
            .or_insert_with(|| safe_value.clone());
    }
}
