// Copyright (c) 2026 TwinGuard Project
// SPDX-License-Identifier: AGPL-3.0
//! # Policy-Backed Enforcement Variant
//!
//! Permission model is a compiled policy evaluator loaded from the policy
//! entity owning the protected resource. Read-subject sets for the two root
//! resources (whole thing, whole policy) are precomputed on every rebuild so
//! that enriching root-addressed signals costs a clone instead of an
//! evaluator walk.

use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::application::enforcer::{Decision, EnforcementVariant, EventEffect};
use crate::application::visibility::{apply_whitelist, policy_filtered_view};
use crate::domain::entity::{EntityId, ResourcePath, ResourceType};
use crate::domain::error::{RejectionCause, RejectionError, SyncError};
use crate::domain::events::EntityEvent;
use crate::domain::permission::{
    AuthorizationContext, Permission, PolicyEvaluator, PolicyEvaluatorFactory, Subject,
};
use crate::domain::signal::{Signal, SignalKind};
use crate::infrastructure::entity_service::{DocumentFetch, DocumentKind};

/// Precomputed read-subject sets for the root resources.
struct RootReadSubjects {
    thing: HashSet<Subject>,
    policy: HashSet<Subject>,
}

pub struct PolicyEnforcer {
    policy_id: EntityId,
    factory: Arc<dyn PolicyEvaluatorFactory>,
    evaluator: Option<Arc<dyn PolicyEvaluator>>,
    root_read_subjects: Option<RootReadSubjects>,
}

impl PolicyEnforcer {
    pub fn new(policy_id: EntityId, factory: Arc<dyn PolicyEvaluatorFactory>) -> Self {
        Self {
            policy_id,
            factory,
            evaluator: None,
            root_read_subjects: None,
        }
    }

    fn rebuild(&mut self, document: &Value) -> Result<(), SyncError> {
        let evaluator = self.factory.compile(document)?;
        let root = ResourcePath::root();
        self.root_read_subjects = Some(RootReadSubjects {
            thing: evaluator.subjects_with_permission(ResourceType::Thing, &root, Permission::Read),
            policy: evaluator.subjects_with_permission(
                ResourceType::Policy,
                &root,
                Permission::Read,
            ),
        });
        self.evaluator = Some(evaluator);
        Ok(())
    }

    fn reject(signal: &Signal, cause: RejectionCause) -> RejectionError {
        let path = signal.resource_path.to_string();
        match (&signal.kind, signal.resource_type) {
            (SignalKind::ModifyCommand { .. }, ResourceType::Policy) => {
                RejectionError::PolicyNotModifiable { path, cause }
            }
            (SignalKind::ModifyCommand { .. }, _) => {
                RejectionError::ThingNotModifiable { path, cause }
            }
            (SignalKind::QueryCommand, ResourceType::Policy) => {
                RejectionError::PolicyNotAccessible { path, cause }
            }
            (SignalKind::QueryCommand, _) => RejectionError::ThingNotAccessible { path, cause },
            (SignalKind::MessageCommand, _) => RejectionError::MessageNotSendable { path, cause },
            (SignalKind::Event, _) => RejectionError::EventNotSendable { path, cause },
        }
    }
}

impl EnforcementVariant for PolicyEnforcer {
    fn document_kind(&self) -> DocumentKind {
        DocumentKind::Policy
    }

    fn variant_name(&self) -> &'static str {
        "policy"
    }

    fn install(&mut self, fetch: DocumentFetch) -> Result<Option<i64>, SyncError> {
        match fetch {
            DocumentFetch::Found { document, revision } => {
                self.rebuild(&document)?;
                Ok(Some(revision))
            }
            DocumentFetch::Missing => {
                self.evaluator = None;
                self.root_read_subjects = None;
                Ok(None)
            }
        }
    }

    fn clear(&mut self) {
        self.evaluator = None;
        self.root_read_subjects = None;
    }

    fn model_present(&self) -> bool {
        self.evaluator.is_some()
    }

    fn authorize(&self, signal: &Signal) -> Decision {
        let Some(evaluator) = &self.evaluator else {
            return Decision::Reject(Self::reject(
                signal,
                RejectionCause::MissingPermissionDocument,
            ));
        };
        let ctx = &signal.authorization_context;
        match &signal.kind {
            SignalKind::ModifyCommand {
                changes_authorization,
                ..
            } => {
                if evaluator.has_unrestricted_permission(
                    ctx,
                    signal.resource_type,
                    &signal.resource_path,
                    Permission::Write,
                ) {
                    Decision::Forward {
                        resync: *changes_authorization,
                    }
                } else {
                    Decision::Reject(Self::reject(signal, RejectionCause::InsufficientGrant))
                }
            }
            SignalKind::QueryCommand => {
                if evaluator.has_partial_permission(
                    ctx,
                    signal.resource_type,
                    &signal.resource_path,
                    Permission::Read,
                ) {
                    Decision::Query
                } else {
                    Decision::Reject(Self::reject(signal, RejectionCause::InsufficientGrant))
                }
            }
            SignalKind::MessageCommand => {
                if evaluator.has_unrestricted_permission(
                    ctx,
                    signal.resource_type,
                    &signal.resource_path,
                    Permission::Write,
                ) {
                    Decision::Publish
                } else {
                    Decision::Reject(Self::reject(signal, RejectionCause::InsufficientGrant))
                }
            }
            SignalKind::Event => {
                // Live events are gated on the root resource only.
                if evaluator.has_unrestricted_permission(
                    ctx,
                    signal.resource_type,
                    &ResourcePath::root(),
                    Permission::Write,
                ) {
                    if signal.is_live() {
                        Decision::Publish
                    } else {
                        Decision::Forward { resync: false }
                    }
                } else {
                    Decision::Reject(Self::reject(signal, RejectionCause::InsufficientGrant))
                }
            }
        }
    }

    fn read_subjects(&self, signal: &Signal) -> HashSet<Subject> {
        let Some(evaluator) = &self.evaluator else {
            return HashSet::new();
        };
        if signal.resource_path.is_root() {
            if let Some(cached) = &self.root_read_subjects {
                return match signal.resource_type {
                    ResourceType::Thing => cached.thing.clone(),
                    ResourceType::Policy => cached.policy.clone(),
                    ResourceType::Message => evaluator.subjects_with_permission(
                        ResourceType::Message,
                        &signal.resource_path,
                        Permission::Read,
                    ),
                };
            }
        }
        evaluator.subjects_with_permission(
            signal.resource_type,
            &signal.resource_path,
            Permission::Read,
        )
    }

    fn apply_event(&mut self, event: &EntityEvent) -> EventEffect {
        match event {
            EntityEvent::PolicyCreated {
                policy, revision, ..
            }
            | EntityEvent::PolicyModified {
                policy, revision, ..
            } => match self.rebuild(policy) {
                Ok(()) => EventEffect::Applied {
                    revision: *revision,
                },
                Err(e) => {
                    // An event that does not carry a compilable document is
                    // treated as "reload required", not as corruption.
                    debug!(policy_id = %self.policy_id, error = %e, "policy event not applicable in place");
                    EventEffect::ReloadRequired
                }
            },
            EntityEvent::PolicyDeleted { .. } => EventEffect::Terminate,
            _ => EventEffect::Ignored,
        }
    }

    fn filter_response(
        &self,
        ctx: &AuthorizationContext,
        payload: &Value,
        resource_type: ResourceType,
    ) -> Value {
        match &self.evaluator {
            Some(evaluator) => policy_filtered_view(evaluator.as_ref(), ctx, payload, resource_type),
            None => {
                let mut view = Value::Object(Map::new());
                apply_whitelist(&mut view, payload, resource_type);
                view
            }
        }
    }
}
