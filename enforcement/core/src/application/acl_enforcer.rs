// Copyright (c) 2026 TwinGuard Project
// SPDX-License-Identifier: AGPL-3.0
//! # ACL-Backed Enforcement Variant (legacy schema)
//!
//! Permission model is the thing's own ACL document, whole-entity
//! granularity. Three special cases distinguish this variant:
//!
//! - `CreateThing` is authorized unconditionally while no ACL is known yet
//!   (first-write bootstrapping);
//! - a modify command carrying an ACL payload requires ADMINISTRATE or
//!   WRITE instead of plain WRITE;
//! - an inline policy supplied with a thing-creation command is used for a
//!   one-shot authorization check without ever becoming the instance's model.
//!
//! ACL entry-level events are patched incrementally; a whole-ACL event
//! replaces the document; a thing-deleted event terminates the instance.

use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::application::enforcer::{Decision, EnforcementVariant, EventEffect};
use crate::application::visibility::apply_whitelist;
use crate::domain::entity::{EntityId, ResourcePath, ResourceType};
use crate::domain::error::{RejectionCause, RejectionError, SyncError};
use crate::domain::events::EntityEvent;
use crate::domain::permission::{
    AclDocument, AuthorizationContext, Permission, PolicyEvaluatorFactory, Subject,
};
use crate::domain::signal::{Signal, SignalKind};
use crate::infrastructure::entity_service::{DocumentFetch, DocumentKind};

pub struct AclEnforcer {
    thing_id: EntityId,
    /// Needed only for the one-shot inline-policy check on creation.
    factory: Arc<dyn PolicyEvaluatorFactory>,
    acl: Option<AclDocument>,
}

impl AclEnforcer {
    pub fn new(thing_id: EntityId, factory: Arc<dyn PolicyEvaluatorFactory>) -> Self {
        Self {
            thing_id,
            factory,
            acl: None,
        }
    }

    fn reject(signal: &Signal, cause: RejectionCause) -> RejectionError {
        let path = signal.resource_path.to_string();
        match &signal.kind {
            SignalKind::ModifyCommand { .. } => RejectionError::ThingNotModifiable { path, cause },
            SignalKind::QueryCommand => RejectionError::ThingNotAccessible { path, cause },
            SignalKind::MessageCommand => RejectionError::MessageNotSendable { path, cause },
            SignalKind::Event => RejectionError::EventNotSendable { path, cause },
        }
    }

    /// One-shot check of a creation command against its inline policy. The
    /// compiled evaluator is discarded; the instance's model comes from the
    /// authoritative tier only.
    fn authorize_create(&self, signal: &Signal, inline_policy: Option<&Value>) -> Decision {
        let Some(policy) = inline_policy else {
            // First-write bootstrapping: nothing to check against yet.
            return Decision::Forward { resync: true };
        };
        match self.factory.compile(policy) {
            Ok(evaluator) => {
                if evaluator.has_unrestricted_permission(
                    &signal.authorization_context,
                    ResourceType::Thing,
                    &ResourcePath::root(),
                    Permission::Write,
                ) {
                    Decision::Forward { resync: true }
                } else {
                    Decision::Reject(Self::reject(signal, RejectionCause::InsufficientGrant))
                }
            }
            Err(e) => {
                debug!(thing_id = %self.thing_id, error = %e, "inline policy rejected");
                Decision::Reject(Self::reject(signal, RejectionCause::InsufficientGrant))
            }
        }
    }
}

impl EnforcementVariant for AclEnforcer {
    fn document_kind(&self) -> DocumentKind {
        DocumentKind::Acl
    }

    fn variant_name(&self) -> &'static str {
        "acl"
    }

    fn install(&mut self, fetch: DocumentFetch) -> Result<Option<i64>, SyncError> {
        match fetch {
            DocumentFetch::Found { document, revision } => {
                self.acl = Some(AclDocument::from_json(&document)?);
                Ok(Some(revision))
            }
            DocumentFetch::Missing => {
                self.acl = None;
                Ok(None)
            }
        }
    }

    fn clear(&mut self) {
        self.acl = None;
    }

    fn model_present(&self) -> bool {
        self.acl.is_some()
    }

    fn authorize(&self, signal: &Signal) -> Decision {
        let ctx = &signal.authorization_context;
        match (&signal.kind, &self.acl) {
            (
                SignalKind::ModifyCommand {
                    is_create: true,
                    inline_policy,
                    ..
                },
                None,
            ) => self.authorize_create(signal, inline_policy.as_ref()),
            (SignalKind::ModifyCommand { .. }, None) => Decision::Reject(Self::reject(
                signal,
                RejectionCause::MissingPermissionDocument,
            )),
            (
                SignalKind::ModifyCommand {
                    carries_acl,
                    changes_authorization,
                    ..
                },
                Some(acl),
            ) => {
                let allowed = if *carries_acl {
                    acl.has_permission(ctx, Permission::Administrate)
                        || acl.has_permission(ctx, Permission::Write)
                } else {
                    acl.has_permission(ctx, Permission::Write)
                };
                if allowed {
                    Decision::Forward {
                        resync: *carries_acl || *changes_authorization,
                    }
                } else {
                    Decision::Reject(Self::reject(signal, RejectionCause::InsufficientGrant))
                }
            }
            (SignalKind::QueryCommand, None) => Decision::Reject(Self::reject(
                signal,
                RejectionCause::MissingPermissionDocument,
            )),
            (SignalKind::QueryCommand, Some(acl)) => {
                if acl.has_permission(ctx, Permission::Read) {
                    Decision::Query
                } else {
                    Decision::Reject(Self::reject(signal, RejectionCause::InsufficientGrant))
                }
            }
            (SignalKind::MessageCommand | SignalKind::Event, None) => Decision::Reject(
                Self::reject(signal, RejectionCause::MissingPermissionDocument),
            ),
            (SignalKind::MessageCommand, Some(acl)) => {
                if acl.has_permission(ctx, Permission::Write) {
                    Decision::Publish
                } else {
                    Decision::Reject(Self::reject(signal, RejectionCause::InsufficientGrant))
                }
            }
            (SignalKind::Event, Some(acl)) => {
                if acl.has_permission(ctx, Permission::Write) {
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

    fn read_subjects(&self, _signal: &Signal) -> HashSet<Subject> {
        match &self.acl {
            Some(acl) => acl.subjects_with(Permission::Read),
            None => HashSet::new(),
        }
    }

    fn apply_event(&mut self, event: &EntityEvent) -> EventEffect {
        match event {
            EntityEvent::AclModified { acl, revision, .. } => {
                self.acl = Some(acl.clone());
                EventEffect::Applied {
                    revision: *revision,
                }
            }
            EntityEvent::AclEntryCreated {
                subject,
                entry,
                revision,
                ..
            }
            | EntityEvent::AclEntryModified {
                subject,
                entry,
                revision,
                ..
            } => match &mut self.acl {
                Some(acl) => {
                    acl.set_entry(subject.clone(), *entry);
                    EventEffect::Applied {
                        revision: *revision,
                    }
                }
                None => EventEffect::ReloadRequired,
            },
            EntityEvent::AclEntryDeleted {
                subject, revision, ..
            } => match &mut self.acl {
                Some(acl) => {
                    acl.remove_entry(subject);
                    EventEffect::Applied {
                        revision: *revision,
                    }
                }
                None => EventEffect::ReloadRequired,
            },
            EntityEvent::ThingDeleted { .. } => EventEffect::Terminate,
            _ => EventEffect::Ignored,
        }
    }

    fn filter_response(
        &self,
        ctx: &AuthorizationContext,
        payload: &Value,
        resource_type: ResourceType,
    ) -> Value {
        let mut view = match &self.acl {
            Some(acl) => acl.build_view(payload, ctx),
            None => Value::Object(Map::new()),
        };
        apply_whitelist(&mut view, payload, resource_type);
        view
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::permission::AclEntry;
    use crate::infrastructure::evaluator::{grant_document, StaticEvaluatorFactory};
    use serde_json::json;

    fn enforcer() -> AclEnforcer {
        AclEnforcer::new(EntityId::new("thing:1"), Arc::new(StaticEvaluatorFactory))
    }

    fn loaded(acl: Value) -> AclEnforcer {
        let mut e = enforcer();
        e.install(DocumentFetch::Found {
            document: acl,
            revision: 1,
        })
        .unwrap();
        e
    }

    fn writer_acl() -> Value {
        json!({"iot:owner": {"read": true, "write": true, "administrate": true}})
    }

    #[test]
    fn test_create_without_acl_is_bootstrap_authorized() {
        let e = enforcer();
        let signal = Signal::create(
            EntityId::new("thing:1"),
            AuthorizationContext::single("iot:anyone"),
            ResourceType::Thing,
        );
        assert!(matches!(
            e.authorize(&signal),
            Decision::Forward { resync: true }
        ));
    }

    #[test]
    fn test_create_with_inline_policy_checks_it_once() {
        let e = enforcer();
        let policy = grant_document(&[("iot:creator", "/", &[Permission::Write])]);

        let mut allowed = Signal::create(
            EntityId::new("thing:1"),
            AuthorizationContext::single("iot:creator"),
            ResourceType::Thing,
        );
        allowed.kind = SignalKind::ModifyCommand {
            is_create: true,
            changes_authorization: true,
            carries_acl: false,
            inline_policy: Some(policy.clone()),
        };
        assert!(matches!(e.authorize(&allowed), Decision::Forward { .. }));
        // The inline policy never becomes the model.
        assert!(!e.model_present());

        let mut denied = allowed.clone();
        denied.authorization_context = AuthorizationContext::single("iot:stranger");
        assert!(matches!(e.authorize(&denied), Decision::Reject(_)));
    }

    #[test]
    fn test_modify_without_acl_rejected() {
        let e = enforcer();
        let signal = Signal::modify(
            EntityId::new("thing:1"),
            AuthorizationContext::single("iot:user"),
            ResourceType::Thing,
            ResourcePath::parse("/attributes"),
        );
        match e.authorize(&signal) {
            Decision::Reject(r) => assert_eq!(r.cause(), RejectionCause::MissingPermissionDocument),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_acl_modify_requires_administrate_or_write() {
        let acl = json!({
            "iot:admin": {"read": true, "administrate": true},
            "iot:reader": {"read": true}
        });
        let e = loaded(acl);

        let mut signal = Signal::modify(
            EntityId::new("thing:1"),
            AuthorizationContext::single("iot:admin"),
            ResourceType::Thing,
            ResourcePath::parse("/acl"),
        );
        signal.kind = SignalKind::ModifyCommand {
            is_create: false,
            changes_authorization: false,
            carries_acl: true,
            inline_policy: None,
        };
        // ADMINISTRATE suffices even without WRITE.
        assert!(matches!(
            e.authorize(&signal),
            Decision::Forward { resync: true }
        ));

        let mut denied = signal.clone();
        denied.authorization_context = AuthorizationContext::single("iot:reader");
        assert!(matches!(e.authorize(&denied), Decision::Reject(_)));
    }

    #[test]
    fn test_query_requires_read() {
        let e = loaded(writer_acl());
        let allowed = Signal::query(
            EntityId::new("thing:1"),
            AuthorizationContext::single("iot:owner"),
            ResourceType::Thing,
            ResourcePath::root(),
        );
        assert!(matches!(e.authorize(&allowed), Decision::Query));

        let denied = Signal::query(
            EntityId::new("thing:1"),
            AuthorizationContext::single("iot:stranger"),
            ResourceType::Thing,
            ResourcePath::root(),
        );
        assert!(matches!(e.authorize(&denied), Decision::Reject(_)));
    }

    #[test]
    fn test_entry_events_patch_incrementally() {
        let mut e = loaded(writer_acl());

        let effect = e.apply_event(&EntityEvent::AclEntryCreated {
            thing_id: EntityId::new("thing:1"),
            subject: Subject::new("iot:reader"),
            entry: AclEntry {
                read: true,
                ..Default::default()
            },
            revision: 2,
        });
        assert!(matches!(effect, EventEffect::Applied { revision: 2 }));
        let readers = e.read_subjects(&Signal::query(
            EntityId::new("thing:1"),
            AuthorizationContext::single("iot:owner"),
            ResourceType::Thing,
            ResourcePath::root(),
        ));
        assert!(readers.contains(&Subject::new("iot:reader")));

        let effect = e.apply_event(&EntityEvent::AclEntryDeleted {
            thing_id: EntityId::new("thing:1"),
            subject: Subject::new("iot:reader"),
            revision: 3,
        });
        assert!(matches!(effect, EventEffect::Applied { revision: 3 }));
    }

    #[test]
    fn test_entry_event_without_model_requires_reload() {
        let mut e = enforcer();
        let effect = e.apply_event(&EntityEvent::AclEntryDeleted {
            thing_id: EntityId::new("thing:1"),
            subject: Subject::new("iot:reader"),
            revision: 3,
        });
        assert!(matches!(effect, EventEffect::ReloadRequired));
    }

    #[test]
    fn test_thing_deleted_terminates() {
        let mut e = loaded(writer_acl());
        let effect = e.apply_event(&EntityEvent::ThingDeleted {
            thing_id: EntityId::new("thing:1"),
            revision: 4,
        });
        assert!(matches!(effect, EventEffect::Terminate));
    }

    #[test]
    fn test_filter_response_whole_entity() {
        let e = loaded(json!({"iot:reader": {"read": true}, "iot:admin": {"read": true, "write": true, "administrate": true}}));
        let payload = json!({"thingId": "thing:1", "attributes": {"a": 1}, "acl": {}});

        let reader_view =
            e.filter_response(&AuthorizationContext::single("iot:reader"), &payload, ResourceType::Thing);
        assert_eq!(reader_view["attributes"], json!({"a": 1}));
        assert!(reader_view.get("acl").is_none());

        let stranger_view =
            e.filter_response(&AuthorizationContext::single("iot:stranger"), &payload, ResourceType::Thing);
        assert_eq!(stranger_view, json!({"thingId": "thing:1"}));
    }
}
