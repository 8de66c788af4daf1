// Copyright (c) 2026 TwinGuard Project
// SPDX-License-Identifier: AGPL-3.0
//! Application Layer
//!
//! The enforcement state machines (shared base plus the policy-backed and
//! ACL-backed variants), the lookup/routing layer and instance ownership.

pub mod acl_enforcer;
pub mod enforcer;
pub mod lookup;
pub mod policy_enforcer;
pub mod registry;
pub mod visibility;

pub use enforcer::{Decision, EnforcementVariant, Enforcer, EnforcerGone, EnforcerHandle, EventEffect};
pub use lookup::{EnforcerAddress, EnforcerLookup, EntityLookup, LookupContext, LookupError, LookupResult};
pub use registry::{DeliveryError, EnforcerRegistry};
