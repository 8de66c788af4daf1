// Copyright (c) 2026 TwinGuard Project
// SPDX-License-Identifier: AGPL-3.0
//! # TwinGuard Enforcement Core
//!
//! Authorization-enforcement tier of the TwinGuard digital-twin platform.
//! One enforcement instance runs per protected entity (Thing or Policy); it
//! decides whether commands, queries and events may reach the authoritative
//! persistence tier, filters responses down to the fields the requester may
//! see, and keeps its in-memory permission model synchronized with the
//! authoritative policy/ACL document through an eventually-consistent
//! replicated cache.
//!
//! # Architecture
//!
//! - **Layer: domain** — identities, signals, permission models, cache
//!   entries, entity events, error taxonomy.
//! - **Layer: application** — the enforcement state machines (policy-backed
//!   and ACL-backed), lookup/routing and instance ownership.
//! - **Layer: infrastructure** — replicated cache, entity-service boundary,
//!   dispatcher and configuration.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use domain::*;
