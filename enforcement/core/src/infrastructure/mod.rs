// Copyright (c) 2026 TwinGuard Project
// SPDX-License-Identifier: AGPL-3.0
//! Infrastructure Layer
//!
//! Replicated cache, entity-service boundary, the signal dispatcher and
//! configuration loading. The in-memory implementations double as test
//! fixtures and single-process wiring.

pub mod cache;
pub mod config;
pub mod dispatch;
pub mod entity_service;
pub mod evaluator;

pub use cache::{CacheError, InMemoryReplicatedCache, ReplicatedCache};
pub use config::{ConfigError, EnforcementConfig};
pub use dispatch::{DispatchError, SignalDispatcher};
pub use entity_service::{DocumentFetch, DocumentKind, EntityService, InMemoryEntityService};
pub use evaluator::{StaticEvaluatorFactory, StaticPolicyEvaluator};
