// Copyright (c) 2026 TwinGuard Project
// SPDX-License-Identifier: AGPL-3.0
//! Domain Layer
//!
//! Pure types and contracts of the enforcement tier: identities, signals,
//! permission models, cache entries, entity events and the error taxonomy.

pub mod cache;
pub mod entity;
pub mod error;
pub mod events;
pub mod permission;
pub mod signal;
