// Copyright (c) 2026 TwinGuard Project
// SPDX-License-Identifier: AGPL-3.0
//! # Entity Identity & Addressing
//!
//! Identifier newtypes shared across the enforcement tier: stable entity ids,
//! slash-separated resource paths, correlation ids and the revision sentinel.
//!
//! Enforcement instances are addressed by the last path segment of their
//! enforcement address; [`EntityId::from_address_segment`] performs the
//! URL-decoding step mandated by the addressing contract.

use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Revision sentinel for "no authoritative document seen yet".
pub const UNKNOWN_REVISION: i64 = -1;

/// Stable identifier of a protected entity (a Thing or a Policy).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Decode an entity id from the last path segment of an enforcement
    /// address. Segments arrive percent-encoded (ids may contain `:` and `/`).
    pub fn from_address_segment(segment: &str) -> Self {
        let decoded = percent_decode_str(segment).decode_utf8_lossy();
        Self(decoded.into_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Correlation id propagated end to end; generated when a caller omits one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The kind of resource a signal addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Thing,
    Policy,
    Message,
}

impl ResourceType {
    /// Field that is always safe to reveal for this resource type, regardless
    /// of the requester's grants.
    pub fn whitelisted_field(&self) -> Option<&'static str> {
        match self {
            ResourceType::Thing => Some("thingId"),
            ResourceType::Policy => Some("policyId"),
            ResourceType::Message => None,
        }
    }
}

/// Slash-separated path addressing a resource or sub-resource of an entity.
///
/// The empty path (`/`) addresses the entity root. Paths support
/// ancestor/descendant queries, which is what partial permission grants are
/// resolved against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ResourcePath(Vec<String>);

impl ResourcePath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn parse(path: &str) -> Self {
        Self(
            path.split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn join(&self, segment: &str) -> ResourcePath {
        let mut segments = self.0.clone();
        segments.push(segment.to_string());
        ResourcePath(segments)
    }

    /// True when `self` is `other` or an ancestor of `other`.
    pub fn is_prefix_of(&self, other: &ResourcePath) -> bool {
        other.0.len() >= self.0.len() && other.0[..self.0.len()] == self.0[..]
    }

    /// True when `self` and `other` lie on the same root-to-leaf line.
    ///
    /// A grant on `/a` covers `/a/b` fully; a grant on `/a/b` covers `/a`
    /// partially. Both cases matter for query authorization.
    pub fn overlaps(&self, other: &ResourcePath) -> bool {
        self.is_prefix_of(other) || other.is_prefix_of(self)
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.0 {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

impl From<String> for ResourcePath {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<ResourcePath> for String {
    fn from(p: ResourcePath) -> Self {
        p.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_id_from_address_segment_decodes_percent_encoding() {
        let id = EntityId::from_address_segment("org.example%3Athing-42");
        assert_eq!(id.as_str(), "org.example:thing-42");
    }

    #[test]
    fn test_entity_id_from_plain_segment() {
        let id = EntityId::from_address_segment("plain-id");
        assert_eq!(id.as_str(), "plain-id");
    }

    #[test]
    fn test_resource_path_parse_and_display() {
        let path = ResourcePath::parse("/features/temperature/value");
        assert_eq!(path.segments().len(), 3);
        assert_eq!(path.to_string(), "/features/temperature/value");
        assert_eq!(ResourcePath::root().to_string(), "/");
    }

    #[test]
    fn test_resource_path_prefix() {
        let a = ResourcePath::parse("/a");
        let ab = ResourcePath::parse("/a/b");
        let c = ResourcePath::parse("/c");

        assert!(a.is_prefix_of(&ab));
        assert!(!ab.is_prefix_of(&a));
        assert!(a.is_prefix_of(&a));
        assert!(!a.is_prefix_of(&c));
        assert!(ResourcePath::root().is_prefix_of(&c));
    }

    #[test]
    fn test_resource_path_overlap() {
        let a = ResourcePath::parse("/a");
        let ab = ResourcePath::parse("/a/b");
        let c = ResourcePath::parse("/c");

        assert!(a.overlaps(&ab));
        assert!(ab.overlaps(&a));
        assert!(!a.overlaps(&c));
    }
}
