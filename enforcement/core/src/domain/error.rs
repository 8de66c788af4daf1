// Copyright (c) 2026 TwinGuard Project
// SPDX-License-Identifier: AGPL-3.0
//! # Enforcement Error Taxonomy
//!
//! Typed rejections returned synchronously to callers, plus the
//! infrastructure errors that are *never* surfaced to callers directly
//! (synchronization failures terminate the instance instead).
//!
//! Every rejection distinguishes "no permission document at all" (the
//! resource may not even exist as far as the caller can tell) from
//! "document present but the grant is insufficient".

use thiserror::Error;

use super::permission::EvaluatorError;

/// Why a permission check failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RejectionCause {
    #[error("no permission document is available for the entity; it may not exist or may not be accessible")]
    MissingPermissionDocument,
    #[error("the requester's grants are insufficient for this operation")]
    InsufficientGrant,
}

/// Category-specific rejection of an unauthorized signal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectionError {
    #[error("modify command on thing resource {path} was not authorized: {cause}")]
    ThingNotModifiable { path: String, cause: RejectionCause },

    #[error("query command on thing resource {path} was not authorized: {cause}")]
    ThingNotAccessible { path: String, cause: RejectionCause },

    #[error("modify command on policy resource {path} was not authorized: {cause}")]
    PolicyNotModifiable { path: String, cause: RejectionCause },

    #[error("query command on policy resource {path} was not authorized: {cause}")]
    PolicyNotAccessible { path: String, cause: RejectionCause },

    #[error("message to {path} was not authorized: {cause}")]
    MessageNotSendable { path: String, cause: RejectionCause },

    #[error("live event on {path} was not authorized: {cause}")]
    EventNotSendable { path: String, cause: RejectionCause },
}

impl RejectionError {
    pub fn cause(&self) -> RejectionCause {
        match self {
            RejectionError::ThingNotModifiable { cause, .. }
            | RejectionError::ThingNotAccessible { cause, .. }
            | RejectionError::PolicyNotModifiable { cause, .. }
            | RejectionError::PolicyNotAccessible { cause, .. }
            | RejectionError::MessageNotSendable { cause, .. }
            | RejectionError::EventNotSendable { cause, .. } => *cause,
        }
    }
}

/// Failure talking to the authoritative entity service.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("entity service request timed out")]
    Timeout,
    #[error("entity service unavailable: {0}")]
    Unavailable(String),
    #[error("entity service rejected the request (status {status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("malformed entity service payload: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure while (re)loading the authoritative permission document.
///
/// Fatal to the instance: an unknown authorization state cannot be enforced.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("permission document load timed out")]
    Timeout,
    #[error("permission document load failed: {0}")]
    Service(#[from] ServiceError),
    #[error("permission document could not be compiled: {0}")]
    Compile(#[from] EvaluatorError),
}
