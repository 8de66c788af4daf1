// Copyright (c) 2026 TwinGuard Project
// SPDX-License-Identifier: AGPL-3.0
//! # Enforcement Configuration
//!
//! Tunables for the enforcement tier. Durations are serialized in humantime
//! form (`"10s"`, `"2m"`) so configuration files read naturally.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid enforcement configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnforcementConfig {
    /// Timeout for synchronous operations against the authoritative tier
    /// (document loads, downstream queries). Seconds-scale.
    #[serde(with = "humantime_serde", default = "default_ask_timeout")]
    pub ask_timeout: Duration,

    /// Interval between idle self-checks of an enforcement instance.
    /// Minutes-scale; two consecutive checks without a forwarded operation
    /// evict the instance.
    #[serde(with = "humantime_serde", default = "default_idle_check_interval")]
    pub idle_check_interval: Duration,

    /// Capacity of a per-instance inbox.
    #[serde(default = "default_inbox_capacity")]
    pub inbox_capacity: usize,

    /// Capacity of the cache change-notification feed.
    #[serde(default = "default_notification_capacity")]
    pub notification_capacity: usize,
}

fn default_ask_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_idle_check_interval() -> Duration {
    Duration::from_secs(120)
}

fn default_inbox_capacity() -> usize {
    64
}

fn default_notification_capacity() -> usize {
    256
}

impl Default for EnforcementConfig {
    fn default() -> Self {
        Self {
            ask_timeout: default_ask_timeout(),
            idle_check_interval: default_idle_check_interval(),
            inbox_capacity: default_inbox_capacity(),
            notification_capacity: default_notification_capacity(),
        }
    }
}

impl EnforcementConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ask_timeout.is_zero() {
            return Err(ConfigError::Invalid("ask_timeout must be non-zero".into()));
        }
        if self.idle_check_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "idle_check_interval must be non-zero".into(),
            ));
        }
        if self.inbox_capacity == 0 || self.notification_capacity == 0 {
            return Err(ConfigError::Invalid(
                "channel capacities must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
