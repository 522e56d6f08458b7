// ABOUTME: Per-user-type entitlement quotas for daily message caps
// ABOUTME: Advisory limits enforced by the turn gate, not a hard security boundary
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

//! Entitlement tiers
//!
//! Each user type carries a daily cap on turns. The gate compares the
//! caller's trailing-24-hour message count against the cap without locking,
//! so concurrent requests can transiently overshoot by a small margin.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::config::environment::LimitConfig;
use crate::errors::AppError;

/// User tier carried in the session token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    /// Anonymous or trial user
    Guest,
    /// Registered user
    Regular,
}

impl UserType {
    /// String representation for token claims
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Guest => "guest",
            Self::Regular => "regular",
        }
    }
}

impl FromStr for UserType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "guest" => Ok(Self::Guest),
            "regular" => Ok(Self::Regular),
            other => Err(AppError::unauthorized(format!(
                "Unrecognized user type: {other}"
            ))),
        }
    }
}

impl fmt::Display for UserType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Quotas granted to a user type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entitlements {
    /// Maximum user messages per trailing 24 hours
    pub max_messages_per_day: i64,
}

impl Entitlements {
    /// Look up the entitlements for a user type from configured limits
    #[must_use]
    pub const fn for_user_type(user_type: UserType, limits: &LimitConfig) -> Self {
        match user_type {
            UserType::Guest => Self {
                max_messages_per_day: limits.guest_messages_per_day,
            },
            UserType::Regular => Self {
                max_messages_per_day: limits.regular_messages_per_day,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> LimitConfig {
        LimitConfig {
            max_turn_secs: 60,
            guest_messages_per_day: 20,
            regular_messages_per_day: 100,
        }
    }

    #[test]
    fn test_guest_cap_below_regular_cap() {
        let limits = limits();
        let guest = Entitlements::for_user_type(UserType::Guest, &limits);
        let regular = Entitlements::for_user_type(UserType::Regular, &limits);
        assert!(guest.max_messages_per_day < regular.max_messages_per_day);
        assert_eq!(guest.max_messages_per_day, 20);
    }

    #[test]
    fn test_user_type_parse() {
        assert_eq!("guest".parse::<UserType>().ok(), Some(UserType::Guest));
        assert!("admin".parse::<UserType>().is_err());
    }
}
