//! Limits, penalties and per-scope failure policy.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use super::key::Scope;

/// Default lockout applied on the first exhaustion.
pub const BASE_PENALTY_SECS: u64 = 60;
/// Largest power of two the base penalty is multiplied by.
pub const MAX_EXPONENT: u32 = 6;

/// Capacity and refill window for one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limit {
    /// Attempts allowed per window
    pub max_attempts: u32,
    /// Window length in milliseconds
    pub window_ms: u64,
}

impl Limit {
    /// Create a new limit.
    pub const fn new(max_attempts: u32, window_ms: u64) -> Self {
        Self {
            max_attempts,
            window_ms,
        }
    }

    /// Default limit for identity-scoped checks.
    pub const fn identity_default() -> Self {
        Self::new(5, 60_000)
    }

    /// Default limit for address-scoped checks.
    pub const fn address_default() -> Self {
        Self::new(30, 600_000)
    }

    /// Default limit for device-scoped checks.
    pub const fn device_default() -> Self {
        Self::new(10, 60_000)
    }

    /// Bucket capacity; never below one.
    pub fn capacity(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Window length; never below one millisecond.
    pub fn window(&self) -> Duration {
        Duration::milliseconds(self.window_ms.clamp(1, i64::MAX as u64) as i64)
    }

    /// Tokens accrued per millisecond.
    pub fn refill_rate(&self) -> f64 {
        self.capacity() as f64 / self.window_ms.max(1) as f64
    }

    /// Halved capacity for unrecognized devices (floor, minimum one).
    pub fn strict(&self) -> Self {
        Self {
            max_attempts: (self.max_attempts / 2).max(1),
            window_ms: self.window_ms,
        }
    }
}

/// Escalating lockout applied when a bucket is found empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PenaltyPolicy {
    /// Lockout on the first exhaustion, in seconds
    #[serde(default = "default_base_secs")]
    pub base_secs: u64,
    /// Cap on the doubling exponent
    #[serde(default = "default_max_exponent")]
    pub max_exponent: u32,
}

impl Default for PenaltyPolicy {
    fn default() -> Self {
        Self {
            base_secs: default_base_secs(),
            max_exponent: default_max_exponent(),
        }
    }
}

fn default_base_secs() -> u64 {
    BASE_PENALTY_SECS
}

fn default_max_exponent() -> u32 {
    MAX_EXPONENT
}

impl PenaltyPolicy {
    /// Lockout length for the given consecutive failure count (1-based).
    pub fn penalty_for(&self, fail_count: u32) -> Duration {
        let exponent = fail_count.saturating_sub(1).min(self.max_exponent);
        let multiplier = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
        let secs = self.base_secs.saturating_mul(multiplier);
        Duration::seconds(secs.min(i64::MAX as u64 / 1000) as i64)
    }
}

/// What to do when the store transaction itself fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// Reject the request
    Closed,
    /// Let the request through
    Open,
}

/// Failure handling selected by scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopePolicy {
    /// The scope this policy applies to
    pub scope: Scope,
    /// Outcome when the store is unavailable
    pub on_store_failure: FailureMode,
}

impl ScopePolicy {
    /// Identity fails closed; address and device fail open.
    pub fn for_scope(scope: Scope) -> Self {
        let on_store_failure = match scope {
            Scope::Identity => FailureMode::Closed,
            Scope::Address | Scope::Device => FailureMode::Open,
        };
        Self {
            scope,
            on_store_failure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strict_halves_capacity() {
        assert_eq!(Limit::new(4, 60_000).strict().max_attempts, 2);
        assert_eq!(Limit::new(5, 60_000).strict().max_attempts, 2);
        assert_eq!(Limit::new(1, 60_000).strict().max_attempts, 1);
        assert_eq!(Limit::new(10, 60_000).strict().window_ms, 60_000);
    }

    #[test]
    fn test_refill_rate() {
        let limit = Limit::new(5, 60_000);
        assert!((limit.refill_rate() - 5.0 / 60_000.0).abs() < f64::EPSILON);
        assert_eq!(Limit::new(0, 0).capacity(), 1);
        assert_eq!(Limit::new(0, 0).window(), Duration::milliseconds(1));
    }

    #[test]
    fn test_penalty_doubles_up_to_cap() {
        let penalty = PenaltyPolicy::default();
        assert_eq!(penalty.penalty_for(1), Duration::seconds(60));
        assert_eq!(penalty.penalty_for(2), Duration::seconds(120));
        assert_eq!(penalty.penalty_for(3), Duration::seconds(240));
        assert_eq!(penalty.penalty_for(7), Duration::seconds(60 * 64));
        assert_eq!(penalty.penalty_for(50), Duration::seconds(60 * 64));
    }

    #[test]
    fn test_scope_failure_modes() {
        assert_eq!(
            ScopePolicy::for_scope(Scope::Identity).on_store_failure,
            FailureMode::Closed
        );
        assert_eq!(
            ScopePolicy::for_scope(Scope::Address).on_store_failure,
            FailureMode::Open
        );
        assert_eq!(
            ScopePolicy::for_scope(Scope::Device).on_store_failure,
            FailureMode::Open
        );
    }
}
