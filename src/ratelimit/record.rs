//! Persisted per-key bucket state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Token bucket state for one `(scope, id, action)` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitRecord {
    /// Remaining capacity, `0 <= tokens <= capacity`
    pub tokens: f64,
    /// Maximum tokens for this record
    pub capacity: u32,
    /// Tokens accrued per millisecond
    #[serde(rename = "refillRatePerTimeUnit")]
    pub refill_rate: f64,
    /// Last time tokens were computed or consumed
    pub last_refill: DateTime<Utc>,
    /// Nominal end of the current window
    pub reset_at: DateTime<Utc>,
    /// Consecutive times the bucket was found empty
    #[serde(default)]
    pub fail_count: u32,
    /// End of the active lockout, if any
    #[serde(default)]
    pub blocked_until: Option<DateTime<Utc>>,
    /// Cumulative admitted attempts
    #[serde(default)]
    pub count: u64,
    /// Time of the last check against this record
    #[serde(default)]
    pub last_attempt: Option<DateTime<Utc>>,
}

impl RateLimitRecord {
    /// Whether a lockout is in effect at `now`.
    pub fn is_blocked(&self, now: DateTime<Utc>) -> bool {
        self.blocked_until.map_or(false, |until| until > now)
    }
}
