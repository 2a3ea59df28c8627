//! Token bucket evaluation.
//!
//! Tokens accrue continuously at `capacity / window` per millisecond. Each
//! admitted check consumes one token. Finding the bucket empty starts a
//! lockout that doubles with every consecutive exhaustion, up to the
//! configured cap. The evaluation is pure: it reads a record and the clock
//! reading and returns the record to persist together with a verdict.

use chrono::{DateTime, Duration, Utc};

use super::policy::{Limit, PenaltyPolicy};
use super::record::RateLimitRecord;

/// Outcome of one check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    /// One token was consumed
    Admitted {
        /// Tokens left after this check
        remaining: f64,
    },
    /// The bucket was empty or a lockout is active
    Denied {
        /// Whole seconds until the lockout ends
        retry_after_seconds: u64,
    },
}

impl Verdict {
    /// Whether the check was admitted.
    pub fn is_admitted(&self) -> bool {
        matches!(self, Verdict::Admitted { .. })
    }
}

/// Result of evaluating a bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// Record to persist; `None` leaves the stored record untouched
    pub update: Option<RateLimitRecord>,
    /// Admission decision
    pub verdict: Verdict,
}

/// Tokens available at `now` without consuming any.
pub fn available_tokens(record: &RateLimitRecord, now: DateTime<Utc>) -> f64 {
    let elapsed_ms = (now - record.last_refill).num_milliseconds().max(0) as f64;
    let capacity = record.capacity as f64;
    (record.tokens + elapsed_ms * record.refill_rate).min(capacity)
}

/// Evaluate one check against the stored record.
pub fn evaluate(
    current: Option<&RateLimitRecord>,
    limit: &Limit,
    penalty: &PenaltyPolicy,
    now: DateTime<Utc>,
) -> Evaluation {
    let Some(current) = current else {
        return first_attempt(limit, now);
    };

    if let Some(until) = current.blocked_until.filter(|until| *until > now) {
        return Evaluation {
            update: None,
            verdict: Verdict::Denied {
                retry_after_seconds: ceil_secs((until - now).num_milliseconds()),
            },
        };
    }

    let mut record = current.clone();
    // The caller's policy wins over whatever was stored.
    record.capacity = limit.capacity();
    record.refill_rate = limit.refill_rate();

    let available = available_tokens(&record, now);
    let now = now.max(record.last_refill);
    record.last_refill = now;
    record.last_attempt = Some(now);

    if available >= 1.0 {
        record.tokens = available - 1.0;
        record.reset_at = saturating_add(now, limit.window());
        record.fail_count = 0;
        record.blocked_until = None;
        record.count = record.count.saturating_add(1);

        let remaining = record.tokens;
        return Evaluation {
            update: Some(record),
            verdict: Verdict::Admitted { remaining },
        };
    }

    record.tokens = available.max(0.0);
    record.fail_count = record.fail_count.saturating_add(1);
    let lockout = penalty.penalty_for(record.fail_count);
    record.blocked_until = Some(saturating_add(now, lockout));

    Evaluation {
        update: Some(record),
        verdict: Verdict::Denied {
            retry_after_seconds: ceil_secs(lockout.num_milliseconds()),
        },
    }
}

fn first_attempt(limit: &Limit, now: DateTime<Utc>) -> Evaluation {
    let capacity = limit.capacity();
    let record = RateLimitRecord {
        tokens: (capacity - 1) as f64,
        capacity,
        refill_rate: limit.refill_rate(),
        last_refill: now,
        reset_at: saturating_add(now, limit.window()),
        fail_count: 0,
        blocked_until: None,
        count: 1,
        last_attempt: Some(now),
    };
    let remaining = record.tokens;
    Evaluation {
        update: Some(record),
        verdict: Verdict::Admitted { remaining },
    }
}

fn saturating_add(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    at.checked_add_signed(by).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn ceil_secs(ms: i64) -> u64 {
    let ms = ms.max(0) as u64;
    (ms + 999) / 1000
}
