//! Rate limiting logic and state management.

pub mod bucket;
mod clock;
mod key;
mod limiter;
mod policy;
mod record;
mod rules;

pub use bucket::{Evaluation, Verdict};
pub use clock::{Clock, ManualClock, SystemClock};
pub use key::{sanitize_id, RecordKey, Scope};
pub use limiter::RateLimiter;
pub use policy::{
    FailureMode, Limit, PenaltyPolicy, ScopePolicy, BASE_PENALTY_SECS, MAX_EXPONENT,
};
pub use record::RateLimitRecord;
pub use rules::{ActionRule, RuleSet};
