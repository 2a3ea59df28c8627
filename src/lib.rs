//! Turnstile - Abuse Rate Limiter
//!
//! This crate gates security-sensitive actions (login, TOTP verification,
//! profile changes) with per-key token buckets. Buckets refill continuously,
//! and an exhausted bucket triggers a lockout that doubles on every repeated
//! exhaustion. Limits are kept independently per authenticated identity,
//! network address and device fingerprint. When the backing store fails,
//! identity checks fail closed while address and device checks fail open.

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod store;

pub use error::RateLimitError;
pub use ratelimit::{Limit, RateLimiter, Scope};
pub use store::{FileStore, MemoryStore, RecordStore};
