//! Rate limiter facade.

use parking_lot::RwLock;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

use super::bucket::{self, Verdict};
use super::clock::{Clock, SystemClock};
use super::key::{RecordKey, Scope};
use super::policy::{FailureMode, Limit, PenaltyPolicy, ScopePolicy};
use super::rules::RuleSet;
use crate::config::TurnstileConfig;
use crate::error::{RateLimitError, TurnstileError};
use crate::store::{RecordStore, StoreError, Transition};

/// Default bound on a single store transaction.
const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Gates actions per identity, network address and device.
///
/// Every check runs exactly one transaction against the record store; the
/// limiter itself holds no per-key state and can be shared freely.
pub struct RateLimiter<S: RecordStore> {
    /// Backing record store
    store: Arc<S>,
    /// Time source for refill and lockouts
    clock: Arc<dyn Clock>,
    /// Limits resolved by scope and action
    rules: RwLock<RuleSet>,
    /// Lockout escalation
    penalty: PenaltyPolicy,
    /// Bound on a single store transaction
    store_timeout: Duration,
}

impl<S: RecordStore> RateLimiter<S> {
    /// Create a rate limiter with the built-in limits and the system clock.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            rules: RwLock::new(RuleSet::default()),
            penalty: PenaltyPolicy::default(),
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Create a rate limiter from a loaded configuration.
    pub fn with_config(store: Arc<S>, config: &TurnstileConfig) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            rules: RwLock::new(config.limits.clone()),
            penalty: config.penalty,
            store_timeout: config.store.timeout(),
        }
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the lockout escalation policy.
    pub fn with_penalty(mut self, penalty: PenaltyPolicy) -> Self {
        self.penalty = penalty;
        self
    }

    /// Replace the store transaction timeout.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Swap in a new rule set, e.g. after a configuration reload.
    pub fn set_rules(&self, rules: RuleSet) {
        *self.rules.write() = rules;
    }

    /// The rule set currently in effect.
    pub fn rules(&self) -> RuleSet {
        self.rules.read().clone()
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Check an authenticated identity against the configured limit.
    pub async fn check_limit(&self, identity: &str, action: &str) -> Result<(), RateLimitError> {
        let limit = self.rules.read().find_limit(Scope::Identity, action);
        self.check_limit_with(identity, action, limit).await
    }

    /// Check an authenticated identity against an explicit limit.
    ///
    /// Fails closed: a store failure rejects the request.
    pub async fn check_limit_with(
        &self,
        identity: &str,
        action: &str,
        limit: Limit,
    ) -> Result<(), RateLimitError> {
        self.check(Scope::Identity, identity, action, limit).await
    }

    /// Check a network address against the configured limit.
    pub async fn check_ip(&self, address: &str, action: &str) -> Result<(), RateLimitError> {
        let limit = self.rules.read().find_limit(Scope::Address, action);
        self.check_ip_with(address, action, limit).await
    }

    /// Check a network address against an explicit limit.
    ///
    /// Fails open: a store failure is logged and the request allowed.
    pub async fn check_ip_with(
        &self,
        address: &str,
        action: &str,
        limit: Limit,
    ) -> Result<(), RateLimitError> {
        self.check(Scope::Address, address, action, limit).await
    }

    /// Check a device fingerprint against the configured limit.
    pub async fn check_device(
        &self,
        device_id: &str,
        action: &str,
        strict: bool,
    ) -> Result<(), RateLimitError> {
        let limit = self.rules.read().find_limit(Scope::Device, action);
        self.check_device_with(device_id, action, limit, strict).await
    }

    /// Check a device fingerprint against an explicit limit.
    ///
    /// `strict` halves the capacity for unrecognized devices. Fails open.
    pub async fn check_device_with(
        &self,
        device_id: &str,
        action: &str,
        limit: Limit,
        strict: bool,
    ) -> Result<(), RateLimitError> {
        let limit = if strict { limit.strict() } else { limit };
        self.check(Scope::Device, device_id, action, limit).await
    }

    /// Estimate how many attempts remain for an identity.
    ///
    /// This counts admitted attempts since the window was last reset rather
    /// than reading the token balance, so it can disagree with the bucket.
    /// A store failure is logged and reported as `max_attempts`.
    pub async fn get_remaining_attempts(
        &self,
        identity: &str,
        action: &str,
        max_attempts: u32,
    ) -> u32 {
        let key = RecordKey::new(Scope::Identity, identity, action);
        let storage_key = key.storage_key();
        let record = match self.bounded(self.store.get(&storage_key)).await {
            Ok(record) => record,
            Err(e) => {
                warn!(
                    key = %storage_key,
                    error = %e,
                    "Rate limit store failed, reporting full allowance"
                );
                return max_attempts;
            }
        };
        let now = self.clock.now();

        match record {
            Some(record) if now < record.reset_at => {
                (max_attempts as u64).saturating_sub(record.count) as u32
            }
            _ => max_attempts,
        }
    }

    /// Delete the identity record for an action, lifting any lockout.
    pub async fn reset_limit(&self, identity: &str, action: &str) -> Result<(), TurnstileError> {
        let key = RecordKey::new(Scope::Identity, identity, action);
        let storage_key = key.storage_key();
        let transaction = self
            .store
            .run_transaction(&storage_key, |current| Transition::delete(current.is_some()));

        let existed = match self.bounded(transaction).await {
            Ok(existed) => existed,
            Err(e) => {
                error!(
                    key = %storage_key,
                    error = %e,
                    "Rate limit reset failed"
                );
                return Err(e.into());
            }
        };

        info!(
            key = %storage_key,
            existed = existed,
            "Rate limit reset"
        );
        Ok(())
    }

    /// Await a store call, failing with `StoreError::Timeout` once the
    /// configured bound elapses.
    async fn bounded<T, Fut>(&self, call: Fut) -> Result<T, StoreError>
    where
        Fut: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.store_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.store_timeout)),
        }
    }

    async fn check(
        &self,
        scope: Scope,
        id: &str,
        action: &str,
        limit: Limit,
    ) -> Result<(), RateLimitError> {
        if id.trim().is_empty() {
            warn!(
                scope = %scope,
                action = %action,
                "Cannot identify caller, allowing request"
            );
            return Ok(());
        }

        let key = RecordKey::new(scope, id, action);
        let storage_key = key.storage_key();
        let penalty = self.penalty;
        let clock = &self.clock;

        trace!(
            key = %storage_key,
            max_attempts = limit.max_attempts,
            window_ms = limit.window_ms,
            "Checking rate limit"
        );

        let transaction = self.store.run_transaction(&storage_key, |current| {
            let created = current.is_none();
            let eval = bucket::evaluate(current, &limit, &penalty, clock.now());
            let value = (eval.verdict, created);
            match eval.update {
                Some(record) => Transition::put(record, value),
                None => Transition::keep(value),
            }
        });

        match self.bounded(transaction).await {
            Ok((Verdict::Admitted { remaining }, created)) => {
                if created {
                    debug!(
                        key = %storage_key,
                        capacity = limit.capacity(),
                        window_ms = limit.window_ms,
                        "Created rate limit record"
                    );
                }
                trace!(key = %storage_key, remaining = remaining, "Rate limit check passed");
                Ok(())
            }
            Ok((Verdict::Denied { retry_after_seconds }, _)) => {
                info!(
                    key = %storage_key,
                    retry_after_seconds = retry_after_seconds,
                    "Rate limit exceeded"
                );
                Err(RateLimitError::exhausted(retry_after_seconds))
            }
            Err(e) => self.on_store_failure(ScopePolicy::for_scope(scope), &storage_key, e),
        }
    }

    fn on_store_failure(
        &self,
        policy: ScopePolicy,
        storage_key: &str,
        e: StoreError,
    ) -> Result<(), RateLimitError> {
        match policy.on_store_failure {
            FailureMode::Closed => {
                error!(
                    key = %storage_key,
                    scope = %policy.scope,
                    error = %e,
                    "Rate limit store failed, rejecting request"
                );
                Err(RateLimitError::unavailable())
            }
            FailureMode::Open => {
                warn!(
                    key = %storage_key,
                    scope = %policy.scope,
                    error = %e,
                    "Rate limit store failed, allowing request"
                );
                Ok(())
            }
        }
    }
}
