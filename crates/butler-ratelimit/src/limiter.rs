use std::collections::HashMap;
use std::time::Instant;

use butler_schemas::NotifyIntent;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::bucket::TokenBucket;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimiterConfig {
    pub global_max_per_minute: f64,
    pub global_max_in_flight: u32,
    pub per_recipient_max_per_minute: f64,
    /// Keyed by `"{channel}.{identity_scope}"`, e.g. `"telegram.bot"`.
    pub channel_limits: HashMap<String, f64>,
    pub reply_priority_multiplier: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitType {
    Provider,
    GlobalInFlight,
    Global,
    Channel,
    Recipient,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdmissionResult {
    pub admitted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_type: Option<LimitType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<f64>,
}

impl AdmissionResult {
    fn admitted() -> Self {
        AdmissionResult { admitted: true, error_class: None, limit_type: None, retry_after_seconds: None }
    }

    fn rejected(error_class: &str, limit_type: LimitType, retry_after_seconds: Option<f64>) -> Self {
        AdmissionResult {
            admitted: false,
            error_class: Some(error_class.to_string()),
            limit_type: Some(limit_type),
            retry_after_seconds,
        }
    }
}

struct ProviderThrottle {
    blocked_until: Instant,
    retry_after_seconds: f64,
    #[allow(dead_code)]
    reason: String,
}

struct State {
    global: TokenBucket,
    global_in_flight: u32,
    channel_buckets: HashMap<String, TokenBucket>,
    recipient_buckets: HashMap<String, TokenBucket>,
    provider_throttles: HashMap<String, ProviderThrottle>,
}

fn channel_identity_key(channel: &str, identity_scope: &str) -> String {
    format!("{channel}.{identity_scope}")
}

/// Admission governor for all outbound channel deliveries (spec §4.H). One
/// instance is shared (behind `Arc`) across every delivery attempt in the
/// messenger; all bucket mutations happen under a single coarse mutex
/// since the admission path itself is microseconds of work.
pub struct RateLimiter {
    config: RateLimiterConfig,
    state: Mutex<State>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        let global = TokenBucket::new(config.global_max_per_minute, config.global_max_per_minute / 60.0);
        RateLimiter {
            config,
            state: Mutex::new(State {
                global,
                global_in_flight: 0,
                channel_buckets: HashMap::new(),
                recipient_buckets: HashMap::new(),
                provider_throttles: HashMap::new(),
            }),
        }
    }

    fn channel_capacity(&self, key: &str) -> f64 {
        self.config
            .channel_limits
            .get(key)
            .copied()
            .unwrap_or(self.config.global_max_per_minute)
    }

    pub fn record_provider_throttle(&self, channel: &str, retry_after_seconds: f64, reason: impl Into<String>) {
        let mut state = self.state.lock();
        state.provider_throttles.insert(
            channel.to_string(),
            ProviderThrottle {
                blocked_until: Instant::now() + std::time::Duration::from_secs_f64(retry_after_seconds.max(0.0)),
                retry_after_seconds,
                reason: reason.into(),
            },
        );
    }

    pub fn clear_provider_throttle(&self, channel: &str) {
        self.state.lock().provider_throttles.remove(channel);
    }

    pub fn check_admission(
        &self,
        channel: &str,
        identity_scope: &str,
        recipient: &str,
        intent: NotifyIntent,
        origin_butler: &str,
    ) -> AdmissionResult {
        let cost = match intent {
            NotifyIntent::Reply => 1.0 / self.config.reply_priority_multiplier,
            NotifyIntent::Send => 1.0,
        };

        let now = Instant::now();
        let mut state = self.state.lock();

        if let Some(throttle) = state.provider_throttles.get(channel) {
            if throttle.blocked_until > now {
                let remaining = (throttle.blocked_until - now).as_secs_f64().min(throttle.retry_after_seconds);
                return AdmissionResult::rejected("target_unavailable", LimitType::Provider, Some(remaining));
            }
        }

        if state.global_in_flight >= self.config.global_max_in_flight {
            return AdmissionResult::rejected("overload_rejected", LimitType::GlobalInFlight, None);
        }

        if !state.global.has_capacity(cost, now) {
            let wait = state.global.wait_hint(cost);
            return AdmissionResult::rejected("overload_rejected", LimitType::Global, Some(wait));
        }

        let channel_key = channel_identity_key(channel, identity_scope);
        let channel_capacity = self.channel_capacity(&channel_key);
        let channel_bucket = state
            .channel_buckets
            .entry(channel_key)
            .or_insert_with(|| TokenBucket::new(channel_capacity, channel_capacity / 60.0));
        if !channel_bucket.has_capacity(cost, now) {
            let wait = channel_bucket.wait_hint(cost);
            return AdmissionResult::rejected("overload_rejected", LimitType::Channel, Some(wait));
        }

        let recipient_capacity = self.config.per_recipient_max_per_minute;
        let recipient_bucket = state
            .recipient_buckets
            .entry(recipient.to_string())
            .or_insert_with(|| TokenBucket::new(recipient_capacity, recipient_capacity / 60.0));
        if !recipient_bucket.has_capacity(cost, now) {
            let wait = recipient_bucket.wait_hint(cost);
            return AdmissionResult::rejected("overload_rejected", LimitType::Recipient, Some(wait));
        }

        state.global.consume(cost, now);
        state
            .channel_buckets
            .get_mut(&channel_identity_key(channel, identity_scope))
            .expect("inserted above")
            .consume(cost, now);
        state
            .recipient_buckets
            .get_mut(recipient)
            .expect("inserted above")
            .consume(cost, now);
        state.global_in_flight += 1;

        tracing::debug!(channel, identity_scope, recipient, origin_butler, "admission granted");
        AdmissionResult::admitted()
    }

    /// Idempotent: releasing without a prior admission just clamps at zero.
    pub fn release(&self, _channel: &str, _identity_scope: &str, _recipient: &str) {
        let mut state = self.state.lock();
        state.global_in_flight = state.global_in_flight.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RateLimiterConfig {
        RateLimiterConfig {
            global_max_per_minute: 100.0,
            global_max_in_flight: 10,
            per_recipient_max_per_minute: 2.0,
            channel_limits: HashMap::new(),
            reply_priority_multiplier: 2.0,
        }
    }

    #[test]
    fn recipient_isolation_does_not_starve_other_recipients() {
        let limiter = RateLimiter::new(config());

        for _ in 0..2 {
            let admitted = limiter.check_admission("telegram", "bot", "user123", NotifyIntent::Send, "noisy");
            assert!(admitted.admitted);
            limiter.release("telegram", "bot", "user123");
        }

        let third = limiter.check_admission("telegram", "bot", "user123", NotifyIntent::Send, "noisy");
        assert!(!third.admitted);
        assert_eq!(third.limit_type, Some(LimitType::Recipient));

        let other = limiter.check_admission("telegram", "bot", "user456", NotifyIntent::Send, "quiet");
        assert!(other.admitted);
    }

    #[test]
    fn provider_throttle_rejects_until_cleared() {
        let limiter = RateLimiter::new(config());
        limiter.record_provider_throttle("telegram", 30.0, "flood control");

        let result = limiter.check_admission("telegram", "bot", "user1", NotifyIntent::Send, "x");
        assert!(!result.admitted);
        assert_eq!(result.limit_type, Some(LimitType::Provider));

        limiter.clear_provider_throttle("telegram");
        let result = limiter.check_admission("telegram", "bot", "user1", NotifyIntent::Send, "x");
        assert!(result.admitted);
    }

    #[test]
    fn global_in_flight_cap_rejects_before_bucket_checks() {
        let mut cfg = config();
        cfg.global_max_in_flight = 1;
        let limiter = RateLimiter::new(cfg);

        let first = limiter.check_admission("telegram", "bot", "u1", NotifyIntent::Send, "x");
        assert!(first.admitted);

        let second = limiter.check_admission("telegram", "bot", "u2", NotifyIntent::Send, "x");
        assert!(!second.admitted);
        assert_eq!(second.limit_type, Some(LimitType::GlobalInFlight));
    }

    #[test]
    fn reply_intent_costs_half_with_multiplier_two() {
        let limiter = RateLimiter::new(config());
        // per_recipient_max_per_minute=2.0, reply cost=0.5: four replies fit
        // where only two sends would.
        for _ in 0..4 {
            let result = limiter.check_admission("telegram", "bot", "user1", NotifyIntent::Reply, "x");
            assert!(result.admitted);
        }
        let fifth = limiter.check_admission("telegram", "bot", "user1", NotifyIntent::Reply, "x");
        assert!(!fifth.admitted);
    }

    #[test]
    fn release_without_prior_admission_is_idempotent() {
        let limiter = RateLimiter::new(config());
        limiter.release("telegram", "bot", "user1");
        limiter.release("telegram", "bot", "user1");
        let result = limiter.check_admission("telegram", "bot", "user1", NotifyIntent::Send, "x");
        assert!(result.admitted);
    }
}
