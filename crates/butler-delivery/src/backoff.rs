use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    pub retry_budget: u32,
    pub backoff_base_ms: u64,
    pub backoff_multiplier: f64,
    pub backoff_max_ms: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        DeliveryConfig {
            retry_budget: 5,
            backoff_base_ms: 200,
            backoff_multiplier: 2.0,
            backoff_max_ms: 30_000,
        }
    }
}

/// Exponential backoff for the attempt that just failed (1-indexed).
pub fn backoff_delay(attempt_number: u32, config: &DeliveryConfig) -> Duration {
    let exp = attempt_number.saturating_sub(1) as i32;
    let millis = (config.backoff_base_ms as f64) * config.backoff_multiplier.powi(exp);
    let capped = millis.min(config.backoff_max_ms as f64).max(0.0);
    Duration::from_millis(capped as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_exponentially_then_caps() {
        let config = DeliveryConfig { retry_budget: 10, backoff_base_ms: 100, backoff_multiplier: 2.0, backoff_max_ms: 1000 };
        assert_eq!(backoff_delay(1, &config), Duration::from_millis(100));
        assert_eq!(backoff_delay(2, &config), Duration::from_millis(200));
        assert_eq!(backoff_delay(3, &config), Duration::from_millis(400));
        assert_eq!(backoff_delay(6, &config), Duration::from_millis(1000));
    }
}
