use std::time::Duration;

use formflow_core::config::RetryConfig;

/// Delay before retrying after failed attempt `attempt` (1-based):
/// `backoff_unit_ms * 2^attempt`, capped at `max_backoff_ms`.
pub fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let factor = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
    let ms = config
        .backoff_unit_ms
        .saturating_mul(factor)
        .min(config.max_backoff_ms);
    if !config.jitter {
        return Duration::from_millis(ms);
    }
    // Add jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}
