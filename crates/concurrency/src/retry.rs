//! Retry configuration for restarted transactions
//!
//! The delay before the next attempt depends on the backoff class carried
//! by the restart error:
//!
//! - `None`: retry immediately
//! - `NonExponential`: wait `base_delay_ms`
//! - `Exponential`: wait `base_delay_ms << attempt`, capped at `max_delay_ms`

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tessera_core::BackoffClass;

/// Configuration for transaction retry behavior
///
/// # Example
/// ```ignore
/// let config = RetryConfig::new()
///     .with_max_retries(5)
///     .with_base_delay_ms(10)
///     .with_max_delay_ms(200);
/// worker.transaction_with_retry(config, |txn| { ... })?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = no retries)
    pub max_retries: usize,
    /// Base delay between retries in milliseconds
    pub base_delay_ms: u64,
    /// Maximum delay between retries in milliseconds
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 5,
            max_delay_ms: 200,
        }
    }
}

impl RetryConfig {
    /// Create a new RetryConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a RetryConfig with no retries
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Set maximum number of retries
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set base delay
    pub fn with_base_delay_ms(mut self, base_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self
    }

    /// Set maximum delay between retries
    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    /// Delay before retry number `attempt` (0-based) for a failure of
    /// class `class`
    pub fn delay_for(&self, class: BackoffClass, attempt: usize) -> Duration {
        match class {
            BackoffClass::None => Duration::ZERO,
            BackoffClass::NonExponential => {
                Duration::from_millis(self.base_delay_ms.min(self.max_delay_ms))
            }
            BackoffClass::Exponential => {
                // Cap the shift to prevent overflow
                let shift = attempt.min(63);
                let delay_ms = self.base_delay_ms.saturating_mul(1u64 << shift);
                Duration::from_millis(delay_ms.min(self.max_delay_ms))
            }
        }
    }
}
