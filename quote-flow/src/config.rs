//! Engine configuration.

use std::ops::RangeInclusive;
use std::time::Duration;

use crate::error::{FlowError, Result};

/// Timing and sizing knobs for the conversation engine.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowConfig {
    /// Offers generated per session.
    pub offer_count: usize,
    /// Range the "typing" latency is drawn from, in milliseconds.
    pub typing_delay_ms: RangeInclusive<u64>,
    /// Fixed delay for the quote-loading message.
    pub loading_delay: Duration,
    /// Upper bound on any backend call (offers, document upload).
    pub backend_timeout: Duration,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            offer_count: 4,
            typing_delay_ms: 600..=1200,
            loading_delay: Duration::from_millis(2500),
            backend_timeout: Duration::from_secs(10),
        }
    }
}

fn env_u64(key: &str) -> Result<Option<u64>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| FlowError::InvalidConfig {
                key: key.to_string(),
                message: format!("{raw:?}: {e}"),
            }),
        Err(_) => Ok(None),
    }
}

impl FlowConfig {
    /// Config with no artificial latency, for tests and batch use.
    pub fn instant() -> Self {
        Self {
            typing_delay_ms: 0..=0,
            loading_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Defaults overridden by `QUOTE_FLOW_*` environment variables:
    /// `OFFER_COUNT`, `TYPING_MIN_MS`, `TYPING_MAX_MS`, `LOADING_DELAY_MS`,
    /// `BACKEND_TIMEOUT_MS`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(count) = env_u64("QUOTE_FLOW_OFFER_COUNT")? {
            config.offer_count = count as usize;
        }
        let min = env_u64("QUOTE_FLOW_TYPING_MIN_MS")?.unwrap_or(*config.typing_delay_ms.start());
        let max = env_u64("QUOTE_FLOW_TYPING_MAX_MS")?.unwrap_or(*config.typing_delay_ms.end());
        config.typing_delay_ms = min..=max;
        if let Some(ms) = env_u64("QUOTE_FLOW_LOADING_DELAY_MS")? {
            config.loading_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = env_u64("QUOTE_FLOW_BACKEND_TIMEOUT_MS")? {
            config.backend_timeout = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.offer_count == 0 {
            return Err(FlowError::InvalidConfig {
                key: "offer_count".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.typing_delay_ms.start() > self.typing_delay_ms.end() {
            return Err(FlowError::InvalidConfig {
                key: "typing_delay_ms".to_string(),
                message: format!(
                    "min {} is above max {}",
                    self.typing_delay_ms.start(),
                    self.typing_delay_ms.end()
                ),
            });
        }
        if self.backend_timeout.is_zero() {
            return Err(FlowError::InvalidConfig {
                key: "backend_timeout".to_string(),
                message: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}
