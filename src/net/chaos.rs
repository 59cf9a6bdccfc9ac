//! Synthetic throttling injection.
//!
//! When enabled, a configured percentage of requests fail before reaching
//! the network with a throttling-class error, so retry handling can be
//! exercised against a healthy tenant.

use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::config::ChaosConfig;
use crate::error::GraphError;

#[derive(Debug, Clone, Copy)]
pub struct ChaosInjector {
    percent: u8,
}

impl ChaosInjector {
    pub fn new(percent: u8) -> Self {
        Self {
            percent: percent.min(100),
        }
    }

    /// `None` when chaos is disabled in `config`.
    pub fn from_config(config: &ChaosConfig) -> Option<Self> {
        config.enabled.then(|| Self::new(config.percent))
    }

    pub fn percent(&self) -> u8 {
        self.percent
    }

    /// Roll the dice for one request.
    pub fn maybe_fail(&self) -> Option<GraphError> {
        let mut rng = rand::rng();
        if rng.random_range(0..100u8) >= self.percent {
            return None;
        }

        let failure = match rng.random_range(0..3) {
            0 => GraphError::Throttled {
                status: 429,
                retry_after: Some(Duration::from_secs(rng.random_range(1..=3))),
            },
            1 => GraphError::Throttled {
                status: 503,
                retry_after: None,
            },
            _ => GraphError::Throttled {
                status: 504,
                retry_after: None,
            },
        };
        debug!(error = %failure, "Chaos injected failure");
        Some(failure)
    }
}
