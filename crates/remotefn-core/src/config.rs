//! Invocation configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::CoreError;

/// Marketplace partition used when none is configured.
pub const DEFAULT_SUBNET: &str = "devnet-alpha.2";

/// Configuration fixed when a function is wrapped.
///
/// Every call made through the same wrapped function uses the same values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationConfig {
    /// Run in-process instead of on the marketplace.
    pub run_local: bool,

    /// Spending ceiling for one remote session (currency-neutral).
    pub budget: f64,

    /// Caller's timeout for a remote session. The engine's initialization
    /// overhead is added on top of this.
    pub timeout: Duration,

    /// Marketplace partition selector.
    pub subnet: String,
}

impl Default for InvocationConfig {
    fn default() -> Self {
        Self {
            run_local: false,
            budget: 100.0,
            timeout: Duration::from_secs(10 * 60),
            subnet: DEFAULT_SUBNET.to_string(),
        }
    }
}

impl InvocationConfig {
    /// Configuration that runs every call in-process.
    pub fn local() -> Self {
        Self {
            run_local: true,
            ..Self::default()
        }
    }

    /// Builder method to toggle local execution.
    pub fn with_run_local(mut self, run_local: bool) -> Self {
        self.run_local = run_local;
        self
    }

    /// Builder method to set the budget.
    pub fn with_budget(mut self, budget: f64) -> Self {
        self.budget = budget;
        self
    }

    /// Builder method to set the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Builder method to set the subnet.
    pub fn with_subnet(mut self, subnet: impl Into<String>) -> Self {
        self.subnet = subnet.into();
        self
    }

    /// Check the budget can pay for anything at all.
    pub fn validate_budget(&self) -> Result<(), CoreError> {
        if !self.budget.is_finite() || self.budget <= 0.0 {
            return Err(CoreError::InvalidInput(format!(
                "budget must be a positive finite amount, got {}",
                self.budget
            )));
        }
        Ok(())
    }
}

/// Execution image the worker boots, plus its minimum resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSpec {
    /// Content hash of the image.
    pub image_hash: String,
    pub min_mem_gib: f64,
    pub min_storage_gib: f64,
}

impl Default for ImageSpec {
    fn default() -> Self {
        Self {
            image_hash: "74e9cdb5a5aa2c73a54f9ebf109986801fe2d4f026ea7d9fbfcca221".to_string(),
            min_mem_gib: 0.5,
            min_storage_gib: 2.0,
        }
    }
}
