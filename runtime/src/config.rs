//! Runtime configuration for task scopes and bridges.

use crate::identity::ExecutionIdentity;
use std::time::Duration;

/// Configuration shared by a [`TaskScope`](crate::TaskScope) and the bridges
/// built on it.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use suspend_bridge_runtime::{BridgeConfig, ExecutionIdentity};
///
/// let config = BridgeConfig::default()
///     .with_shutdown_timeout(Duration::from_secs(5))
///     .with_identity(ExecutionIdentity::new("orders", 3));
///
/// assert_eq!(config.identity.generation(), 3);
/// ```
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// How long `TaskScope::shutdown_default` waits for tasks to settle
    pub shutdown_timeout: Duration,
    /// Identity installed into every task launched by a bridge
    pub identity: ExecutionIdentity,
}

impl BridgeConfig {
    /// Create a new configuration with custom values
    #[must_use]
    pub const fn new(shutdown_timeout: Duration, identity: ExecutionIdentity) -> Self {
        Self {
            shutdown_timeout,
            identity,
        }
    }

    /// Set the shutdown timeout
    #[must_use]
    pub const fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the execution identity
    #[must_use]
    pub fn with_identity(mut self, identity: ExecutionIdentity) -> Self {
        self.identity = identity;
        self
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(30),
            identity: ExecutionIdentity::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.shutdown_timeout, Duration::from_secs(30));
        assert_eq!(config.identity, ExecutionIdentity::default());
    }

    #[test]
    fn builder_overrides() {
        let config = BridgeConfig::new(Duration::from_secs(1), ExecutionIdentity::default())
            .with_shutdown_timeout(Duration::from_millis(250))
            .with_identity(ExecutionIdentity::new("billing", 2));

        assert_eq!(config.shutdown_timeout, Duration::from_millis(250));
        assert_eq!(config.identity.name(), "billing");
    }
}
