//! Factory configuration.

use std::time::Duration;

/// Default interval between liveness checks while a fetch is waiting.
///
/// Completion always arrives as a message; this interval only bounds how long
/// a cancelled token or a vanished producer can go unnoticed.
pub const DEFAULT_WAIT_INTERVAL: Duration = Duration::from_millis(200);

/// Tunables for an [`ImageFactory`](super::ImageFactory).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FactoryConfig {
    /// How often a blocked fetch wakes to check cancellation and producer liveness.
    pub wait_interval: Duration,
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            wait_interval: DEFAULT_WAIT_INTERVAL,
        }
    }
}

impl FactoryConfig {
    /// Set the wait interval. Zero is raised to one millisecond.
    pub fn with_wait_interval(mut self, interval: Duration) -> Self {
        self.wait_interval = interval.max(Duration::from_millis(1));
        self
    }
}
