//! Engine timing options.

use std::time::Duration;

/// Timeouts applied to correlated waits.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Protocol default for request/response waits.
    pub normal_timeout: Duration,

    /// Long-running operations such as self-test with NVM checks.
    pub extended_timeout: Duration,

    /// Reel initialisation, homing and light-identifier discovery.
    pub long_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            normal_timeout: Duration::from_secs(3),
            extended_timeout: Duration::from_secs(20),
            long_timeout: Duration::from_secs(30),
        }
    }
}

impl EngineOptions {
    /// Create options with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: set the normal timeout.
    ///
    /// # Panics
    /// Panics if the timeout is zero.
    pub fn with_normal_timeout(mut self, val: Duration) -> Self {
        assert!(!val.is_zero(), "Normal timeout must be non-zero");
        self.normal_timeout = val;
        self
    }

    /// Builder: set the extended timeout.
    ///
    /// # Panics
    /// Panics if the timeout is zero.
    pub fn with_extended_timeout(mut self, val: Duration) -> Self {
        assert!(!val.is_zero(), "Extended timeout must be non-zero");
        self.extended_timeout = val;
        self
    }

    /// Builder: set the long timeout.
    ///
    /// # Panics
    /// Panics if the timeout is zero.
    pub fn with_long_timeout(mut self, val: Duration) -> Self {
        assert!(!val.is_zero(), "Long timeout must be non-zero");
        self.long_timeout = val;
        self
    }
}
