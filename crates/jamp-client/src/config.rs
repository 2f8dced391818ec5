use std::time::Duration;

use jamp_protocol::DEFAULT_FROM_ADDRESS;
use tracing::warn;

/// Client-wide settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Placed in the `fromAddress` field of every query. Default: `"me"`.
    pub from_address: String,
    /// Deadline for requests issued without an explicit timeout.
    /// Default: 5 minutes.
    pub default_timeout: Duration,
    /// How often the driving task calls
    /// [`ClientCore::expire_requests`](crate::ClientCore::expire_requests).
    /// Default: 1 second.
    pub sweep_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            from_address: DEFAULT_FROM_ADDRESS.to_string(),
            default_timeout: Duration::from_secs(5 * 60),
            sweep_interval: Duration::from_secs(1),
        }
    }
}

impl ClientConfig {
    /// Fix out-of-range values so the config is safe to use.
    ///
    /// An empty `from_address` becomes `"me"`; zero durations fall back to
    /// their defaults.
    pub fn validated(mut self) -> Self {
        let defaults = Self::default();
        if self.from_address.is_empty() {
            warn!("from_address is empty, using {DEFAULT_FROM_ADDRESS:?}");
            self.from_address = defaults.from_address;
        }
        if self.default_timeout.is_zero() {
            warn!("default_timeout is zero, using default");
            self.default_timeout = defaults.default_timeout;
        }
        if self.sweep_interval.is_zero() {
            warn!("sweep_interval is zero, using default");
            self.sweep_interval = defaults.sweep_interval;
        }
        self
    }
}
