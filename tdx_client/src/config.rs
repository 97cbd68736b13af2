//! Client configuration.
use std::time::Duration;

use tdx_common::net::{DEFAULT_KEEPALIVE, DEFAULT_REDIAL_INTERVAL, DEFAULT_REQUEST_TIMEOUT};

/// Tunables of one client connection.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// How long a single request waits for its response.
    pub request_timeout: Duration,
    /// Idle window after which a heartbeat is written.
    pub keepalive: Duration,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Re-dial automatically after the connection drops.
    pub redial: bool,
    /// Pause between redial attempts.
    pub redial_interval: Duration,
    /// Hex-dump every frame at debug level.
    pub debug: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            keepalive: DEFAULT_KEEPALIVE,
            connect_timeout: Duration::from_secs(5),
            redial: false,
            redial_interval: DEFAULT_REDIAL_INTERVAL,
            debug: false,
        }
    }
}

impl ClientConfig {
    /// Set the per-request timeout.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the idle keepalive window.
    #[must_use]
    pub fn keepalive(mut self, idle: Duration) -> Self {
        self.keepalive = idle;
        self
    }

    /// Set the TCP connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Enable or disable automatic redial.
    #[must_use]
    pub fn redial(mut self, enabled: bool) -> Self {
        self.redial = enabled;
        self
    }

    /// Set the pause between redial attempts.
    #[must_use]
    pub fn redial_interval(mut self, interval: Duration) -> Self {
        self.redial_interval = interval;
        self
    }

    /// Enable or disable frame hex dumps.
    #[must_use]
    pub fn debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_the_protocol_conventions() {
        let config = ClientConfig::default();
        assert_eq!(config.request_timeout, Duration::from_secs(2));
        assert_eq!(config.keepalive, Duration::from_secs(30));
        assert!(!config.redial);
    }

    #[test]
    fn setters_chain() {
        let config = ClientConfig::default()
            .request_timeout(Duration::from_millis(250))
            .redial(true)
            .debug(true);
        assert_eq!(config.request_timeout, Duration::from_millis(250));
        assert!(config.redial && config.debug);
    }
}
