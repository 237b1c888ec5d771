// MIT License - Copyright (c) 2026 Peter Wright
// Client configuration

use std::time::Duration;

use crate::constants::DEFAULT_PORT;

/// Configuration for connecting to a spa controller.
///
/// Every timing is in milliseconds to keep the struct trivially
/// serialisable by hosts; the `*_interval()` style accessors convert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpaConfig {
    /// Controller IP address or host name
    pub host: String,
    /// Controller TCP port (default: 4257)
    pub port: u16,
    /// Delay before reconnecting after a transport error (default: 20000)
    pub reconnect_delay_ms: u64,
    /// Give up on a TCP connect after this long (default: 10000)
    pub connect_timeout_ms: u64,
    /// Liveness check period; a period without any status frame forces a
    /// reconnect (default: 60000)
    pub liveness_interval_ms: u64,
    /// First fault log request after connecting (default: 5000)
    pub fault_check_delay_ms: u64,
    /// Fault log request period (default: 600000)
    pub fault_check_interval_ms: u64,
    /// Configuration request delay after connecting (default: 15000)
    pub config_request_delay_ms: u64,
    /// Spacing between discovery panel requests (default: 1000)
    pub panel_request_stagger_ms: u64,
    /// Pause between button presses (default: 1000)
    pub press_interval_ms: u64,
    /// Lifetime of a partial frame (default: 1000)
    pub fragment_timeout_ms: u64,
    /// Report an unchanged status after this long anyway (default: 60000)
    pub keep_fresh_ms: u64,
    /// Maximum presses for one temperature change (default: 60)
    pub max_temperature_steps: u32,
    /// Broadcast event channel capacity (default: 64)
    pub event_capacity: usize,
}

impl Default for SpaConfig {
    fn default() -> Self {
        Self {
            host: "192.168.0.100".to_string(),
            port: DEFAULT_PORT,
            reconnect_delay_ms: 20_000,
            connect_timeout_ms: 10_000,
            liveness_interval_ms: 60_000,
            fault_check_delay_ms: 5_000,
            fault_check_interval_ms: 600_000,
            config_request_delay_ms: 15_000,
            panel_request_stagger_ms: 1_000,
            press_interval_ms: 1_000,
            fragment_timeout_ms: 1_000,
            keep_fresh_ms: 60_000,
            max_temperature_steps: 60,
            event_capacity: 64,
        }
    }
}

impl SpaConfig {
    /// Create a new config builder starting from defaults.
    pub fn builder() -> SpaConfigBuilder {
        SpaConfigBuilder::default()
    }

    /// `host:port` for `TcpStream::connect`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_interval_ms)
    }

    pub fn fault_check_delay(&self) -> Duration {
        Duration::from_millis(self.fault_check_delay_ms)
    }

    pub fn fault_check_interval(&self) -> Duration {
        Duration::from_millis(self.fault_check_interval_ms)
    }

    pub fn config_request_delay(&self) -> Duration {
        Duration::from_millis(self.config_request_delay_ms)
    }

    pub fn panel_request_stagger(&self) -> Duration {
        Duration::from_millis(self.panel_request_stagger_ms)
    }

    pub fn press_interval(&self) -> Duration {
        Duration::from_millis(self.press_interval_ms)
    }

    pub fn fragment_timeout(&self) -> Duration {
        Duration::from_millis(self.fragment_timeout_ms)
    }

    pub fn keep_fresh(&self) -> Duration {
        Duration::from_millis(self.keep_fresh_ms)
    }
}

/// Builder for SpaConfig.
#[derive(Debug, Clone, Default)]
pub struct SpaConfigBuilder {
    config: SpaConfig,
}

impl SpaConfigBuilder {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn reconnect_delay_ms(mut self, ms: u64) -> Self {
        self.config.reconnect_delay_ms = ms;
        self
    }

    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.connect_timeout_ms = ms;
        self
    }

    pub fn liveness_interval_ms(mut self, ms: u64) -> Self {
        self.config.liveness_interval_ms = ms;
        self
    }

    pub fn fault_check_delay_ms(mut self, ms: u64) -> Self {
        self.config.fault_check_delay_ms = ms;
        self
    }

    pub fn fault_check_interval_ms(mut self, ms: u64) -> Self {
        self.config.fault_check_interval_ms = ms;
        self
    }

    pub fn config_request_delay_ms(mut self, ms: u64) -> Self {
        self.config.config_request_delay_ms = ms;
        self
    }

    pub fn panel_request_stagger_ms(mut self, ms: u64) -> Self {
        self.config.panel_request_stagger_ms = ms;
        self
    }

    pub fn press_interval_ms(mut self, ms: u64) -> Self {
        self.config.press_interval_ms = ms;
        self
    }

    pub fn fragment_timeout_ms(mut self, ms: u64) -> Self {
        self.config.fragment_timeout_ms = ms;
        self
    }

    pub fn keep_fresh_ms(mut self, ms: u64) -> Self {
        self.config.keep_fresh_ms = ms;
        self
    }

    pub fn max_temperature_steps(mut self, steps: u32) -> Self {
        self.config.max_temperature_steps = steps;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    pub fn build(self) -> SpaConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SpaConfig::default();
        assert_eq!(config.port, 4257);
        assert_eq!(config.reconnect_delay(), Duration::from_secs(20));
        assert_eq!(config.liveness_interval(), Duration::from_secs(60));
        assert_eq!(config.fault_check_interval(), Duration::from_secs(600));
        assert_eq!(config.fragment_timeout(), Duration::from_secs(1));
        assert_eq!(config.max_temperature_steps, 60);
    }

    #[test]
    fn test_config_builder() {
        let config = SpaConfig::builder()
            .host("10.0.0.7")
            .port(4258)
            .reconnect_delay_ms(500)
            .press_interval_ms(250)
            .build();

        assert_eq!(config.address(), "10.0.0.7:4258");
        assert_eq!(config.reconnect_delay(), Duration::from_millis(500));
        assert_eq!(config.press_interval(), Duration::from_millis(250));
        assert_eq!(config.keep_fresh_ms, 60_000);
    }
}
