//! Runtime configuration for a [`crate::network::NetworkManager`] instance.
use std::time::Duration;

/// Immutable tuning knobs for one Network Manager instance (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkManagerConfig {
    /// Per-direction TP/ETP session cap.
    pub max_transport_sessions: usize,
    /// Tick-driver period; the manager should be ticked at least this often.
    pub tick_period: Duration,
    /// Bound on the outbound HAL queue.
    pub tx_queue_capacity: usize,
    /// How long an External CF may go unobserved before it is reaped.
    pub external_cf_ttl: Duration,
    /// Inclusive arbitrary address range used by address-claim fallback.
    pub arbitrary_address_range: (u8, u8),
}

impl Default for NetworkManagerConfig {
    fn default() -> Self {
        Self {
            max_transport_sessions: 4,
            tick_period: Duration::from_millis(8),
            tx_queue_capacity: 500,
            external_cf_ttl: Duration::from_secs(30),
            arbitrary_address_range: (128, 247),
        }
    }
}

impl NetworkManagerConfig {
    pub fn builder() -> NetworkManagerConfigBuilder {
        NetworkManagerConfigBuilder::default()
    }
}

/// Fluent builder over [`NetworkManagerConfig`]'s defaults.
#[derive(Debug, Default)]
pub struct NetworkManagerConfigBuilder {
    config: Option<NetworkManagerConfig>,
}

impl NetworkManagerConfigBuilder {
    fn base(&mut self) -> &mut NetworkManagerConfig {
        self.config.get_or_insert_with(NetworkManagerConfig::default)
    }

    pub fn max_transport_sessions(mut self, value: usize) -> Self {
        self.base().max_transport_sessions = value;
        self
    }

    pub fn tick_period(mut self, value: Duration) -> Self {
        self.base().tick_period = value;
        self
    }

    pub fn tx_queue_capacity(mut self, value: usize) -> Self {
        self.base().tx_queue_capacity = value;
        self
    }

    pub fn external_cf_ttl(mut self, value: Duration) -> Self {
        self.base().external_cf_ttl = value;
        self
    }

    pub fn arbitrary_address_range(mut self, value: (u8, u8)) -> Self {
        self.base().arbitrary_address_range = value;
        self
    }

    pub fn build(mut self) -> NetworkManagerConfig {
        self.base();
        self.config.unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = NetworkManagerConfig::default();
        assert_eq!(config.max_transport_sessions, 4);
        assert_eq!(config.tx_queue_capacity, 500);
        assert_eq!(config.external_cf_ttl, Duration::from_secs(30));
        assert_eq!(config.arbitrary_address_range, (128, 247));
    }

    #[test]
    fn builder_overrides_only_the_fields_it_touches() {
        let config = NetworkManagerConfig::builder()
            .max_transport_sessions(8)
            .build();
        assert_eq!(config.max_transport_sessions, 8);
        assert_eq!(config.tx_queue_capacity, 500);
    }

    #[test]
    fn builder_overrides_the_arbitrary_address_range() {
        let config = NetworkManagerConfig::builder()
            .arbitrary_address_range((100, 110))
            .build();
        assert_eq!(config.arbitrary_address_range, (100, 110));
    }
}
