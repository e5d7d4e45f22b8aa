use std::time::Duration;

/// Broker-level configuration.
///
/// Controls the default batch timeout, the identity parameter forwarded to
/// called services, and the background worker.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Batch timeout used when the caller does not supply one.
    pub default_timeout: Duration,
    /// Cache key, within a region, of the signed-in user's identifier.
    pub user_identifier_cache_key: String,
    /// Post parameter name under which the identifier is forwarded.
    pub user_identifier_post_key: String,
    /// Interval at which the background worker reaps finished work items.
    pub worker_tick_interval: Duration,
    /// Capacity of the background worker's queue.
    pub worker_channel_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(5),
            user_identifier_cache_key: "BorgerId".to_string(),
            user_identifier_post_key: "Cpr".to_string(),
            worker_tick_interval: Duration::from_secs(1),
            worker_channel_capacity: 256,
        }
    }
}
