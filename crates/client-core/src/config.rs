//! Client configuration

use std::time::Duration;

use crate::peer_link::IceEndpoint;
use zvonok_store_core::UserId;

/// Configuration for a [`ClientManager`](crate::ClientManager)
///
/// Built with `with_*` methods:
///
/// ```
/// use zvonok_client_core::ClientConfig;
///
/// let config = ClientConfig::new("u-alice", "Alice", "alice@example.com")
///     .with_poll_fallback(true)
///     .with_ring_timeout(std::time::Duration::from_secs(45));
/// assert!(config.poll_fallback);
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Stable identity of the local user
    pub user_id: UserId,
    /// Display name published to peers
    pub display_name: String,
    /// Public handle other users look this client up by
    pub email: String,
    /// Engage the periodic re-read of call records addressed to this
    /// client, for platforms whose push delivery cannot be trusted
    pub poll_fallback: bool,
    /// Interval of the poll fallback
    pub poll_interval: Duration,
    /// When set, a locally initiated call still ringing after this long
    /// is cancelled. `None` means a ringing call waits indefinitely for
    /// an explicit action.
    pub ring_timeout: Option<Duration>,
    /// Traversal-assistance endpoints; overrides the configured provider
    pub ice_endpoints: Option<Vec<IceEndpoint>>,
    /// Capacity of the broadcast event channel
    pub event_buffer: usize,
}

impl ClientConfig {
    pub fn new(
        user_id: impl Into<String>,
        display_name: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            user_id: UserId::new(user_id),
            display_name: display_name.into(),
            email: email.into(),
            poll_fallback: false,
            poll_interval: Duration::from_secs(2),
            ring_timeout: None,
            ice_endpoints: None,
            event_buffer: 64,
        }
    }

    pub fn with_poll_fallback(mut self, enabled: bool) -> Self {
        self.poll_fallback = enabled;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_ring_timeout(mut self, timeout: Duration) -> Self {
        self.ring_timeout = Some(timeout);
        self
    }

    pub fn with_ice_endpoints(mut self, endpoints: Vec<IceEndpoint>) -> Self {
        self.ice_endpoints = Some(endpoints);
        self
    }

    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity;
        self
    }
}
