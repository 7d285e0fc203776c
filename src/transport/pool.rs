//! Connection registry keyed by endpoint.
//!
//! Channels to the same endpoint share a connection unless their paths
//! collide, in which case the next connection (or a new one) is used.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │              ConnectionRegistry              │
//! │  ┌────────────────────────────────────────┐  │
//! │  │ http://a:80   → [conn-1 {/x, /y}]      │  │
//! │  │ http://b:7010 → [conn-2 {/x},          │  │
//! │  │                  conn-3 {/x}]          │  │
//! │  └────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────┘
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{debug, info};

use crate::channel::ChannelCore;
use crate::error::Result;

use super::connection::Connection;
use super::{Endpoint, Transport};

// ============================================================================
// Constants
// ============================================================================

/// Reason given to channels torn down by [`ConnectionRegistry::shutdown`].
pub const SHUTDOWN_REASON: &str = "Client shut down";

// ============================================================================
// ConnectionRegistry
// ============================================================================

/// Tracks live connections per endpoint.
///
/// Thread-safe; one registry is owned by each [`Client`](crate::Client).
pub struct ConnectionRegistry {
    /// Transport used for new connections.
    transport: Arc<dyn Transport>,

    /// Live connections by endpoint, in creation order.
    connections: Mutex<FxHashMap<Endpoint, Vec<Connection>>>,
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("endpoints", &self.endpoint_count())
            .field("connections", &self.connection_count())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// ConnectionRegistry - Constructor
// ============================================================================

impl ConnectionRegistry {
    /// Creates an empty registry.
    pub(crate) fn new(transport: Arc<dyn Transport>) -> Arc<Self> {
        Arc::new(Self {
            transport,
            connections: Mutex::new(FxHashMap::default()),
        })
    }
}

// ============================================================================
// ConnectionRegistry - Public API
// ============================================================================

impl ConnectionRegistry {
    /// Returns the number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.lock().values().map(Vec::len).sum()
    }

    /// Returns the number of endpoints with at least one live connection.
    #[must_use]
    pub fn endpoint_count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Returns the number of live connections to `endpoint`.
    #[must_use]
    pub fn connections_to(&self, endpoint: &Endpoint) -> usize {
        self.connections.lock().get(endpoint).map_or(0, Vec::len)
    }

    /// Returns `true` if the transport can reach `https` endpoints.
    #[inline]
    #[must_use]
    pub fn supports_tls(&self) -> bool {
        self.transport.supports_tls()
    }

    /// Closes every connection, tearing down all attached channels.
    pub fn shutdown(&self) {
        let connections: Vec<Connection> = {
            let mut map = self.connections.lock();
            map.drain().flat_map(|(_, list)| list).collect()
        };

        info!(connections = connections.len(), "Shutting down connections");
        for connection in connections {
            connection.close_all(SHUTDOWN_REASON);
        }
    }
}

// ============================================================================
// ConnectionRegistry - Internal
// ============================================================================

impl ConnectionRegistry {
    /// Attaches `channel` to a connection for `endpoint`.
    ///
    /// Reuses the first connection that does not already hold `path`,
    /// otherwise creates one.
    pub(crate) fn attach(
        self: &Arc<Self>,
        channel: &Arc<ChannelCore>,
        endpoint: &Endpoint,
        path: &str,
    ) -> Result<Connection> {
        let mut map = self.connections.lock();

        if let Some(list) = map.get(endpoint) {
            for connection in list {
                if connection.is_closed() || connection.has_path(path) {
                    continue;
                }
                match connection.attach(channel, path) {
                    Ok(()) => return Ok(connection.clone()),
                    Err(e) => {
                        debug!(connection = %connection.id(), error = %e, "Connection skipped");
                    }
                }
            }
        }

        let connection = Connection::spawn(
            endpoint.clone(),
            Arc::clone(&self.transport),
            Arc::downgrade(self),
        )?;
        connection.attach(channel, path)?;
        map.entry(endpoint.clone())
            .or_default()
            .push(connection.clone());

        debug!(
            connection = %connection.id(),
            %endpoint,
            total = map.get(endpoint).map_or(0, Vec::len),
            "Connection registered"
        );
        Ok(connection)
    }

    /// Removes `connection`; drops the endpoint entry once empty.
    pub(crate) fn deregister(&self, connection: &Connection) {
        let mut map = self.connections.lock();
        let endpoint = connection.endpoint();

        let Some(list) = map.get_mut(endpoint) else {
            return;
        };
        list.retain(|c| c.id() != connection.id());
        if list.is_empty() {
            map.remove(endpoint);
        }

        debug!(connection = %connection.id(), %endpoint, "Connection deregistered");
    }
}

// ============================================================================
// Tests
// ============================================================================
