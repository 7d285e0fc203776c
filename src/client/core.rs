//! Client: channel factory and owner of the connection registry.
//!
//! # Example
//!
//! ```no_run
//! use winksock::{ChannelMode, Client};
//!
//! # async fn example() -> winksock::Result<()> {
//! let client = Client::new();
//!
//! let (chat, _chat_events) = client.channel();
//! chat.connect("example.com:7010/chat", ChannelMode::READ_WRITE)?;
//!
//! // Shares the connection opened by `chat`.
//! let (news, _news_events) = client.channel();
//! news.connect("example.com:7010/news", ChannelMode::READ)?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use crate::channel::{Channel, ChannelCore, ChannelEvents};
use crate::transport::{ConnectionRegistry, Transport};

use super::builder::ClientBuilder;

// ============================================================================
// Types
// ============================================================================

/// Internal shared state for the client.
pub(crate) struct ClientInner {
    /// Live connections by endpoint.
    pub registry: Arc<ConnectionRegistry>,

    /// Largest payload accepted by send, emit and close.
    pub max_payload_size: usize,
}

// ============================================================================
// Client
// ============================================================================

/// Entry point: creates channels and owns their connections.
///
/// Cloning is cheap; clones share the same connections. Connections close
/// on their own once their last channel is gone; [`shutdown`](Self::shutdown)
/// closes them all at once.
#[derive(Clone)]
pub struct Client {
    /// Shared inner state.
    pub(crate) inner: Arc<ClientInner>,
}

// ============================================================================
// Client - Display
// ============================================================================

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("connections", &self.connection_count())
            .field("max_payload_size", &self.inner.max_payload_size)
            .finish_non_exhaustive()
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Client - Constructors
// ============================================================================

impl Client {
    /// Creates a client with the default TCP transport.
    #[must_use]
    pub fn new() -> Self {
        Self::new_with(
            Arc::new(crate::transport::TcpTransport::new()),
            crate::protocol::PAYLOAD_MAX_SIZE,
        )
    }

    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub(crate) fn new_with(transport: Arc<dyn Transport>, max_payload_size: usize) -> Self {
        debug!(
            tls = transport.supports_tls(),
            max_payload_size, "Client created"
        );
        Self {
            inner: Arc::new(ClientInner {
                registry: ConnectionRegistry::new(transport),
                max_payload_size,
            }),
        }
    }
}

// ============================================================================
// Client - Public API
// ============================================================================

impl Client {
    /// Creates a closed channel and the receiver for its events.
    #[must_use]
    pub fn channel(&self) -> (Channel, ChannelEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        let core = Arc::new(ChannelCore::new(tx));
        (Channel::new(core, self.clone()), ChannelEvents::new(rx))
    }

    /// Number of live connections.
    #[inline]
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.inner.registry.connection_count()
    }

    /// Payload limit for outgoing frames.
    #[inline]
    #[must_use]
    pub fn max_payload_size(&self) -> usize {
        self.inner.max_payload_size
    }

    /// Returns `true` if `https` URIs can be connected.
    #[inline]
    #[must_use]
    pub fn supports_tls(&self) -> bool {
        self.inner.registry.supports_tls()
    }

    /// Connection registry.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.inner.registry
    }

    /// Closes every connection. Attached channels receive
    /// [`ChannelEvent::Closed`](crate::ChannelEvent::Closed).
    pub fn shutdown(&self) {
        self.inner.registry.shutdown();
    }
}

// ============================================================================
// Tests
// ============================================================================
