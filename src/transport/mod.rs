//! Transport layer.
//!
//! A [`Transport`] turns an [`Endpoint`] into a pair of frame sink and
//! frame stream. Everything above it works in whole [`Frame`]s.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────┐
//! │     ConnectionRegistry    │  endpoint → [Connection, ...]
//! └─────────────┬─────────────┘
//!               │ attach(channel, path)
//! ┌─────────────▼─────────────┐       ┌──────────────┐
//! │        Connection         │◄─────►│  Transport   │  tcp / memory
//! │  paths, routes, refcount  │ Frame │  (FramedIo)  │
//! └───────────────────────────┘       └──────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | Multiplexed connection and its event loop |
//! | `handshake` | HTTP upgrade to the framed protocol |
//! | `memory` | In-process transport with a scriptable remote |
//! | `pool` | Connection registry keyed by endpoint |
//! | `tcp` | TCP transport, with TLS behind the `tls` feature |

// ============================================================================
// Submodules
// ============================================================================

/// Multiplexed connection and event loop.
pub mod connection;

/// HTTP upgrade handshake.
pub mod handshake;

/// In-process transport.
pub mod memory;

/// Connection registry.
pub mod pool;

/// TCP transport.
pub mod tcp;

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Sink, Stream};
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::Frame;

// ============================================================================
// Re-exports
// ============================================================================

pub(crate) use connection::Connection;
pub use memory::{MemoryRemote, MemoryTransport};
pub use pool::ConnectionRegistry;
pub use tcp::{TcpOptions, TcpTransport};

// ============================================================================
// Types
// ============================================================================

/// Outbound half of an established transport.
pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = Error> + Send>>;

/// Inbound half of an established transport.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame>> + Send>>;

/// An established, handshaked transport.
pub struct FramedIo {
    /// Frames written to the remote, in order.
    pub sink: FrameSink,
    /// Frames read from the remote, in order.
    pub stream: FrameStream,
}

impl fmt::Debug for FramedIo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FramedIo").finish_non_exhaustive()
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Establishes framed links to endpoints.
///
/// `connect` returns once the handshake has completed; the connection
/// treats that as the signal to flush its queued resolve requests.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Returns `true` if `https` endpoints can be reached.
    fn supports_tls(&self) -> bool;

    /// Opens a link to `endpoint` and performs the handshake.
    async fn connect(&self, endpoint: &Endpoint) -> Result<FramedIo>;
}

// ============================================================================
// Scheme
// ============================================================================

/// URI scheme of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// Plain TCP.
    Http,
    /// TLS over TCP.
    Https,
}

impl Scheme {
    /// Default port for the scheme.
    #[inline]
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::Http => 80,
            Self::Https => 443,
        }
    }

    /// Scheme name as written in a URI.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Endpoint
// ============================================================================

/// Scheme, host and port of a remote.
///
/// Channels whose URIs share an endpoint may share a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    scheme: Scheme,
    host: String,
    port: u16,
}

impl Endpoint {
    /// Creates an endpoint.
    #[must_use]
    pub fn new(scheme: Scheme, host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme,
            host: host.into(),
            port,
        }
    }

    /// Extracts the endpoint of a channel URI.
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedScheme`] unless the scheme is `http` or `https`
    /// - [`Error::InvalidUri`] if the URI has no host
    pub fn from_url(url: &Url) -> Result<Self> {
        let scheme = match url.scheme() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            other => return Err(Error::unsupported_scheme(other)),
        };

        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| Error::invalid_uri(format!("{url}: missing host")))?;

        let port = url.port().unwrap_or_else(|| scheme.default_port());

        Ok(Self::new(scheme, host, port))
    }

    /// Scheme.
    #[inline]
    #[must_use]
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Host name or address, as written in the URI.
    #[inline]
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port, defaulted from the scheme.
    #[inline]
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns `true` for `https` endpoints.
    #[inline]
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.scheme == Scheme::Https
    }

    /// Host with IPv6 brackets removed, for socket address lookup.
    #[must_use]
    pub fn socket_host(&self) -> &str {
        self.host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(&self.host)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

// ============================================================================
// Tests
// ============================================================================
