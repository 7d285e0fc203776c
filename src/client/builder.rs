//! Builder pattern for client configuration.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use winksock::{Client, TcpOptions, TcpTransport};
//!
//! # fn example() -> winksock::Result<()> {
//! let transport = TcpTransport::with_options(
//!     TcpOptions::new().handshake_timeout(Some(Duration::from_secs(5))),
//! );
//!
//! let client = Client::builder()
//!     .transport(transport)
//!     .max_payload_size(16 * 1024)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::protocol::PAYLOAD_MAX_SIZE;
use crate::transport::{TcpTransport, Transport};

use super::core::Client;

// ============================================================================
// ClientBuilder
// ============================================================================

/// Builder for configuring a [`Client`].
///
/// Use [`Client::builder()`] to create a new builder.
#[derive(Default, Clone)]
pub struct ClientBuilder {
    /// Transport for new connections. Defaults to [`TcpTransport`].
    transport: Option<Arc<dyn Transport>>,
    /// Largest payload accepted by send, emit and close.
    max_payload_size: Option<usize>,
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("custom_transport", &self.transport.is_some())
            .field("max_payload_size", &self.max_payload_size)
            .finish()
    }
}

// ============================================================================
// ClientBuilder Implementation
// ============================================================================

impl ClientBuilder {
    /// Creates a builder with default configuration.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the transport used for new connections.
    #[inline]
    #[must_use]
    pub fn transport(mut self, transport: impl Transport) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Sets a shared transport.
    #[inline]
    #[must_use]
    pub fn shared_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Sets the payload limit for outgoing frames.
    ///
    /// Must be between 1 and [`PAYLOAD_MAX_SIZE`].
    #[inline]
    #[must_use]
    pub fn max_payload_size(mut self, size: usize) -> Self {
        self.max_payload_size = Some(size);
        self
    }

    /// Builds the client with validation.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if the payload limit is out of range.
    pub fn build(self) -> Result<Client> {
        let max_payload_size = self.validate_max_payload_size()?;
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(TcpTransport::new()));

        Ok(Client::new_with(transport, max_payload_size))
    }
}

// ============================================================================
// Validation
// ============================================================================

impl ClientBuilder {
    fn validate_max_payload_size(&self) -> Result<usize> {
        match self.max_payload_size {
            None => Ok(PAYLOAD_MAX_SIZE),
            Some(size) if (1..=PAYLOAD_MAX_SIZE).contains(&size) => Ok(size),
            Some(size) => Err(Error::config(format!(
                "max_payload_size must be between 1 and {PAYLOAD_MAX_SIZE}, got {size}"
            ))),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
