//! Error types for winksock.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use winksock::{ChannelMode, Client, Result};
//!
//! async fn example(client: &Client) -> Result<()> {
//!     let (channel, _events) = client.channel();
//!     channel.connect("public.example.net/room", ChannelMode::READ_WRITE)?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Usage | [`Error::InvalidUri`], [`Error::UnsupportedScheme`], [`Error::TlsUnsupported`], [`Error::InvalidState`], [`Error::PayloadTooLarge`], [`Error::PathInUse`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionClosed`], [`Error::Handshake`] |
//! | Protocol | [`Error::Protocol`], [`Error::Frame`] |
//! | External | [`Error::Io`], [`Error::Url`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;

use crate::channel::ChannelState;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// FrameError
// ============================================================================

/// Errors raised while encoding or decoding a wire frame.
#[derive(Error, Debug)]
pub enum FrameError {
    /// Fewer bytes than the fixed header, or a length prefix below it.
    #[error("malformed frame: {message}")]
    Malformed {
        /// Description of what was wrong.
        message: String,
    },

    /// The descriptor carried an opcode outside the known set.
    #[error("unknown opcode: {opcode:#x}")]
    UnknownOpcode {
        /// The raw 3-bit opcode value.
        opcode: u8,
    },

    /// The payload does not fit in the 2-byte length field.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge {
        /// Actual payload size.
        size: usize,
        /// Largest payload allowed.
        max: usize,
    },

    /// An I/O error from the underlying stream.
    #[error("frame I/O error: {0}")]
    Io(#[from] IoError),
}

impl FrameError {
    /// Creates a malformed frame error.
    #[inline]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when client configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Usage Errors
    // ========================================================================
    /// The channel URI could not be used.
    #[error("Invalid URI: {message}")]
    InvalidUri {
        /// Description of the problem.
        message: String,
    },

    /// The URI scheme is neither `http` nor `https`.
    #[error("Unsupported scheme: {scheme}")]
    UnsupportedScheme {
        /// The rejected scheme.
        scheme: String,
    },

    /// An `https` URI was given but the transport cannot do TLS.
    #[error("TLS is not supported by the configured transport")]
    TlsUnsupported,

    /// Operation not allowed in the channel's current state or mode.
    #[error("Invalid state ({state}): {message}")]
    InvalidState {
        /// State the channel was in.
        state: ChannelState,
        /// Description of the rejected operation.
        message: String,
    },

    /// Payload exceeds the configured maximum.
    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge {
        /// Actual payload size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// The path is already attached to this connection.
    #[error("Path already attached to connection: {path}")]
    PathInUse {
        /// The contested path.
        path: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Transport connection failed.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Connection closed or closing.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The upgrade handshake was rejected or malformed.
    #[error("Handshake failed: {message}")]
    Handshake {
        /// Reason reported by the server, or a description of the failure.
        message: String,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Protocol violation by the remote end.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// Frame encoding or decoding error.
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// URL parse error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid URI error.
    #[inline]
    pub fn invalid_uri(message: impl Into<String>) -> Self {
        Self::InvalidUri {
            message: message.into(),
        }
    }

    /// Creates an unsupported scheme error.
    #[inline]
    pub fn unsupported_scheme(scheme: impl Into<String>) -> Self {
        Self::UnsupportedScheme {
            scheme: scheme.into(),
        }
    }

    /// Creates an invalid state error.
    #[inline]
    pub fn invalid_state(state: ChannelState, message: impl Into<String>) -> Self {
        Self::InvalidState {
            state,
            message: message.into(),
        }
    }

    /// Creates a payload too large error.
    #[inline]
    pub fn payload_too_large(size: usize, max: usize) -> Self {
        Self::PayloadTooLarge { size, max }
    }

    /// Creates a path in use error.
    #[inline]
    pub fn path_in_use(path: impl Into<String>) -> Self {
        Self::PathInUse { path: path.into() }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a handshake error.
    #[inline]
    pub fn handshake(message: impl Into<String>) -> Self {
        Self::Handshake {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this error was caused by the caller's request.
    ///
    /// Usage errors are reported before anything touches the network.
    #[inline]
    #[must_use]
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidUri { .. }
                | Self::UnsupportedScheme { .. }
                | Self::TlsUnsupported
                | Self::InvalidState { .. }
                | Self::PayloadTooLarge { .. }
                | Self::PathInUse { .. }
        )
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::ConnectionClosed | Self::Handshake { .. } | Self::Io(_)
        )
    }

    /// Returns `true` if the remote end broke the protocol.
    #[inline]
    #[must_use]
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Self::Protocol { .. } | Self::Frame(_))
    }
}

// ============================================================================
// Tests
// ============================================================================
