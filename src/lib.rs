//! Winksock - multiplexed, path-addressed pub/sub channels.
//!
//! This library connects named channels (`host:port/path`) to a broker and
//! carries data and signals over them. Any number of channels to the same
//! host share one physical connection.
//!
//! # Architecture
//!
//! - **Channel**: one conversation on one path, opened with a mode
//!   (read, write, emit)
//! - **Connection**: one transport link, resolves paths to numeric pointers
//!   and routes inbound frames to channels
//! - **Registry**: hands out connections per endpoint, opening a second one
//!   when a path is already in use
//!
//! Key design principles:
//!
//! - Each connection is a tokio task; channels never block
//! - Outbound frames are written in submission order
//! - Inbound frames are dispatched in arrival order
//! - Notifications are queued per channel, never called back under a lock
//!
//! # Quick Start
//!
//! ```no_run
//! use winksock::{ChannelEvent, ChannelMode, Client, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = Client::new();
//!     let (channel, mut events) = client.channel();
//!
//!     // The query string is sent as the open token.
//!     channel.connect("example.com:7010/chat?secret", ChannelMode::READ_WRITE)?;
//!
//!     while let Some(event) = events.recv().await {
//!         match event {
//!             ChannelEvent::Open(_) => channel.send_text("hello")?,
//!             ChannelEvent::Data(data) => {
//!                 println!("received: {:?}", data.text());
//!                 channel.close()?;
//!             }
//!             ChannelEvent::Signal(signal) => println!("signal: {:?}", signal.text()),
//!             ChannelEvent::Closed(closed) => {
//!                 println!("closed: {}", closed.reason);
//!                 break;
//!             }
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`channel`] | [`Channel`] handle, states and events |
//! | [`client`] | [`Client`] factory and configuration |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Wire frame, codec and channel modes |
//! | [`transport`] | Connections, registry and transports |
//!
//! # Features
//!
//! - `tls`: `https` endpoints via `tokio-rustls` with the web PKI roots

// ============================================================================
// Modules
// ============================================================================

/// Channels: handle, lifecycle states and events.
pub mod channel;

/// Client factory and configuration.
///
/// Use [`Client::builder()`] to configure a client.
pub mod client;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
pub mod identifiers;

/// Wire protocol: frames, codec and channel modes.
pub mod protocol;

/// Transport layer: connections, registry and transports.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Channel types
pub use channel::{
    Channel, ChannelClosed, ChannelData, ChannelEvent, ChannelEvents, ChannelMessage,
    ChannelState,
};

// Client types
pub use client::{Client, ClientBuilder};

// Error types
pub use error::{Error, FrameError, Result};

// Identifier types
pub use identifiers::{ChannelId, ConnectionId, Pointer};

// Protocol types
pub use protocol::{ChannelMode, ContentType, DeliveryPriority, Frame, FrameCodec};

// Transport types
pub use transport::{
    Endpoint, MemoryRemote, MemoryTransport, Scheme, TcpOptions, TcpTransport, Transport,
};
