//! Client entry point.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Client`] | Channel factory, owns the connection registry |
//! | [`ClientBuilder`] | Fluent configuration builder |
//!
//! # Example
//!
//! ```no_run
//! use winksock::{ChannelEvent, ChannelMode, Client, Result};
//!
//! # async fn example() -> Result<()> {
//! let client = Client::builder().build()?;
//!
//! let (channel, mut events) = client.channel();
//! channel.connect("example.com:7010/room", ChannelMode::READ_WRITE)?;
//!
//! if let Some(ChannelEvent::Open(_)) = events.recv().await {
//!     channel.send_text("hello")?;
//! }
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder for client configuration.
pub mod builder;

/// Core client implementation.
pub mod core;

// ============================================================================
// Re-exports
// ============================================================================

pub use self::core::Client;
pub use builder::ClientBuilder;
