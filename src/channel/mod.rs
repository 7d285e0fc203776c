//! Channels: path-addressed conversations over a shared connection.
//!
//! # Lifecycle
//!
//! ```text
//! connect()        resolve ok        open ok          close()/End
//! Closed ──► Connecting ──► Resolved ──► Open ──► Closing ──► Closed
//!                 │              │                             ▲
//!                 └──────────────┴── deny / failure ───────────┘
//! ```
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Channel`] | Handle used to connect, send, emit and close |
//! | [`ChannelEvents`] | Queue of notifications for one channel |
//! | [`ChannelEvent`] | Open, data, signal and closed notifications |
//! | [`ChannelState`] | Lifecycle state |

// ============================================================================
// Submodules
// ============================================================================

/// Shared state machine driven by the handle and the connection.
pub(crate) mod core;

/// Notifications raised by a channel.
pub mod event;

/// Public channel handle.
pub mod handle;

/// Lifecycle states.
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub(crate) use self::core::{ChannelCore, Resolution};
pub use event::{
    ChannelClosed, ChannelData, ChannelEvent, ChannelEvents, ChannelMessage, UNKNOWN_REASON,
};
pub use handle::Channel;
pub use state::ChannelState;
