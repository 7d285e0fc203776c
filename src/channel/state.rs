//! Channel lifecycle states.

use std::fmt;

/// Where a channel is in its lifecycle.
///
/// ```text
/// Closed → Connecting → Resolved → Open → Closing → Closed
/// ```
///
/// `Closed` is both the initial and the terminal state. A channel that has
/// reached `Closed` after connecting never leaves it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChannelState {
    /// Not connected.
    #[default]
    Closed,
    /// Waiting for the transport and for path resolution.
    Connecting,
    /// Pointer assigned, open request sent.
    Resolved,
    /// Open for traffic according to the channel mode.
    Open,
    /// Close requested by either side, waiting for the handshake to finish.
    Closing,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Closed => "Closed",
            Self::Connecting => "Connecting",
            Self::Resolved => "Resolved",
            Self::Open => "Open",
            Self::Closing => "Closing",
        };
        f.write_str(name)
    }
}
