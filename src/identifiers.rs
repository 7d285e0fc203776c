//! Type-safe identifiers.
//!
//! Newtype wrappers keep wire pointers and local handles from being mixed.
//!
//! | Type | Origin | Description |
//! |------|--------|-------------|
//! | [`Pointer`] | Remote | Server-assigned route for a resolved path |
//! | [`ConnectionId`] | Local | Identity of one physical connection |
//! | [`ChannelId`] | Local | Identity of one channel handle |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

// ============================================================================
// Pointer
// ============================================================================

/// Numeric route identifier assigned by the remote after path resolution.
///
/// Pointer `0` is reserved: inbound frames addressed to it are delivered
/// to every channel on the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Pointer(u32);

impl Pointer {
    /// The broadcast/control pointer.
    pub const BROADCAST: Self = Self(0);

    /// Wraps a raw wire value.
    #[inline]
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Returns the raw wire value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Returns `true` for the broadcast pointer.
    #[inline]
    #[must_use]
    pub const fn is_broadcast(self) -> bool {
        self.0 == 0
    }
}

impl From<u32> for Pointer {
    #[inline]
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// ConnectionId
// ============================================================================

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a physical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocates the next identifier.
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

// ============================================================================
// ChannelId
// ============================================================================

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a channel handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(u64);

impl ChannelId {
    /// Allocates the next identifier.
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chan-{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================
