//! Channel capability bits.
//!
//! The mode is sent as the flag of an outgoing Open frame.
//!
//! | Bit | Capability |
//! |-----|------------|
//! | `0` | Listen (signals only) |
//! | `1` | Read data |
//! | `2` | Write data |
//! | `4` | Emit signals |

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Capability bitset a channel is opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ChannelMode(u8);

impl ChannelMode {
    /// Receive signals only.
    pub const LISTEN: Self = Self(0x0);
    /// Receive data.
    pub const READ: Self = Self(0x1);
    /// Send data.
    pub const WRITE: Self = Self(0x2);
    /// Emit signals.
    pub const EMIT: Self = Self(0x4);
    /// Receive and send data.
    pub const READ_WRITE: Self = Self(0x3);
    /// Receive data, emit signals.
    pub const READ_EMIT: Self = Self(0x5);
    /// Send data, emit signals.
    pub const WRITE_EMIT: Self = Self(0x6);
    /// Every capability.
    pub const READ_WRITE_EMIT: Self = Self(0x7);

    /// Builds a mode from raw bits; `None` if bits above `EMIT` are set.
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u8) -> Option<Self> {
        if bits & !0x7 == 0 {
            Some(Self(bits))
        } else {
            None
        }
    }

    /// Raw bits.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Returns `true` if every bit of `other` is set in `self`.
    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Data may be received.
    #[inline]
    #[must_use]
    pub const fn can_read(self) -> bool {
        self.contains(Self::READ)
    }

    /// Data may be sent.
    #[inline]
    #[must_use]
    pub const fn can_write(self) -> bool {
        self.contains(Self::WRITE)
    }

    /// Signals may be emitted.
    #[inline]
    #[must_use]
    pub const fn can_emit(self) -> bool {
        self.contains(Self::EMIT)
    }
}

impl BitOr for ChannelMode {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ChannelMode {
    #[inline]
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for ChannelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return f.write_str("listen");
        }
        let names = [(Self::READ, "read"), (Self::WRITE, "write"), (Self::EMIT, "emit")];
        let mut first = true;
        for (bit, name) in names {
            if self.contains(bit) {
                if !first {
                    f.write_str("+")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}
