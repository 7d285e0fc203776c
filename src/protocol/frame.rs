//! Wire frame and its fixed-header encoding.
//!
//! # Format
//!
//! ```text
//! ┌──────────────┬──────────────┬────────────┬─────────────────┐
//! │ Length (2B)  │ Pointer (4B) │ Desc (1B)  │ Payload          │
//! │ big-endian   │ big-endian   │            │ (Length - 5 B)   │
//! └──────────────┴──────────────┴────────────┴─────────────────┘
//!
//! Descriptor:  bit 7   bit 6    bits 5..3   bits 2..0
//!              unused  ctype    opcode      flag
//! ```
//!
//! `Length` counts the pointer, descriptor and payload, not itself.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::FrameError;
use crate::identifiers::Pointer;

use super::mode::ChannelMode;

// ============================================================================
// Constants
// ============================================================================

/// Size of the length prefix.
pub const LENGTH_SIZE: usize = 2;

/// Fixed header: pointer (4) + descriptor (1).
pub const HEADER_SIZE: usize = 5;

/// Largest payload the 2-byte length prefix can carry.
pub const PAYLOAD_MAX_SIZE: usize = u16::MAX as usize - HEADER_SIZE;

const FLAG_MASK: u8 = 0x07;
const OP_POS: u8 = 3;
const OP_MASK: u8 = 0x07 << OP_POS;
const CTYPE_POS: u8 = 6;
const CTYPE_MASK: u8 = 0x01 << CTYPE_POS;

// ============================================================================
// ContentType
// ============================================================================

/// Payload interpretation hint carried in the descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ContentType {
    /// UTF-8 text.
    #[default]
    Utf8 = 0,
    /// Opaque bytes.
    Binary = 1,
}

impl ContentType {
    #[inline]
    const fn from_bit(bit: u8) -> Self {
        if bit == 0 { Self::Utf8 } else { Self::Binary }
    }
}

// ============================================================================
// OpCode
// ============================================================================

/// Frame operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    /// Link keep-alive, no channel semantics.
    KeepAlive = 0,
    /// Open request (outbound) or open response (inbound).
    Open = 1,
    /// Channel data.
    Data = 2,
    /// Out-of-band signal: emit, end or error.
    Signal = 3,
    /// Path to pointer resolution.
    Resolve = 4,
}

impl TryFrom<u8> for OpCode {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::KeepAlive),
            1 => Ok(Self::Open),
            2 => Ok(Self::Data),
            3 => Ok(Self::Signal),
            4 => Ok(Self::Resolve),
            opcode => Err(FrameError::UnknownOpcode { opcode }),
        }
    }
}

// ============================================================================
// Flags
// ============================================================================

/// Flag of an inbound Open frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpenFlag {
    /// The open request was granted.
    Success = 0,
    /// The open request was denied.
    Deny = 1,
}

/// Flag of a Signal frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SignalFlag {
    /// Application signal.
    Emit = 0,
    /// Cooperative close.
    End = 1,
    /// Close caused by an error on the remote side.
    Error = 3,
}

/// Flag of an inbound Resolve frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResolveFlag {
    /// The path resolved; the frame pointer is its route.
    Success = 0,
    /// The path could not be resolved.
    Error = 1,
}

/// Delivery priority of a Data frame.
///
/// Only a wire marker; the client does not retransmit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum DeliveryPriority {
    /// Must be delivered.
    #[default]
    Guaranteed = 0,
    /// Highest best-effort priority.
    Highest = 1,
    /// High best-effort priority.
    High = 2,
    /// Low best-effort priority.
    Low = 3,
    /// Lowest best-effort priority.
    Lowest = 4,
}

impl DeliveryPriority {
    /// Maps a raw flag; values above 4 are not priorities.
    #[inline]
    #[must_use]
    pub const fn from_flag(flag: u8) -> Option<Self> {
        match flag {
            0 => Some(Self::Guaranteed),
            1 => Some(Self::Highest),
            2 => Some(Self::High),
            3 => Some(Self::Low),
            4 => Some(Self::Lowest),
            _ => None,
        }
    }
}

// ============================================================================
// Frame
// ============================================================================

/// One protocol message.
///
/// An empty payload is normalised to `None`; the wire cannot tell them apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pointer: Pointer,
    opcode: OpCode,
    flag: u8,
    content_type: ContentType,
    payload: Option<Bytes>,
}

// ============================================================================
// Frame - Constructors
// ============================================================================

impl Frame {
    /// Creates a frame from its parts. The flag is truncated to 3 bits.
    #[must_use]
    pub fn new(
        pointer: impl Into<Pointer>,
        opcode: OpCode,
        flag: u8,
        content_type: ContentType,
        payload: Option<Bytes>,
    ) -> Self {
        Self {
            pointer: pointer.into(),
            opcode,
            flag: flag & FLAG_MASK,
            content_type,
            payload: payload.filter(|p| !p.is_empty()),
        }
    }

    /// Path resolution request, always on the broadcast pointer.
    #[must_use]
    pub fn resolve(path: &str) -> Self {
        Self::new(
            Pointer::BROADCAST,
            OpCode::Resolve,
            ResolveFlag::Success as u8,
            ContentType::Utf8,
            Some(Bytes::copy_from_slice(path.as_bytes())),
        )
    }

    /// Open request carrying the requested mode as its flag.
    #[must_use]
    pub fn open(
        pointer: Pointer,
        mode: ChannelMode,
        content_type: ContentType,
        token: Option<Bytes>,
    ) -> Self {
        Self::new(pointer, OpCode::Open, mode.bits(), content_type, token)
    }

    /// Data frame.
    #[must_use]
    pub fn data(
        pointer: Pointer,
        priority: DeliveryPriority,
        content_type: ContentType,
        payload: Bytes,
    ) -> Self {
        Self::new(
            pointer,
            OpCode::Data,
            priority as u8,
            content_type,
            Some(payload),
        )
    }

    /// Signal frame.
    #[must_use]
    pub fn signal(
        pointer: Pointer,
        flag: SignalFlag,
        content_type: ContentType,
        payload: Option<Bytes>,
    ) -> Self {
        Self::new(pointer, OpCode::Signal, flag as u8, content_type, payload)
    }

    /// Returns a copy whose payload is a fresh allocation.
    ///
    /// Used when one inbound frame fans out to several channels.
    #[must_use]
    pub fn duplicate(&self) -> Self {
        Self {
            payload: self
                .payload
                .as_ref()
                .map(|p| Bytes::copy_from_slice(p)),
            ..self.clone()
        }
    }
}

// ============================================================================
// Frame - Accessors
// ============================================================================

impl Frame {
    /// Route of this frame.
    #[inline]
    #[must_use]
    pub fn pointer(&self) -> Pointer {
        self.pointer
    }

    /// Operation.
    #[inline]
    #[must_use]
    pub fn opcode(&self) -> OpCode {
        self.opcode
    }

    /// Raw 3-bit flag.
    #[inline]
    #[must_use]
    pub fn flag(&self) -> u8 {
        self.flag
    }

    /// Payload content type.
    #[inline]
    #[must_use]
    pub fn content_type(&self) -> ContentType {
        self.content_type
    }

    /// Payload, if any.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> Option<&Bytes> {
        self.payload.as_ref()
    }

    /// Consumes the frame, returning its payload.
    #[inline]
    #[must_use]
    pub fn into_payload(self) -> Option<Bytes> {
        self.payload
    }

    /// Payload length in bytes.
    #[inline]
    #[must_use]
    pub fn payload_len(&self) -> usize {
        self.payload.as_ref().map_or(0, Bytes::len)
    }

    /// Flag read as an open response.
    #[must_use]
    pub fn open_flag(&self) -> OpenFlag {
        if self.flag == OpenFlag::Success as u8 {
            OpenFlag::Success
        } else {
            OpenFlag::Deny
        }
    }

    /// Flag read as a signal type, `None` for unassigned values.
    #[must_use]
    pub fn signal_flag(&self) -> Option<SignalFlag> {
        match self.flag {
            0 => Some(SignalFlag::Emit),
            1 => Some(SignalFlag::End),
            3 => Some(SignalFlag::Error),
            _ => None,
        }
    }

    /// Flag read as a resolve response.
    #[must_use]
    pub fn resolve_flag(&self) -> ResolveFlag {
        if self.flag == ResolveFlag::Success as u8 {
            ResolveFlag::Success
        } else {
            ResolveFlag::Error
        }
    }

    /// Flag read as a delivery priority.
    #[must_use]
    pub fn priority(&self) -> Option<DeliveryPriority> {
        DeliveryPriority::from_flag(self.flag)
    }

    /// Payload decoded as UTF-8 when the content type says it is text.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match (self.content_type, &self.payload) {
            (ContentType::Utf8, Some(p)) => std::str::from_utf8(p).ok(),
            _ => None,
        }
    }

    /// Size on the wire including the length prefix.
    #[inline]
    #[must_use]
    pub fn wire_size(&self) -> usize {
        LENGTH_SIZE + HEADER_SIZE + self.payload_len()
    }
}

// ============================================================================
// Frame - Encoding
// ============================================================================

impl Frame {
    fn descriptor(&self) -> u8 {
        ((self.content_type as u8) << CTYPE_POS) | ((self.opcode as u8) << OP_POS) | self.flag
    }

    /// Appends the length-prefixed encoding of this frame to `dst`.
    ///
    /// # Errors
    ///
    /// [`FrameError::PayloadTooLarge`] if the payload exceeds
    /// [`PAYLOAD_MAX_SIZE`].
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), FrameError> {
        let payload_len = self.payload_len();
        if payload_len > PAYLOAD_MAX_SIZE {
            return Err(FrameError::PayloadTooLarge {
                size: payload_len,
                max: PAYLOAD_MAX_SIZE,
            });
        }

        dst.reserve(LENGTH_SIZE + HEADER_SIZE + payload_len);
        dst.put_u16((HEADER_SIZE + payload_len) as u16);
        dst.put_u32(self.pointer.get());
        dst.put_u8(self.descriptor());
        if let Some(payload) = &self.payload {
            dst.put_slice(payload);
        }
        Ok(())
    }

    /// Encodes this frame into a standalone buffer.
    ///
    /// # Errors
    ///
    /// See [`Frame::encode`].
    pub fn to_bytes(&self) -> Result<Bytes, FrameError> {
        let mut buf = BytesMut::with_capacity(self.wire_size());
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Decodes a frame whose length prefix has already been consumed.
    ///
    /// Everything after the 5-byte header is taken verbatim as payload.
    ///
    /// # Errors
    ///
    /// - [`FrameError::Malformed`] if fewer than 5 bytes are given
    /// - [`FrameError::UnknownOpcode`] for opcodes above `Resolve`
    pub fn decode(mut src: Bytes) -> Result<Self, FrameError> {
        if src.len() < HEADER_SIZE {
            return Err(FrameError::malformed(format!(
                "{} bytes is shorter than the {HEADER_SIZE}-byte header",
                src.len()
            )));
        }

        let pointer = src.get_u32();
        let desc = src.get_u8();
        let opcode = OpCode::try_from((desc & OP_MASK) >> OP_POS)?;
        let content_type = ContentType::from_bit((desc & CTYPE_MASK) >> CTYPE_POS);
        let flag = desc & FLAG_MASK;

        Ok(Self::new(pointer, opcode, flag, content_type, Some(src)))
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<Frame ptr={}, op={:?}, flag={}, ctype={:?}, payloadlen={}>",
            self.pointer,
            self.opcode,
            self.flag,
            self.content_type,
            self.payload_len()
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
