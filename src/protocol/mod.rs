//! Wire protocol types.
//!
//! This module defines the binary frame exchanged with the remote end and
//! the values carried in its descriptor byte.
//!
//! # Protocol Overview
//!
//! | Opcode | Direction | Purpose |
//! |--------|-----------|---------|
//! | `Resolve` | Local → Remote → Local | Translate a path into a pointer |
//! | `Open` | Local → Remote → Local | Request a mode; granted or denied |
//! | `Data` | Both | Channel payload with a priority marker |
//! | `Signal` | Both | Emit, End (cooperative close) or Error |
//! | `KeepAlive` | Both | Link keep-alive |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `frame` | Frame type, flags and fixed-header encoding |
//! | `codec` | `tokio_util` codec for length-prefixed streams |
//! | `mode` | Channel capability bits |

// ============================================================================
// Submodules
// ============================================================================

/// Length-prefixed stream codec.
pub mod codec;

/// Frame type and encoding.
pub mod frame;

/// Channel capability bits.
pub mod mode;

// ============================================================================
// Re-exports
// ============================================================================

pub use codec::FrameCodec;
pub use frame::{
    ContentType, DeliveryPriority, Frame, HEADER_SIZE, LENGTH_SIZE, OpCode, OpenFlag,
    PAYLOAD_MAX_SIZE, ResolveFlag, SignalFlag,
};
pub use mode::ChannelMode;
