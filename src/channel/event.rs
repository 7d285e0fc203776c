//! Channel notifications.
//!
//! Every channel owns one event queue. The connection pushes events into it
//! as frames are dispatched; the caller drains it through [`ChannelEvents`].
//!
//! | Event | Raised when |
//! |-------|-------------|
//! | [`ChannelEvent::Open`] | The remote granted the open request |
//! | [`ChannelEvent::Data`] | Data arrived on a readable channel |
//! | [`ChannelEvent::Signal`] | A signal was emitted to the channel |
//! | [`ChannelEvent::Closed`] | The channel reached its final state |

// ============================================================================
// Imports
// ============================================================================

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::protocol::{ContentType, DeliveryPriority, Frame, OpCode, SignalFlag};

/// Reason used when neither the frame nor the caller supplied one.
pub const UNKNOWN_REASON: &str = "Unknown reason";

// ============================================================================
// ChannelEvent
// ============================================================================

/// A notification raised by a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The channel is open; carries the open response payload.
    Open(ChannelMessage),
    /// Data received.
    Data(ChannelData),
    /// Signal received.
    Signal(ChannelMessage),
    /// The channel closed and will raise nothing further.
    Closed(ChannelClosed),
}

// ============================================================================
// ChannelMessage
// ============================================================================

/// Payload of an open or signal notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMessage {
    /// How the payload should be interpreted.
    pub content_type: ContentType,
    /// The payload, if the frame carried one.
    pub payload: Option<Bytes>,
}

impl ChannelMessage {
    pub(crate) fn from_frame(frame: Frame) -> Self {
        let content_type = frame.content_type();
        Self {
            content_type,
            payload: frame.into_payload(),
        }
    }

    /// Payload as UTF-8, or `None` if absent or not valid UTF-8.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.payload
            .as_deref()
            .and_then(|p| std::str::from_utf8(p).ok())
    }
}

// ============================================================================
// ChannelData
// ============================================================================

/// Payload of a data notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelData {
    /// How the payload should be interpreted.
    pub content_type: ContentType,
    /// The received bytes. Never empty.
    pub payload: Bytes,
    /// Priority the sender attached.
    pub priority: DeliveryPriority,
}

impl ChannelData {
    pub(crate) fn from_frame(frame: Frame) -> Self {
        let content_type = frame.content_type();
        let priority = frame.priority().unwrap_or_default();
        Self {
            content_type,
            payload: frame.into_payload().unwrap_or_default(),
            priority,
        }
    }

    /// Payload as UTF-8, or `None` if it is not valid UTF-8.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

// ============================================================================
// ChannelClosed
// ============================================================================

/// Final notification of a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelClosed {
    /// The remote ended the channel with an End signal.
    pub was_clean: bool,
    /// The remote denied the open request.
    pub was_denied: bool,
    /// Human-readable reason.
    pub reason: String,
    /// Content type of the closing frame, if any.
    pub content_type: ContentType,
    /// Payload of the closing frame, if any.
    pub payload: Option<Bytes>,
}

impl ChannelClosed {
    /// Builds the notification for a teardown.
    ///
    /// The reason prefers the frame's UTF-8 payload, then `reason`, then
    /// [`UNKNOWN_REASON`].
    pub(crate) fn new(frame: Option<&Frame>, reason: Option<&str>) -> Self {
        let Some(frame) = frame else {
            return Self {
                was_clean: false,
                was_denied: false,
                reason: reason.unwrap_or(UNKNOWN_REASON).to_owned(),
                content_type: ContentType::Utf8,
                payload: None,
            };
        };

        let was_denied = frame.opcode() == OpCode::Open;
        let was_clean = !was_denied
            && frame.opcode() == OpCode::Signal
            && frame.signal_flag() == Some(SignalFlag::End);
        let reason = frame
            .text()
            .or(reason)
            .unwrap_or(UNKNOWN_REASON)
            .to_owned();

        Self {
            was_clean,
            was_denied,
            reason,
            content_type: frame.content_type(),
            payload: frame.payload().cloned(),
        }
    }
}

// ============================================================================
// ChannelEvents
// ============================================================================

/// Receiving end of a channel's event queue.
#[derive(Debug)]
pub struct ChannelEvents {
    rx: mpsc::UnboundedReceiver<ChannelEvent>,
}

impl ChannelEvents {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<ChannelEvent>) -> Self {
        Self { rx }
    }

    /// Waits for the next event.
    ///
    /// Returns `None` once the channel handle is dropped and the queue is
    /// drained.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.rx.recv().await
    }

    /// Returns the next queued event without waiting.
    pub fn try_recv(&mut self) -> Option<ChannelEvent> {
        self.rx.try_recv().ok()
    }

    /// Waits for the [`ChannelEvent::Closed`] notification, discarding
    /// anything queued before it.
    pub async fn closed(&mut self) -> Option<ChannelClosed> {
        while let Some(event) = self.rx.recv().await {
            if let ChannelEvent::Closed(closed) = event {
                return Some(closed);
            }
        }
        None
    }
}

// ============================================================================
// Tests
// ============================================================================
