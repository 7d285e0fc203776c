//! Shared channel state.
//!
//! [`ChannelCore`] is owned jointly by the public [`Channel`](super::Channel)
//! handle and the connection it is attached to. The connection drives the
//! inbound transitions, the handle drives the outbound ones; both go through
//! the same lock so a transition is never observed half-applied.

// ============================================================================
// Imports
// ============================================================================

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::{ChannelId, Pointer};
use crate::protocol::{ChannelMode, ContentType, DeliveryPriority, Frame, SignalFlag};
use crate::transport::Connection;

use super::event::{ChannelClosed, ChannelData, ChannelEvent, ChannelMessage};
use super::state::ChannelState;

// ============================================================================
// Types
// ============================================================================

/// Close payload held back until the open response arrives.
#[derive(Debug)]
struct Outro {
    content_type: ContentType,
    payload: Option<Bytes>,
}

/// Outcome of applying a resolve response to a channel.
#[derive(Debug)]
pub(crate) enum Resolution {
    Open(Frame),
    ClosedBeforeOpen,
    Stale,
}

#[derive(Debug, Default)]
struct Shared {
    state: ChannelState,
    /// Set once a connected channel reaches `Closed`.
    finished: bool,
    mode: ChannelMode,
    uri: Option<Url>,
    path: Option<String>,
    pointer: Pointer,
    token: Option<Bytes>,
    outro: Option<Outro>,
    connection: Option<Connection>,
}

/// Request carried from [`Channel::connect`](super::Channel::connect) into
/// the core.
#[derive(Debug)]
pub(crate) struct ConnectRequest {
    pub uri: Url,
    pub path: String,
    pub mode: ChannelMode,
    pub token: Option<Bytes>,
}

// ============================================================================
// ChannelCore
// ============================================================================

/// State machine of one channel.
#[derive(Debug)]
pub(crate) struct ChannelCore {
    id: ChannelId,
    shared: Mutex<Shared>,
    events: mpsc::UnboundedSender<ChannelEvent>,
}

// ============================================================================
// ChannelCore - Constructor & Accessors
// ============================================================================

impl ChannelCore {
    pub(crate) fn new(events: mpsc::UnboundedSender<ChannelEvent>) -> Self {
        Self {
            id: ChannelId::next(),
            shared: Mutex::new(Shared::default()),
            events,
        }
    }

    #[inline]
    pub(crate) fn id(&self) -> ChannelId {
        self.id
    }

    pub(crate) fn state(&self) -> ChannelState {
        self.shared.lock().state
    }

    pub(crate) fn mode(&self) -> ChannelMode {
        self.shared.lock().mode
    }

    pub(crate) fn path(&self) -> Option<String> {
        self.shared.lock().path.clone()
    }

    pub(crate) fn uri(&self) -> Option<Url> {
        self.shared.lock().uri.clone()
    }

    pub(crate) fn pointer(&self) -> Pointer {
        self.shared.lock().pointer
    }

    pub(crate) fn is_closing(&self) -> bool {
        self.shared.lock().state == ChannelState::Closing
    }

    /// Open responses are accepted while resolved, or while closing with
    /// the close still deferred.
    pub(crate) fn awaiting_open(&self) -> bool {
        let shared = self.shared.lock();
        match shared.state {
            ChannelState::Resolved => true,
            ChannelState::Closing => shared.outro.is_some(),
            _ => false,
        }
    }

    fn emit(&self, event: ChannelEvent) {
        // The receiver may be gone; the state machine still runs to completion.
        let _ = self.events.send(event);
    }
}

// ============================================================================
// ChannelCore - Local Transitions
// ============================================================================

impl ChannelCore {
    /// `Closed → Connecting`. Fails if the channel is busy or finished.
    pub(crate) fn begin_connect(&self, request: ConnectRequest) -> Result<()> {
        let mut shared = self.shared.lock();

        if shared.state != ChannelState::Closed {
            return Err(Error::invalid_state(
                shared.state,
                "Channel is already connected or connecting",
            ));
        }
        if shared.finished {
            return Err(Error::invalid_state(
                shared.state,
                "Channel has already been closed and cannot reconnect",
            ));
        }

        debug!(channel = %self.id, path = %request.path, mode = %request.mode, "Connecting channel");

        shared.state = ChannelState::Connecting;
        shared.mode = request.mode;
        shared.uri = Some(request.uri);
        shared.path = Some(request.path);
        shared.token = request.token;
        shared.pointer = Pointer::BROADCAST;
        Ok(())
    }

    /// Rolls back [`begin_connect`](Self::begin_connect) after the registry
    /// refused the attach.
    pub(crate) fn abort_connect(&self) {
        let mut shared = self.shared.lock();
        if shared.state == ChannelState::Connecting && shared.connection.is_none() {
            shared.state = ChannelState::Closed;
            shared.uri = None;
            shared.path = None;
            shared.token = None;
        }
    }

    /// Records the connection the channel was attached to.
    ///
    /// Skipped if the connection already tore the channel down.
    pub(crate) fn bind_connection(&self, connection: Connection) {
        let mut shared = self.shared.lock();
        if shared.state != ChannelState::Closed {
            shared.connection = Some(connection);
        }
    }

    /// Builds a data frame, checking state, mode and size.
    pub(crate) fn send_data(
        &self,
        content_type: ContentType,
        payload: Bytes,
        priority: DeliveryPriority,
        max_payload: usize,
    ) -> Result<()> {
        let shared = self.shared.lock();

        if shared.state != ChannelState::Open {
            return Err(Error::invalid_state(shared.state, "Channel is not open"));
        }
        if !shared.mode.can_write() {
            return Err(Error::invalid_state(shared.state, "Channel is not writable"));
        }
        if payload.is_empty() {
            return Err(Error::invalid_state(shared.state, "Data payload must not be empty"));
        }
        if payload.len() > max_payload {
            return Err(Error::payload_too_large(payload.len(), max_payload));
        }

        let frame = Frame::data(shared.pointer, priority, content_type, payload);
        Self::submit(&shared, frame)
    }

    /// Builds an emit signal, checking state, mode and size.
    pub(crate) fn send_signal(
        &self,
        content_type: ContentType,
        payload: Option<Bytes>,
        max_payload: usize,
    ) -> Result<()> {
        let shared = self.shared.lock();

        if shared.state != ChannelState::Open {
            return Err(Error::invalid_state(shared.state, "Channel is not open"));
        }
        if !shared.mode.can_emit() {
            return Err(Error::invalid_state(
                shared.state,
                "Channel does not support emitting signals",
            ));
        }
        let len = payload.as_ref().map_or(0, Bytes::len);
        if len > max_payload {
            return Err(Error::payload_too_large(len, max_payload));
        }

        let frame = Frame::signal(shared.pointer, SignalFlag::Emit, content_type, payload);
        Self::submit(&shared, frame)
    }

    /// Starts the closing handshake.
    ///
    /// From `Open` the End signal is sent at once. From `Connecting` or
    /// `Resolved` it is held until the open response arrives.
    pub(crate) fn close(
        &self,
        content_type: ContentType,
        payload: Option<Bytes>,
        max_payload: usize,
    ) -> Result<()> {
        let mut shared = self.shared.lock();

        match shared.state {
            ChannelState::Closed | ChannelState::Closing => {
                return Err(Error::invalid_state(shared.state, "Channel is already closed"));
            }
            ChannelState::Connecting | ChannelState::Resolved | ChannelState::Open => {}
        }

        let len = payload.as_ref().map_or(0, Bytes::len);
        if len > max_payload {
            return Err(Error::payload_too_large(len, max_payload));
        }

        if shared.state == ChannelState::Open {
            debug!(channel = %self.id, pointer = %shared.pointer, "Closing channel");
            shared.state = ChannelState::Closing;
            let frame = Frame::signal(shared.pointer, SignalFlag::End, content_type, payload);
            return Self::submit(&shared, frame);
        }

        debug!(channel = %self.id, state = %shared.state, "Deferring close until opened");
        shared.state = ChannelState::Closing;
        shared.outro = Some(Outro {
            content_type,
            payload,
        });
        Ok(())
    }

    fn submit(shared: &Shared, frame: Frame) -> Result<()> {
        match &shared.connection {
            Some(connection) => connection.send(frame),
            None => Err(Error::ConnectionClosed),
        }
    }
}

// ============================================================================
// ChannelCore - Remote Transitions
// ============================================================================

impl ChannelCore {
    /// `Connecting → Resolved`, decided under one lock so a concurrent
    /// close is either seen here or defers until the open response.
    pub(crate) fn resolved(&self, pointer: Pointer) -> Resolution {
        let mut shared = self.shared.lock();
        match shared.state {
            ChannelState::Connecting => {}
            ChannelState::Closing if shared.pointer.is_broadcast() => {
                return Resolution::ClosedBeforeOpen;
            }
            _ => return Resolution::Stale,
        }

        trace!(channel = %self.id, %pointer, "Channel resolved");
        shared.state = ChannelState::Resolved;
        shared.pointer = pointer;
        Resolution::Open(Frame::open(
            pointer,
            shared.mode,
            ContentType::Utf8,
            shared.token.clone(),
        ))
    }

    /// Applies a granted open response.
    ///
    /// With a deferred close pending no `Open` event is raised; the held
    /// End signal is returned for the connection to send instead.
    pub(crate) fn opened(&self, frame: Frame) -> Option<Frame> {
        let mut shared = self.shared.lock();

        if shared.state == ChannelState::Closing {
            let outro = shared.outro.take()?;
            debug!(channel = %self.id, "Sending deferred close");
            return Some(Frame::signal(
                shared.pointer,
                SignalFlag::End,
                outro.content_type,
                outro.payload,
            ));
        }

        debug!(channel = %self.id, pointer = %shared.pointer, "Channel open");
        shared.state = ChannelState::Open;
        self.emit(ChannelEvent::Open(ChannelMessage::from_frame(frame)));
        None
    }

    /// Delivers inbound data while open.
    pub(crate) fn deliver_data(&self, frame: Frame) {
        let shared = self.shared.lock();
        if shared.state == ChannelState::Open && shared.mode.can_read() {
            self.emit(ChannelEvent::Data(ChannelData::from_frame(frame)));
        }
    }

    /// Delivers an inbound emit signal while open.
    pub(crate) fn deliver_signal(&self, frame: Frame) {
        let shared = self.shared.lock();
        if shared.state == ChannelState::Open {
            self.emit(ChannelEvent::Signal(ChannelMessage::from_frame(frame)));
        }
    }

    /// Handles a remote End/Error.
    ///
    /// Returns `true` when the End must be echoed, i.e. the close did not
    /// start locally. The channel moves to `Closing` so a concurrent local
    /// close cannot send a second End.
    pub(crate) fn remote_end(&self) -> bool {
        let mut shared = self.shared.lock();
        if shared.state == ChannelState::Closing {
            return false;
        }
        shared.state = ChannelState::Closing;
        true
    }

    /// Final transition to `Closed`. Raises the `Closed` event once.
    pub(crate) fn teardown(&self, frame: Option<&Frame>, reason: Option<&str>) {
        let mut shared = self.shared.lock();
        if shared.finished {
            return;
        }

        let closed = ChannelClosed::new(frame, reason);
        debug!(
            channel = %self.id,
            clean = closed.was_clean,
            denied = closed.was_denied,
            reason = %closed.reason,
            "Channel closed"
        );

        shared.state = ChannelState::Closed;
        shared.finished = true;
        shared.pointer = Pointer::BROADCAST;
        shared.outro = None;
        shared.token = None;
        shared.connection = None;
        self.emit(ChannelEvent::Closed(closed));
    }
}

// ============================================================================
// Tests
// ============================================================================
