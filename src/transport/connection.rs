//! Multiplexed connection and event loop.
//!
//! One [`Connection`] carries every channel attached to it over a single
//! transport link. It tracks which paths are attached, which pointers the
//! remote assigned to them, and how many channels still hold it open.
//!
//! # Event Loop
//!
//! The connection spawns a tokio task that:
//!
//! - Establishes the transport and flushes queued resolve requests
//! - Writes outbound frames strictly in submission order
//! - Dispatches inbound frames strictly in arrival order
//! - Tears every channel down when the link fails
//!
//! # Locking
//!
//! The registry lock is taken before the table lock, never after. The table
//! lock is never held while a channel lock is taken.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::channel::{ChannelCore, Resolution};
use crate::error::{Error, Result};
use crate::identifiers::{ConnectionId, Pointer};
use crate::protocol::{ContentType, Frame, OpCode, OpenFlag, ResolveFlag, SignalFlag};

use super::pool::ConnectionRegistry;
use super::{Endpoint, FramedIo, Transport};

// ============================================================================
// Constants
// ============================================================================

const REASON_RESOLVE_FAILED: &str = "Unable to resolve path";
const REASON_DENIED: &str = "Open was denied";
const REASON_CLOSED_BEFORE_OPEN: &str = "Channel closed before it was opened";
const REASON_REMOTE_CLOSED: &str = "Connection closed by remote";

const INVALID_OPEN: &str = "Protocol error: Server sent invalid open packet";
const OPEN_TO_OPEN_CHANNEL: &str = "Protocol error: Server sent open to an open channel";
const ZERO_DATA: &str = "Protocol error: Zero data packet received";
const RESOLVE_TO_BROADCAST: &str = "Protocol error: Server resolved a path to the broadcast pointer";
const POINTER_IN_USE: &str = "Protocol error: Server resolved a path to a pointer already in use";

// ============================================================================
// Types
// ============================================================================

/// Commands for the event loop.
enum ConnectionCommand {
    /// Write a frame.
    Send(Frame),
    /// Close the link and stop.
    Shutdown,
}

/// Attachment bookkeeping.
#[derive(Default)]
struct Tables {
    /// Attached channels by path.
    channels: FxHashMap<String, Arc<ChannelCore>>,
    /// Resolved channels by pointer.
    routes: FxHashMap<Pointer, Arc<ChannelCore>>,
    /// Paths waiting for the handshake before their resolve is sent.
    resolve_queue: VecDeque<String>,
    handshaked: bool,
    closed: bool,
}

struct ConnectionInner {
    id: ConnectionId,
    endpoint: Endpoint,
    tables: Mutex<Tables>,
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
    registry: Weak<ConnectionRegistry>,
}

// ============================================================================
// Connection
// ============================================================================

/// One physical link shared by many channels.
///
/// Lives as long as at least one channel is attached, then closes its
/// transport and deregisters itself.
#[derive(Clone)]
pub(crate) struct Connection {
    inner: Arc<ConnectionInner>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("endpoint", &self.inner.endpoint)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Connection - Constructor & Accessors
// ============================================================================

impl Connection {
    /// Creates a connection and spawns its event loop.
    ///
    /// # Errors
    ///
    /// [`Error::Connection`] when called outside a tokio runtime.
    pub(crate) fn spawn(
        endpoint: Endpoint,
        transport: Arc<dyn Transport>,
        registry: Weak<ConnectionRegistry>,
    ) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|_| Error::connection("A tokio runtime is required to connect"))?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let connection = Self {
            inner: Arc::new(ConnectionInner {
                id: ConnectionId::next(),
                endpoint,
                tables: Mutex::new(Tables::default()),
                command_tx,
                registry,
            }),
        };

        debug!(connection = %connection.id(), endpoint = %connection.endpoint(), "Connection created");
        runtime.spawn(connection.clone().run_event_loop(transport, command_rx));

        Ok(connection)
    }

    #[inline]
    pub(crate) fn id(&self) -> ConnectionId {
        self.inner.id
    }

    #[inline]
    pub(crate) fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    /// Returns `true` if `path` is attached here.
    pub(crate) fn has_path(&self, path: &str) -> bool {
        self.inner.tables.lock().channels.contains_key(path)
    }

    /// Returns `true` once the connection stopped accepting channels.
    pub(crate) fn is_closed(&self) -> bool {
        self.inner.tables.lock().closed
    }

    /// Number of attached channels.
    pub(crate) fn channel_count(&self) -> usize {
        self.inner.tables.lock().channels.len()
    }

    /// Queues a frame for writing.
    ///
    /// # Errors
    ///
    /// [`Error::ConnectionClosed`] once the event loop has stopped.
    pub(crate) fn send(&self, frame: Frame) -> Result<()> {
        trace!(connection = %self.inner.id, %frame, "Queue frame");
        self.inner
            .command_tx
            .send(ConnectionCommand::Send(frame))
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Queues a protocol frame, logging it if the event loop has stopped.
    fn queue(&self, frame: Frame) {
        if let Err(e) = self.send(frame) {
            debug!(connection = %self.inner.id, error = %e, "Frame dropped");
        }
    }
}

// ============================================================================
// Connection - Attach & Detach
// ============================================================================

impl Connection {
    /// Attaches `channel` under `path`.
    ///
    /// Sends the resolve request now if the handshake is done, otherwise
    /// queues it.
    ///
    /// # Errors
    ///
    /// - [`Error::PathInUse`] if `path` is already attached
    /// - [`Error::ConnectionClosed`] if the connection is shutting down
    pub(crate) fn attach(&self, channel: &Arc<ChannelCore>, path: &str) -> Result<()> {
        let mut tables = self.inner.tables.lock();

        if tables.closed {
            return Err(Error::ConnectionClosed);
        }
        if tables.channels.contains_key(path) {
            return Err(Error::path_in_use(path));
        }

        tables.channels.insert(path.to_owned(), Arc::clone(channel));
        debug!(
            connection = %self.inner.id,
            channel = %channel.id(),
            path,
            attached = tables.channels.len(),
            "Channel attached"
        );

        if tables.handshaked {
            self.queue(Frame::resolve(path));
        } else {
            tables.resolve_queue.push_back(path.to_owned());
        }
        Ok(())
    }

    /// Removes `channel` from the tables, then tears it down.
    ///
    /// Releases the connection when the last channel leaves.
    fn detach(&self, channel: &Arc<ChannelCore>, frame: Option<&Frame>, reason: Option<&str>) {
        let path = channel.path();

        let released = {
            let mut tables = self.inner.tables.lock();

            let removed = match &path {
                Some(path)
                    if tables
                        .channels
                        .get(path)
                        .is_some_and(|attached| Arc::ptr_eq(attached, channel)) =>
                {
                    tables.channels.remove(path);
                    tables.resolve_queue.retain(|queued| queued != path);
                    true
                }
                _ => false,
            };
            tables
                .routes
                .retain(|_, routed| !Arc::ptr_eq(routed, channel));

            let last = removed && tables.channels.is_empty() && !tables.closed;
            if last {
                tables.closed = true;
            }
            last
        };

        if released {
            debug!(connection = %self.inner.id, "Last channel detached");
            self.release();
        }

        channel.teardown(frame, reason);
    }

    /// Stops the event loop and leaves the registry.
    fn release(&self) {
        let _ = self.inner.command_tx.send(ConnectionCommand::Shutdown);
        if let Some(registry) = self.inner.registry.upgrade() {
            registry.deregister(self);
        }
    }

    /// Tears down every attached channel with `reason` and closes.
    pub(crate) fn close_all(&self, reason: &str) {
        let channels: Vec<Arc<ChannelCore>> = {
            let mut tables = self.inner.tables.lock();
            if tables.closed && tables.channels.is_empty() {
                return;
            }
            tables.closed = true;
            tables.routes.clear();
            tables.resolve_queue.clear();
            tables.channels.drain().map(|(_, channel)| channel).collect()
        };

        debug!(
            connection = %self.inner.id,
            channels = channels.len(),
            reason,
            "Closing connection"
        );
        self.release();

        for channel in channels {
            channel.teardown(None, Some(reason));
        }
    }

    /// Closes on a protocol violation.
    fn fail(&self, reason: &str) {
        warn!(connection = %self.inner.id, reason, "Protocol violation");
        self.close_all(reason);
    }
}

// ============================================================================
// Connection - Event Loop
// ============================================================================

impl Connection {
    async fn run_event_loop(
        self,
        transport: Arc<dyn Transport>,
        mut command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
    ) {
        let mut connect = transport.connect(&self.inner.endpoint);

        // Frames submitted before the link is up are written first.
        let mut early = Vec::new();
        let established = loop {
            tokio::select! {
                result = &mut connect => break result,
                command = command_rx.recv() => match command {
                    Some(ConnectionCommand::Send(frame)) => early.push(frame),
                    Some(ConnectionCommand::Shutdown) | None => {
                        debug!(connection = %self.inner.id, "Shut down before link was established");
                        return;
                    }
                },
            }
        };
        drop(connect);

        let FramedIo {
            mut sink,
            mut stream,
        } = match established {
            Ok(io) => io,
            Err(e) => {
                debug!(connection = %self.inner.id, error = %e, "Connect failed");
                self.close_all(&e.to_string());
                return;
            }
        };

        for frame in early {
            if let Err(e) = sink.send(frame).await {
                self.close_all(&e.to_string());
                return;
            }
        }
        self.handle_connected();

        loop {
            tokio::select! {
                // Inbound frames
                frame = stream.next() => match frame {
                    Some(Ok(frame)) => self.handle_frame(frame),
                    Some(Err(e)) => {
                        debug!(connection = %self.inner.id, error = %e, "Link failed");
                        self.close_all(&e.to_string());
                        break;
                    }
                    None => {
                        debug!(connection = %self.inner.id, "Link closed by remote");
                        self.close_all(REASON_REMOTE_CLOSED);
                        break;
                    }
                },

                // Outbound frames and shutdown
                command = command_rx.recv() => match command {
                    Some(ConnectionCommand::Send(frame)) => {
                        trace!(connection = %self.inner.id, %frame, "Write frame");
                        if let Err(e) = sink.send(frame).await {
                            debug!(connection = %self.inner.id, error = %e, "Write failed");
                            self.close_all(&e.to_string());
                            break;
                        }
                    }
                    Some(ConnectionCommand::Shutdown) | None => {
                        let _ = sink.close().await;
                        break;
                    }
                },
            }
        }

        debug!(connection = %self.inner.id, "Event loop terminated");
    }

    /// Marks the handshake done and flushes queued resolves.
    fn handle_connected(&self) {
        let queued: Vec<String> = {
            let mut tables = self.inner.tables.lock();
            if tables.closed {
                return;
            }
            tables.handshaked = true;
            tables.resolve_queue.drain(..).collect()
        };

        debug!(connection = %self.inner.id, queued = queued.len(), "Link established");
        for path in queued {
            self.queue(Frame::resolve(&path));
        }
    }
}

// ============================================================================
// Connection - Frame Dispatch
// ============================================================================

impl Connection {
    fn handle_frame(&self, frame: Frame) {
        if self.is_closed() {
            trace!(connection = %self.inner.id, %frame, "Frame after close dropped");
            return;
        }

        match frame.opcode() {
            OpCode::KeepAlive => {}
            OpCode::Open => self.handle_open(frame),
            OpCode::Data => self.handle_data(frame),
            OpCode::Signal => self.handle_signal(frame),
            OpCode::Resolve => self.handle_resolve(frame),
        }
    }

    fn route(&self, pointer: Pointer) -> Option<Arc<ChannelCore>> {
        self.inner.tables.lock().routes.get(&pointer).cloned()
    }

    fn attached(&self) -> Vec<Arc<ChannelCore>> {
        self.inner.tables.lock().channels.values().cloned().collect()
    }

    fn handle_resolve(&self, frame: Frame) {
        let Some(path) = frame.payload().and_then(|p| std::str::from_utf8(p).ok()) else {
            debug!(connection = %self.inner.id, %frame, "Resolve without path ignored");
            return;
        };

        let channel = self.inner.tables.lock().channels.get(path).cloned();
        let Some(channel) = channel else {
            trace!(connection = %self.inner.id, path, "Resolve for unknown path ignored");
            return;
        };

        if frame.resolve_flag() == ResolveFlag::Error {
            let reason = if channel.is_closing() {
                REASON_CLOSED_BEFORE_OPEN
            } else {
                REASON_RESOLVE_FAILED
            };
            self.detach(&channel, None, Some(reason));
            return;
        }

        let pointer = frame.pointer();
        if pointer.is_broadcast() {
            self.fail(RESOLVE_TO_BROADCAST);
            return;
        }
        if self.inner.tables.lock().routes.contains_key(&pointer) {
            self.fail(POINTER_IN_USE);
            return;
        }

        match channel.resolved(pointer) {
            Resolution::Open(open) => {
                let routed = {
                    let mut tables = self.inner.tables.lock();
                    let attached = tables
                        .channels
                        .get(path)
                        .is_some_and(|attached| Arc::ptr_eq(attached, &channel));
                    if attached {
                        tables.routes.insert(pointer, Arc::clone(&channel));
                    }
                    attached
                };
                if routed {
                    self.queue(open);
                }
            }
            Resolution::ClosedBeforeOpen => {
                self.detach(&channel, None, Some(REASON_CLOSED_BEFORE_OPEN));
            }
            Resolution::Stale => {
                debug!(connection = %self.inner.id, path, "Duplicate resolve ignored");
            }
        }
    }

    fn handle_open(&self, frame: Frame) {
        let Some(channel) = self.route(frame.pointer()) else {
            self.fail(INVALID_OPEN);
            return;
        };

        if !channel.awaiting_open() {
            self.fail(OPEN_TO_OPEN_CHANNEL);
            return;
        }

        match frame.open_flag() {
            OpenFlag::Success => {
                if let Some(end) = channel.opened(frame) {
                    self.queue(end);
                }
            }
            OpenFlag::Deny => self.detach(&channel, Some(&frame), Some(REASON_DENIED)),
        }
    }

    fn handle_data(&self, frame: Frame) {
        if frame.payload_len() == 0 {
            self.fail(ZERO_DATA);
            return;
        }

        if frame.pointer().is_broadcast() {
            for channel in self.attached() {
                if channel.mode().can_read() {
                    channel.deliver_data(frame.duplicate());
                }
            }
            return;
        }

        match self.route(frame.pointer()) {
            Some(channel) => channel.deliver_data(frame),
            None => trace!(connection = %self.inner.id, %frame, "Data for unknown pointer dropped"),
        }
    }

    fn handle_signal(&self, frame: Frame) {
        if frame.signal_flag() == Some(SignalFlag::Emit) {
            if frame.pointer().is_broadcast() {
                for channel in self.attached() {
                    channel.deliver_signal(frame.duplicate());
                }
                return;
            }

            match self.route(frame.pointer()) {
                Some(channel) => channel.deliver_signal(frame),
                None => trace!(connection = %self.inner.id, %frame, "Signal for unknown pointer dropped"),
            }
            return;
        }

        // Anything but Emit ends the addressed channels.
        if frame.pointer().is_broadcast() {
            for channel in self.attached() {
                let end = frame.duplicate();
                self.detach(&channel, Some(&end), None);
            }
            return;
        }

        let Some(channel) = self.route(frame.pointer()) else {
            trace!(connection = %self.inner.id, %frame, "End for unknown pointer dropped");
            return;
        };

        if channel.remote_end() {
            self.queue(Frame::signal(
                frame.pointer(),
                SignalFlag::End,
                ContentType::Utf8,
                None,
            ));
        }
        self.detach(&channel, Some(&frame), None);
    }
}

// ============================================================================
// Tests
// ============================================================================
