//! In-process transport with a scriptable remote.
//!
//! Every `connect` creates a [`MemoryRemote`] that plays the server side:
//! it receives the frames the client writes and injects frames, failures
//! and hang-ups. Useful for tests and for embedding the client next to an
//! in-process server.
//!
//! # Example
//!
//! ```no_run
//! use winksock::{ChannelMode, Client, MemoryTransport};
//!
//! # async fn example() -> winksock::Result<()> {
//! let transport = MemoryTransport::new();
//! let client = Client::builder().transport(transport.clone()).build()?;
//!
//! let (channel, _events) = client.channel();
//! channel.connect("localhost:7010/chat", ChannelMode::READ)?;
//!
//! let mut remote = transport.accept().await.expect("connection");
//! let resolve = remote.recv().await.expect("resolve request");
//! assert_eq!(resolve.text(), Some("/chat"));
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures_util::{sink, stream};
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, mpsc, oneshot};
use tracing::trace;

use crate::error::{Error, Result};
use crate::protocol::Frame;

use super::{Endpoint, FramedIo, Transport};

// ============================================================================
// MemoryTransport
// ============================================================================

#[derive(Debug)]
struct Inner {
    tls: bool,
    manual_handshake: bool,
    refuse: Mutex<Option<String>>,
    connects: AtomicUsize,
    remotes_tx: mpsc::UnboundedSender<MemoryRemote>,
    remotes_rx: AsyncMutex<mpsc::UnboundedReceiver<MemoryRemote>>,
}

/// Transport whose remote end lives in the same process.
///
/// Cloning shares the same set of remotes.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    inner: Arc<Inner>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::build(false, false)
    }
}

impl MemoryTransport {
    /// Creates a transport whose handshakes complete immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a transport whose handshakes wait for
    /// [`MemoryRemote::complete_handshake`].
    #[must_use]
    pub fn with_manual_handshake() -> Self {
        Self::build(false, true)
    }

    /// Reports TLS support so `https` URIs are accepted.
    #[must_use]
    pub fn with_tls(self) -> Self {
        Self::build(true, self.inner.manual_handshake)
    }

    fn build(tls: bool, manual_handshake: bool) -> Self {
        let (remotes_tx, remotes_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                tls,
                manual_handshake,
                refuse: Mutex::new(None),
                connects: AtomicUsize::new(0),
                remotes_tx,
                remotes_rx: AsyncMutex::new(remotes_rx),
            }),
        }
    }

    /// Makes subsequent connects fail with `reason`; `None` allows them again.
    pub fn refuse_connections(&self, reason: Option<&str>) {
        *self.inner.refuse.lock() = reason.map(str::to_owned);
    }

    /// Number of connect attempts so far.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    /// Waits for the next connection and returns its remote side.
    pub async fn accept(&self) -> Option<MemoryRemote> {
        self.inner.remotes_rx.lock().await.recv().await
    }

    /// Returns the remote side of a pending connection, if any.
    pub fn try_accept(&self) -> Option<MemoryRemote> {
        self.inner.remotes_rx.try_lock().ok()?.try_recv().ok()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn supports_tls(&self) -> bool {
        self.inner.tls
    }

    async fn connect(&self, endpoint: &Endpoint) -> Result<FramedIo> {
        self.inner.connects.fetch_add(1, Ordering::SeqCst);

        let refused = self.inner.refuse.lock().clone();
        if let Some(reason) = refused {
            return Err(Error::connection(reason));
        }

        let (to_client_tx, to_client_rx) = mpsc::unbounded_channel::<Result<Frame>>();
        let (to_remote_tx, to_remote_rx) = mpsc::unbounded_channel::<Frame>();
        let (handshake_tx, handshake_rx) = if self.inner.manual_handshake {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let remote = MemoryRemote {
            endpoint: endpoint.clone(),
            inbound: Some(to_client_tx),
            outbound: to_remote_rx,
            handshake: handshake_tx,
        };
        self.inner
            .remotes_tx
            .send(remote)
            .map_err(|_| Error::ConnectionClosed)?;

        if let Some(rx) = handshake_rx {
            rx.await
                .map_err(|_| Error::connection("Remote dropped during handshake"))??;
        }
        trace!(%endpoint, "Memory link established");

        let sink = sink::unfold(to_remote_tx, |tx, frame: Frame| async move {
            tx.send(frame).map_err(|_| Error::ConnectionClosed)?;
            Ok::<_, Error>(tx)
        });
        let stream = stream::unfold(to_client_rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });

        Ok(FramedIo {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

// ============================================================================
// MemoryRemote
// ============================================================================

/// Server side of one in-memory connection.
///
/// Dropping it hangs up the link.
#[derive(Debug)]
pub struct MemoryRemote {
    endpoint: Endpoint,
    inbound: Option<mpsc::UnboundedSender<Result<Frame>>>,
    outbound: mpsc::UnboundedReceiver<Frame>,
    handshake: Option<oneshot::Sender<Result<()>>>,
}

impl MemoryRemote {
    /// Endpoint the client connected to.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Lets a manual handshake complete.
    pub fn complete_handshake(&mut self) {
        if let Some(tx) = self.handshake.take() {
            let _ = tx.send(Ok(()));
        }
    }

    /// Fails a manual handshake with `reason`.
    pub fn refuse_handshake(&mut self, reason: &str) {
        if let Some(tx) = self.handshake.take() {
            let _ = tx.send(Err(Error::handshake(reason)));
        }
    }

    /// Delivers `frame` to the client.
    pub fn send(&self, frame: Frame) {
        if let Some(tx) = &self.inbound {
            let _ = tx.send(Ok(frame));
        }
    }

    /// Fails the link with an I/O style error.
    pub fn fail(&self, reason: &str) {
        if let Some(tx) = &self.inbound {
            let _ = tx.send(Err(Error::connection(reason)));
        }
    }

    /// Ends the client's inbound stream; frames it writes are still readable.
    pub fn hang_up(&mut self) {
        self.inbound = None;
    }

    /// Waits for the next frame written by the client.
    ///
    /// Returns `None` once the client has closed the link and every written
    /// frame was received.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.outbound.recv().await
    }

    /// Returns the next written frame without waiting.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.outbound.try_recv().ok()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use futures_util::{SinkExt, StreamExt};

    use crate::identifiers::Pointer;
    use crate::protocol::{ContentType, SignalFlag};
    use crate::transport::Scheme;

    fn endpoint() -> Endpoint {
        Endpoint::new(Scheme::Http, "localhost", 7010)
    }

    fn end_frame() -> Frame {
        Frame::signal(Pointer::new(3), SignalFlag::End, ContentType::Utf8, None)
    }

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let transport = MemoryTransport::new();
        let mut io = transport.connect(&endpoint()).await.unwrap();
        let mut remote = transport.accept().await.unwrap();

        io.sink.send(Frame::resolve("/a")).await.unwrap();
        assert_eq!(remote.recv().await, Some(Frame::resolve("/a")));

        remote.send(end_frame());
        assert_eq!(io.stream.next().await.unwrap().unwrap(), end_frame());
    }

    #[tokio::test]
    async fn test_hang_up_ends_stream() {
        let transport = MemoryTransport::new();
        let mut io = transport.connect(&endpoint()).await.unwrap();
        let mut remote = transport.accept().await.unwrap();

        remote.hang_up();
        assert!(io.stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_dropping_sink_closes_remote() {
        let transport = MemoryTransport::new();
        let io = transport.connect(&endpoint()).await.unwrap();
        let mut remote = transport.accept().await.unwrap();

        drop(io);
        assert!(remote.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_refused_connections() {
        let transport = MemoryTransport::new();
        transport.refuse_connections(Some("no route"));

        let err = transport.connect(&endpoint()).await.unwrap_err();
        assert!(err.is_connection_error());
        assert_eq!(transport.connect_count(), 1);
        assert!(transport.try_accept().is_none());
    }

    #[tokio::test]
    async fn test_manual_handshake_refused() {
        let transport = MemoryTransport::with_manual_handshake();
        let client = transport.clone();
        let connect = tokio::spawn(async move { client.connect(&endpoint()).await });

        let mut remote = transport.accept().await.unwrap();
        remote.refuse_handshake("busy");

        let err = connect.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Handshake { message } if message == "busy"));
    }
}
