//! Public channel handle.
//!
//! # Example
//!
//! ```no_run
//! use winksock::{ChannelEvent, ChannelMode, Client};
//!
//! # async fn example() -> winksock::Result<()> {
//! let client = Client::new();
//! let (channel, mut events) = client.channel();
//!
//! channel.connect("localhost:7010/chat?token", ChannelMode::READ_WRITE)?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         ChannelEvent::Open(_) => channel.send_text("hello")?,
//!         ChannelEvent::Data(data) => println!("{:?}", data.text()),
//!         ChannelEvent::Closed(closed) => {
//!             println!("closed: {}", closed.reason);
//!             break;
//!         }
//!         ChannelEvent::Signal(_) => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use url::Url;

use crate::client::Client;
use crate::error::{Error, Result};
use crate::identifiers::ChannelId;
use crate::protocol::{ChannelMode, ContentType, DeliveryPriority};
use crate::transport::Endpoint;

use super::core::{ChannelCore, ConnectRequest};
use super::state::ChannelState;

// ============================================================================
// Channel
// ============================================================================

/// One logical, path-addressed conversation.
///
/// Created by [`Client::channel`]. Events are delivered through the
/// [`ChannelEvents`](super::ChannelEvents) returned alongside it.
///
/// A channel connects at most once. After it has closed, create a new one.
/// Dropping a connected channel closes it.
pub struct Channel {
    core: Arc<ChannelCore>,
    client: Client,
}

// ============================================================================
// Channel - Display
// ============================================================================

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.core.id())
            .field("state", &self.core.state())
            .field("path", &self.core.path())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Channel - Constructor & Accessors
// ============================================================================

impl Channel {
    pub(crate) fn new(core: Arc<ChannelCore>, client: Client) -> Self {
        Self { core, client }
    }

    /// Local identifier of this channel.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ChannelId {
        self.core.id()
    }

    /// Current lifecycle state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.core.state()
    }

    /// Mode requested at connect time.
    #[inline]
    #[must_use]
    pub fn mode(&self) -> ChannelMode {
        self.core.mode()
    }

    /// Path this channel was connected to.
    #[inline]
    #[must_use]
    pub fn path(&self) -> Option<String> {
        self.core.path()
    }

    /// Full URI this channel was connected to.
    #[inline]
    #[must_use]
    pub fn uri(&self) -> Option<Url> {
        self.core.uri()
    }

    /// Returns `true` while the channel is open.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ChannelState::Open
    }

    /// Returns `true` if data can be received right now.
    #[must_use]
    pub fn is_readable(&self) -> bool {
        self.is_connected() && self.mode().can_read()
    }

    /// Returns `true` if data can be sent right now.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.is_connected() && self.mode().can_write()
    }

    /// Returns `true` if signals can be emitted right now.
    #[must_use]
    pub fn is_emittable(&self) -> bool {
        self.is_connected() && self.mode().can_emit()
    }
}

// ============================================================================
// Channel - Connect
// ============================================================================

impl Channel {
    /// Connects to `uri` with the given mode.
    ///
    /// The URI's scheme defaults to `http` when missing. Its query string,
    /// if any, is sent as the open token. Progress is reported through the
    /// channel events.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidUri`] if the URI does not parse or has no host
    /// - [`Error::UnsupportedScheme`] for schemes other than `http`/`https`
    /// - [`Error::TlsUnsupported`] for `https` without a TLS transport
    /// - [`Error::InvalidState`] if the channel is not closed or has
    ///   already finished a conversation
    /// - [`Error::Connection`] if the connection could not be started
    pub fn connect(&self, uri: &str, mode: ChannelMode) -> Result<()> {
        let url = parse_uri(uri)?;
        self.connect_url(url, mode)
    }

    /// Connects to an already parsed URL.
    ///
    /// # Errors
    ///
    /// See [`connect`](Self::connect).
    pub fn connect_url(&self, url: Url, mode: ChannelMode) -> Result<()> {
        let endpoint = Endpoint::from_url(&url)?;
        if endpoint.is_secure() && !self.client.supports_tls() {
            return Err(Error::TlsUnsupported);
        }

        let path = match url.path() {
            "" => "/".to_owned(),
            path => path.to_owned(),
        };
        let token = url
            .query()
            .filter(|query| !query.is_empty())
            .map(|query| Bytes::copy_from_slice(query.as_bytes()));

        let max = self.client.max_payload_size();
        if let Some(token) = &token
            && token.len() > max
        {
            return Err(Error::payload_too_large(token.len(), max));
        }

        self.core.begin_connect(ConnectRequest {
            uri: url,
            path: path.clone(),
            mode,
            token,
        })?;

        match self.client.registry().attach(&self.core, &endpoint, &path) {
            Ok(connection) => {
                self.core.bind_connection(connection);
                Ok(())
            }
            Err(e) => {
                self.core.abort_connect();
                Err(e)
            }
        }
    }
}

// ============================================================================
// Channel - Outbound
// ============================================================================

impl Channel {
    /// Sends binary data with guaranteed priority.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] if not open, not writable or `data` is empty
    /// - [`Error::PayloadTooLarge`] if `data` exceeds the payload limit
    pub fn send(&self, data: impl Into<Bytes>) -> Result<()> {
        self.send_with(
            ContentType::Binary,
            data.into(),
            DeliveryPriority::Guaranteed,
        )
    }

    /// Sends UTF-8 text with guaranteed priority.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub fn send_text(&self, text: &str) -> Result<()> {
        self.send_with(
            ContentType::Utf8,
            Bytes::copy_from_slice(text.as_bytes()),
            DeliveryPriority::Guaranteed,
        )
    }

    /// Sends data with an explicit content type and priority.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub fn send_with(
        &self,
        content_type: ContentType,
        data: Bytes,
        priority: DeliveryPriority,
    ) -> Result<()> {
        self.core
            .send_data(content_type, data, priority, self.client.max_payload_size())
    }

    /// Emits a binary signal.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] if not open or not emittable
    /// - [`Error::PayloadTooLarge`] if `data` exceeds the payload limit
    pub fn emit(&self, data: impl Into<Bytes>) -> Result<()> {
        self.core.send_signal(
            ContentType::Binary,
            Some(data.into()),
            self.client.max_payload_size(),
        )
    }

    /// Emits a UTF-8 signal.
    ///
    /// # Errors
    ///
    /// See [`emit`](Self::emit).
    pub fn emit_text(&self, text: &str) -> Result<()> {
        self.core.send_signal(
            ContentType::Utf8,
            Some(Bytes::copy_from_slice(text.as_bytes())),
            self.client.max_payload_size(),
        )
    }

    /// Closes the channel without a message.
    ///
    /// The channel is closed once the remote acknowledges and
    /// [`ChannelEvent::Closed`](super::ChannelEvent::Closed) is raised.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] if already closing, closed or never
    ///   connected
    pub fn close(&self) -> Result<()> {
        self.close_with(ContentType::Utf8, None)
    }

    /// Closes the channel with a UTF-8 message.
    ///
    /// # Errors
    ///
    /// See [`close_with`](Self::close_with).
    pub fn close_text(&self, message: &str) -> Result<()> {
        self.close_with(
            ContentType::Utf8,
            Some(Bytes::copy_from_slice(message.as_bytes())),
        )
    }

    /// Closes the channel with an arbitrary payload.
    ///
    /// Before the channel is open the close is held back and sent right
    /// after the open response.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] if already closing, closed or never
    ///   connected
    /// - [`Error::PayloadTooLarge`] if `payload` exceeds the payload limit
    pub fn close_with(&self, content_type: ContentType, payload: Option<Bytes>) -> Result<()> {
        self.core
            .close(content_type, payload, self.client.max_payload_size())
    }
}

// ============================================================================
// Drop
// ============================================================================

impl Drop for Channel {
    fn drop(&mut self) {
        if matches!(
            self.core.state(),
            ChannelState::Connecting | ChannelState::Resolved | ChannelState::Open
        ) {
            let _ = self.close();
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Parses a channel URI, defaulting the scheme to `http`.
fn parse_uri(uri: &str) -> Result<Url> {
    let owned;
    let uri = if uri.contains("://") {
        uri
    } else {
        owned = format!("http://{uri}");
        &owned
    };

    Url::parse(uri).map_err(|e| Error::invalid_uri(format!("{uri}: {e}")))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use tokio::time::timeout;
    use tracing_subscriber::EnvFilter;

    use crate::channel::{ChannelEvent, ChannelEvents};
    use crate::identifiers::Pointer;
    use crate::protocol::{Frame, OpCode, OpenFlag, ResolveFlag, SignalFlag};
    use crate::transport::{MemoryRemote, MemoryTransport};

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn memory_client() -> (Client, MemoryTransport) {
        init_tracing();
        let transport = MemoryTransport::new();
        let client = Client::builder()
            .transport(transport.clone())
            .build()
            .unwrap();
        (client, transport)
    }

    fn resolved(path: &str, pointer: u32) -> Frame {
        Frame::new(
            pointer,
            OpCode::Resolve,
            ResolveFlag::Success as u8,
            ContentType::Utf8,
            Some(Bytes::copy_from_slice(path.as_bytes())),
        )
    }

    fn open_response(pointer: u32, flag: OpenFlag, payload: Option<&'static str>) -> Frame {
        Frame::new(
            pointer,
            OpCode::Open,
            flag as u8,
            ContentType::Utf8,
            payload.map(|text| Bytes::from_static(text.as_bytes())),
        )
    }

    fn end(pointer: u32, payload: Option<&'static str>) -> Frame {
        Frame::signal(
            Pointer::new(pointer),
            SignalFlag::End,
            ContentType::Utf8,
            payload.map(|text| Bytes::from_static(text.as_bytes())),
        )
    }

    /// Answers the resolve and open requests for `path`, returning the open
    /// request.
    async fn grant(
        remote: &mut MemoryRemote,
        events: &mut ChannelEvents,
        path: &str,
        pointer: u32,
    ) -> Frame {
        assert_eq!(remote.recv().await, Some(Frame::resolve(path)));
        remote.send(resolved(path, pointer));

        let open = remote.recv().await.unwrap();
        assert_eq!(open.opcode(), OpCode::Open);
        assert_eq!(open.pointer(), Pointer::new(pointer));

        remote.send(open_response(pointer, OpenFlag::Success, None));
        assert!(matches!(events.recv().await, Some(ChannelEvent::Open(_))));
        open
    }

    async fn assert_silent(remote: &mut MemoryRemote) {
        let next = timeout(Duration::from_millis(50), remote.recv()).await;
        assert!(next.is_err(), "unexpected frame: {next:?}");
    }

    async fn next_closed(events: &mut ChannelEvents) -> crate::channel::ChannelClosed {
        match events.recv().await {
            Some(ChannelEvent::Closed(closed)) => closed,
            other => panic!("expected closed, got {other:?}"),
        }
    }

    // ------------------------------------------------------------------------
    // URI handling
    // ------------------------------------------------------------------------

    #[test]
    fn test_parse_uri_defaults_scheme() {
        let url = parse_uri("localhost:7010/chat?token").unwrap();
        assert_eq!(url.scheme(), "http");
        assert_eq!(url.host_str(), Some("localhost"));
        assert_eq!(url.port(), Some(7010));
        assert_eq!(url.path(), "/chat");
        assert_eq!(url.query(), Some("token"));
    }

    #[test]
    fn test_parse_uri_keeps_scheme() {
        let url = parse_uri("https://example.com/a/b").unwrap();
        assert_eq!(url.scheme(), "https");
        assert_eq!(url.path(), "/a/b");
    }

    #[test]
    fn test_parse_uri_rejects_garbage() {
        let err = parse_uri("http://").unwrap_err();
        assert!(matches!(err, Error::InvalidUri { .. }));
    }

    #[tokio::test]
    async fn test_connect_rejects_unsupported_scheme() {
        let (client, transport) = memory_client();
        let (channel, _events) = client.channel();

        let err = channel.connect("ftp://host/a", ChannelMode::READ).unwrap_err();
        assert!(matches!(err, Error::UnsupportedScheme { .. }));
        assert_eq!(channel.state(), ChannelState::Closed);
        assert_eq!(transport.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_connect_https_requires_tls() {
        let (client, _transport) = memory_client();
        let (channel, _events) = client.channel();

        let err = channel.connect("https://host/a", ChannelMode::READ).unwrap_err();
        assert!(matches!(err, Error::TlsUnsupported));
        assert_eq!(channel.state(), ChannelState::Closed);
    }

    #[tokio::test]
    async fn test_connect_https_with_tls_transport() {
        init_tracing();
        let transport = MemoryTransport::new().with_tls();
        let client = Client::builder()
            .transport(transport.clone())
            .build()
            .unwrap();
        let (channel, _events) = client.channel();

        channel.connect("https://host/a", ChannelMode::READ).unwrap();
        let remote = transport.accept().await.unwrap();
        assert!(remote.endpoint().is_secure());
        assert_eq!(remote.endpoint().port(), 443);
    }

    #[tokio::test]
    async fn test_root_path_and_token() {
        let (client, transport) = memory_client();
        let (channel, mut events) = client.channel();

        channel.connect("host:7010?secret", ChannelMode::READ).unwrap();
        assert_eq!(channel.path().as_deref(), Some("/"));

        let mut remote = transport.accept().await.unwrap();
        let open = grant(&mut remote, &mut events, "/", 3).await;
        assert_eq!(open.text(), Some("secret"));
        assert_eq!(open.flag(), ChannelMode::READ.bits());
    }

    // ------------------------------------------------------------------------
    // Connection sharing
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_distinct_paths_share_connection() {
        let (client, transport) = memory_client();
        let (a, _events_a) = client.channel();
        let (b, _events_b) = client.channel();

        a.connect("host:7010/a", ChannelMode::READ).unwrap();
        b.connect("host:7010/b", ChannelMode::READ).unwrap();
        assert_eq!(client.connection_count(), 1);

        let mut remote = transport.accept().await.unwrap();
        let mut paths = vec![
            remote.recv().await.unwrap().text().map(str::to_owned),
            remote.recv().await.unwrap().text().map(str::to_owned),
        ];
        paths.sort();
        assert_eq!(paths, [Some("/a".to_owned()), Some("/b".to_owned())]);
    }

    #[tokio::test]
    async fn test_same_path_opens_second_connection() {
        let (client, transport) = memory_client();
        let (a, _events_a) = client.channel();
        let (b, _events_b) = client.channel();

        a.connect("host:7010/x", ChannelMode::READ).unwrap();
        b.connect("host:7010/x", ChannelMode::READ).unwrap();
        assert_eq!(client.connection_count(), 2);

        for _ in 0..2 {
            let mut remote = transport.accept().await.unwrap();
            assert_eq!(remote.recv().await, Some(Frame::resolve("/x")));
        }
    }

    #[tokio::test]
    async fn test_resolves_wait_for_handshake() {
        init_tracing();
        let transport = MemoryTransport::with_manual_handshake();
        let client = Client::builder()
            .transport(transport.clone())
            .build()
            .unwrap();
        let (channel, _events) = client.channel();

        channel.connect("host/queued", ChannelMode::READ).unwrap();
        let mut remote = transport.accept().await.unwrap();
        assert_silent(&mut remote).await;

        remote.complete_handshake();
        assert_eq!(remote.recv().await, Some(Frame::resolve("/queued")));
    }

    // ------------------------------------------------------------------------
    // Open, send, close
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_send_and_clean_close_scenario() {
        let (client, transport) = memory_client();
        let (channel, mut events) = client.channel();

        channel.connect("host/path1", ChannelMode::READ_WRITE).unwrap();
        let mut remote = transport.accept().await.unwrap();
        grant(&mut remote, &mut events, "/path1", 7).await;
        assert!(channel.is_writable());

        channel.send_text("hi").unwrap();
        let data = remote.recv().await.unwrap();
        assert_eq!(data.opcode(), OpCode::Data);
        assert_eq!(data.pointer(), Pointer::new(7));
        assert_eq!(data.content_type(), ContentType::Utf8);
        assert_eq!(data.payload().map(|p| &p[..]), Some(&b"hi"[..]));

        channel.close().unwrap();
        assert_eq!(channel.state(), ChannelState::Closing);
        let close = remote.recv().await.unwrap();
        assert_eq!(close.opcode(), OpCode::Signal);
        assert_eq!(close.pointer(), Pointer::new(7));
        assert_eq!(close.signal_flag(), Some(SignalFlag::End));

        remote.send(end(7, None));
        let closed = next_closed(&mut events).await;
        assert!(closed.was_clean);
        assert!(!closed.was_denied);
        assert_eq!(channel.state(), ChannelState::Closed);

        // No echo for our own close; the link is released.
        assert_eq!(remote.recv().await, None);
        assert_eq!(client.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_close_while_resolved_is_deferred() {
        let (client, transport) = memory_client();
        let (channel, mut events) = client.channel();

        channel.connect("host/slow", ChannelMode::READ).unwrap();
        let mut remote = transport.accept().await.unwrap();
        assert_eq!(remote.recv().await, Some(Frame::resolve("/slow")));
        remote.send(resolved("/slow", 9));
        assert_eq!(remote.recv().await.unwrap().opcode(), OpCode::Open);
        assert_eq!(channel.state(), ChannelState::Resolved);

        channel.close_text("bye").unwrap();
        assert_eq!(channel.state(), ChannelState::Closing);
        assert_silent(&mut remote).await;

        remote.send(open_response(9, OpenFlag::Success, Some("welcome")));
        let end_frame = remote.recv().await.unwrap();
        assert_eq!(end_frame.signal_flag(), Some(SignalFlag::End));
        assert_eq!(end_frame.pointer(), Pointer::new(9));
        assert_eq!(end_frame.text(), Some("bye"));

        remote.send(end(9, None));
        let closed = next_closed(&mut events).await;
        assert!(closed.was_clean);

        // Exactly one End was written before the link closed.
        assert_eq!(remote.recv().await, None);
    }

    #[tokio::test]
    async fn test_close_while_connecting_detaches_on_resolve() {
        let (client, transport) = memory_client();
        let (channel, mut events) = client.channel();

        channel.connect("host/early", ChannelMode::READ).unwrap();
        channel.close().unwrap();

        let mut remote = transport.accept().await.unwrap();
        assert_eq!(remote.recv().await, Some(Frame::resolve("/early")));
        remote.send(resolved("/early", 4));

        let closed = next_closed(&mut events).await;
        assert!(!closed.was_clean);
        assert_eq!(remote.recv().await, None);
    }

    #[tokio::test]
    async fn test_remote_end_is_echoed_once() {
        let (client, transport) = memory_client();
        let (channel, mut events) = client.channel();

        channel.connect("host/kick", ChannelMode::READ).unwrap();
        let mut remote = transport.accept().await.unwrap();
        grant(&mut remote, &mut events, "/kick", 5).await;

        remote.send(end(5, Some("kicked")));
        let echo = remote.recv().await.unwrap();
        assert_eq!(echo.signal_flag(), Some(SignalFlag::End));
        assert_eq!(echo.pointer(), Pointer::new(5));

        let closed = next_closed(&mut events).await;
        assert!(closed.was_clean);
        assert_eq!(closed.reason, "kicked");
        assert_eq!(remote.recv().await, None);

        let err = channel.close().unwrap_err();
        assert!(err.is_usage_error());
    }

    #[tokio::test]
    async fn test_broadcast_end_closes_every_channel() {
        let (client, transport) = memory_client();
        let (a, mut events_a) = client.channel();
        let (b, mut events_b) = client.channel();

        a.connect("host/a", ChannelMode::READ).unwrap();
        let mut remote = transport.accept().await.unwrap();
        grant(&mut remote, &mut events_a, "/a", 1).await;
        b.connect("host/b", ChannelMode::WRITE).unwrap();
        grant(&mut remote, &mut events_b, "/b", 2).await;

        remote.send(end(0, Some("bye all")));

        for events in [&mut events_a, &mut events_b] {
            let closed = next_closed(events).await;
            assert!(closed.was_clean);
            assert_eq!(closed.reason, "bye all");
        }
        assert_eq!(remote.recv().await, None);
        assert_eq!(client.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_deny_closes_without_open() {
        let (client, transport) = memory_client();
        let (channel, mut events) = client.channel();

        channel.connect("host/private", ChannelMode::READ).unwrap();
        let mut remote = transport.accept().await.unwrap();
        assert_eq!(remote.recv().await, Some(Frame::resolve("/private")));
        remote.send(resolved("/private", 2));
        assert_eq!(remote.recv().await.unwrap().opcode(), OpCode::Open);

        remote.send(open_response(2, OpenFlag::Deny, Some("not allowed")));

        let closed = next_closed(&mut events).await;
        assert!(closed.was_denied);
        assert!(!closed.was_clean);
        assert_eq!(closed.reason, "not allowed");
        assert_eq!(channel.state(), ChannelState::Closed);
    }

    #[tokio::test]
    async fn test_deny_leaves_other_channels_open() {
        let (client, transport) = memory_client();
        let (a, mut events_a) = client.channel();
        let (b, mut events_b) = client.channel();

        a.connect("host/a", ChannelMode::READ).unwrap();
        let mut remote = transport.accept().await.unwrap();
        grant(&mut remote, &mut events_a, "/a", 1).await;

        b.connect("host/b", ChannelMode::READ).unwrap();
        assert_eq!(remote.recv().await, Some(Frame::resolve("/b")));
        remote.send(resolved("/b", 2));
        assert_eq!(remote.recv().await.unwrap().opcode(), OpCode::Open);
        remote.send(open_response(2, OpenFlag::Deny, None));

        let closed = next_closed(&mut events_b).await;
        assert_eq!(closed.reason, "Open was denied");
        assert_eq!(a.state(), ChannelState::Open);
        assert_eq!(client.connection_count(), 1);
    }

    // ------------------------------------------------------------------------
    // Inbound dispatch
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_broadcast_data_reaches_readers_only() {
        let (client, transport) = memory_client();
        let (reader, mut reader_events) = client.channel();
        let (writer, mut writer_events) = client.channel();
        let (emitter, mut emitter_events) = client.channel();

        reader.connect("host/r", ChannelMode::READ).unwrap();
        let mut remote = transport.accept().await.unwrap();
        grant(&mut remote, &mut reader_events, "/r", 1).await;
        writer.connect("host/w", ChannelMode::WRITE).unwrap();
        grant(&mut remote, &mut writer_events, "/w", 2).await;
        emitter.connect("host/e", ChannelMode::EMIT).unwrap();
        grant(&mut remote, &mut emitter_events, "/e", 3).await;

        remote.send(Frame::data(
            Pointer::BROADCAST,
            DeliveryPriority::Low,
            ContentType::Utf8,
            Bytes::from_static(b"all"),
        ));
        remote.send(Frame::signal(
            Pointer::BROADCAST,
            SignalFlag::Emit,
            ContentType::Utf8,
            Some(Bytes::from_static(b"ping")),
        ));

        let Some(ChannelEvent::Data(data)) = reader_events.recv().await else {
            panic!("reader expected data");
        };
        assert_eq!(data.text(), Some("all"));
        assert_eq!(data.priority, DeliveryPriority::Low);

        for events in [&mut reader_events, &mut writer_events, &mut emitter_events] {
            let Some(ChannelEvent::Signal(signal)) = events.recv().await else {
                panic!("expected signal");
            };
            assert_eq!(signal.text(), Some("ping"));
        }
    }

    #[tokio::test]
    async fn test_data_to_write_only_channel_is_dropped() {
        let (client, transport) = memory_client();
        let (channel, mut events) = client.channel();

        channel.connect("host/w", ChannelMode::WRITE_EMIT).unwrap();
        let mut remote = transport.accept().await.unwrap();
        grant(&mut remote, &mut events, "/w", 6).await;

        remote.send(Frame::data(
            Pointer::new(6),
            DeliveryPriority::Guaranteed,
            ContentType::Binary,
            Bytes::from_static(b"\x01"),
        ));
        remote.send(Frame::signal(
            Pointer::new(6),
            SignalFlag::Emit,
            ContentType::Utf8,
            None,
        ));

        assert!(matches!(events.recv().await, Some(ChannelEvent::Signal(_))));
    }

    #[tokio::test]
    async fn test_zero_length_data_closes_every_channel() {
        let (client, transport) = memory_client();
        let (a, mut events_a) = client.channel();
        let (b, mut events_b) = client.channel();

        a.connect("host/a", ChannelMode::READ).unwrap();
        let mut remote = transport.accept().await.unwrap();
        grant(&mut remote, &mut events_a, "/a", 1).await;
        b.connect("host/b", ChannelMode::READ).unwrap();
        grant(&mut remote, &mut events_b, "/b", 2).await;

        remote.send(Frame::new(1u32, OpCode::Data, 0, ContentType::Utf8, None));

        for events in [&mut events_a, &mut events_b] {
            let closed = next_closed(events).await;
            assert!(closed.reason.starts_with("Protocol error"));
            assert!(!closed.was_clean);
        }
        assert_eq!(remote.recv().await, None);
        assert_eq!(client.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_open_on_open_channel_is_fatal() {
        let (client, transport) = memory_client();
        let (channel, mut events) = client.channel();

        channel.connect("host/a", ChannelMode::READ).unwrap();
        let mut remote = transport.accept().await.unwrap();
        grant(&mut remote, &mut events, "/a", 1).await;

        remote.send(open_response(1, OpenFlag::Success, None));
        let closed = next_closed(&mut events).await;
        assert_eq!(
            closed.reason,
            "Protocol error: Server sent open to an open channel"
        );
    }

    // ------------------------------------------------------------------------
    // Transport failures
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_refused_connection_closes_channel() {
        let (client, transport) = memory_client();
        transport.refuse_connections(Some("host unreachable"));
        let (channel, mut events) = client.channel();

        channel.connect("host/a", ChannelMode::READ).unwrap();

        let closed = next_closed(&mut events).await;
        assert!(closed.reason.contains("host unreachable"));
        assert!(!closed.was_clean);
        assert_eq!(client.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_hang_up_closes_channels() {
        let (client, transport) = memory_client();
        let (channel, mut events) = client.channel();

        channel.connect("host/a", ChannelMode::READ).unwrap();
        let mut remote = transport.accept().await.unwrap();
        grant(&mut remote, &mut events, "/a", 1).await;

        remote.hang_up();
        let closed = next_closed(&mut events).await;
        assert_eq!(closed.reason, "Connection closed by remote");
        assert_eq!(client.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_client_shutdown_closes_channels() {
        let (client, transport) = memory_client();
        let (channel, mut events) = client.channel();

        channel.connect("host/a", ChannelMode::READ).unwrap();
        let mut remote = transport.accept().await.unwrap();
        grant(&mut remote, &mut events, "/a", 1).await;

        client.shutdown();
        let closed = next_closed(&mut events).await;
        assert_eq!(closed.reason, "Client shut down");
        assert_eq!(remote.recv().await, None);
    }

    // ------------------------------------------------------------------------
    // Usage errors
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_usage_errors_have_no_network_effect() {
        let (client, transport) = memory_client();
        let (channel, mut events) = client.channel();

        assert!(channel.send_text("early").unwrap_err().is_usage_error());
        assert!(channel.close().unwrap_err().is_usage_error());

        channel.connect("host/a", ChannelMode::READ).unwrap();
        let err = channel.connect("host/a", ChannelMode::READ).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidState {
                state: ChannelState::Connecting,
                ..
            }
        ));

        let mut remote = transport.accept().await.unwrap();
        grant(&mut remote, &mut events, "/a", 1).await;

        assert!(channel.send_text("nope").unwrap_err().is_usage_error());
        assert!(channel.emit_text("nope").unwrap_err().is_usage_error());
        assert_silent(&mut remote).await;
    }

    #[tokio::test]
    async fn test_payload_limit() {
        init_tracing();
        let transport = MemoryTransport::new();
        let client = Client::builder()
            .transport(transport.clone())
            .max_payload_size(4)
            .build()
            .unwrap();
        let (channel, mut events) = client.channel();

        channel.connect("host/a", ChannelMode::READ_WRITE_EMIT).unwrap();
        let mut remote = transport.accept().await.unwrap();
        grant(&mut remote, &mut events, "/a", 1).await;

        let err = channel.send(vec![0u8; 5]).unwrap_err();
        assert!(matches!(err, Error::PayloadTooLarge { size: 5, max: 4 }));
        let err = channel.emit_text("12345").unwrap_err();
        assert!(matches!(err, Error::PayloadTooLarge { .. }));

        channel.send(vec![0u8; 4]).unwrap();
        let data = remote.recv().await.unwrap();
        assert_eq!(data.payload_len(), 4);
        assert_eq!(data.content_type(), ContentType::Binary);
    }

    #[tokio::test]
    async fn test_closed_channel_cannot_reconnect() {
        let (client, transport) = memory_client();
        let (channel, mut events) = client.channel();

        channel.connect("host/a", ChannelMode::READ).unwrap();
        let mut remote = transport.accept().await.unwrap();
        grant(&mut remote, &mut events, "/a", 1).await;
        remote.send(end(1, None));
        next_closed(&mut events).await;

        let err = channel.connect("host/a", ChannelMode::READ).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidState {
                state: ChannelState::Closed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_drop_closes_open_channel() {
        let (client, transport) = memory_client();
        let (channel, mut events) = client.channel();

        channel.connect("host/a", ChannelMode::READ).unwrap();
        let mut remote = transport.accept().await.unwrap();
        grant(&mut remote, &mut events, "/a", 8).await;

        drop(channel);
        let close = remote.recv().await.unwrap();
        assert_eq!(close.signal_flag(), Some(SignalFlag::End));
        assert_eq!(close.pointer(), Pointer::new(8));
    }
}
