//! TCP transport.
//!
//! Opens a socket, optionally wraps it in TLS (`tls` feature), performs the
//! upgrade handshake and frames the stream with [`FrameCodec`].
//!
//! Bytes that arrive in the same read as the handshake response are kept
//! and decoded as the first frames.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::{Framed, FramedParts};
use tracing::debug;

use crate::error::{Error, Result};
use crate::protocol::{Frame, FrameCodec};

use super::handshake::{self, PROTOCOL_VERSION};
use super::{Endpoint, FramedIo, Scheme, Transport};

// ============================================================================
// TcpOptions
// ============================================================================

/// Socket and handshake settings.
///
/// No timeouts apply unless configured.
#[derive(Debug, Clone)]
pub struct TcpOptions {
    /// Disable Nagle's algorithm.
    pub nodelay: bool,
    /// Limit for establishing the socket; `None` waits indefinitely.
    pub connect_timeout: Option<Duration>,
    /// Limit for the upgrade handshake; `None` waits indefinitely.
    pub handshake_timeout: Option<Duration>,
    /// Token sent in the `Upgrade` header.
    pub protocol_version: String,
}

impl Default for TcpOptions {
    fn default() -> Self {
        Self {
            nodelay: true,
            connect_timeout: None,
            handshake_timeout: None,
            protocol_version: PROTOCOL_VERSION.to_owned(),
        }
    }
}

impl TcpOptions {
    /// Creates the default options.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `TCP_NODELAY`.
    #[inline]
    #[must_use]
    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// Sets the socket connect limit.
    #[inline]
    #[must_use]
    pub fn connect_timeout(mut self, limit: Option<Duration>) -> Self {
        self.connect_timeout = limit;
        self
    }

    /// Sets the handshake limit.
    #[inline]
    #[must_use]
    pub fn handshake_timeout(mut self, limit: Option<Duration>) -> Self {
        self.handshake_timeout = limit;
        self
    }

    /// Sets the `Upgrade` protocol token.
    #[inline]
    #[must_use]
    pub fn protocol_version(mut self, version: impl Into<String>) -> Self {
        self.protocol_version = version.into();
        self
    }
}

// ============================================================================
// TcpTransport
// ============================================================================

/// Transport over TCP sockets.
#[derive(Clone, Default)]
pub struct TcpTransport {
    options: TcpOptions,
    #[cfg(feature = "tls")]
    tls: tls::Connector,
}

impl fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpTransport")
            .field("options", &self.options)
            .field("tls", &self.supports_tls())
            .finish()
    }
}

impl TcpTransport {
    /// Creates a transport with default options.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a transport with the given options.
    #[must_use]
    pub fn with_options(options: TcpOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    /// Current options.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &TcpOptions {
        &self.options
    }

    async fn open_socket(&self, endpoint: &Endpoint) -> Result<TcpStream> {
        let connect = TcpStream::connect((endpoint.socket_host(), endpoint.port()));
        let result = match self.options.connect_timeout {
            Some(limit) => timeout(limit, connect).await.map_err(|_| {
                Error::connection(format!("Timed out connecting to {endpoint} after {limit:?}"))
            })?,
            None => connect.await,
        };

        let stream =
            result.map_err(|e| Error::connection(format!("Unable to connect to {endpoint}: {e}")))?;
        stream.set_nodelay(self.options.nodelay)?;

        debug!(%endpoint, "Socket connected");
        Ok(stream)
    }

    async fn upgrade<S>(&self, mut io: S, endpoint: &Endpoint) -> Result<FramedIo>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let pending =
            handshake::perform(&mut io, endpoint.host(), &self.options.protocol_version);
        let leftover = match self.options.handshake_timeout {
            Some(limit) => timeout(limit, pending).await.map_err(|_| {
                Error::handshake(format!("No upgrade response from {endpoint} after {limit:?}"))
            })??,
            None => pending.await?,
        };

        let mut parts = FramedParts::new::<Frame>(io, FrameCodec::new());
        parts.read_buf = leftover;
        let (sink, stream) = Framed::from_parts(parts).split::<Frame>();

        Ok(FramedIo {
            sink: Box::pin(sink.sink_map_err(Error::Frame)),
            stream: Box::pin(stream.map(|item| item.map_err(Error::Frame))),
        })
    }

    #[cfg(feature = "tls")]
    async fn upgrade_tls(&self, stream: TcpStream, endpoint: &Endpoint) -> Result<FramedIo> {
        let stream = self.tls.connect(stream, endpoint).await?;
        self.upgrade(stream, endpoint).await
    }

    #[cfg(not(feature = "tls"))]
    async fn upgrade_tls(&self, _stream: TcpStream, _endpoint: &Endpoint) -> Result<FramedIo> {
        Err(Error::TlsUnsupported)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn supports_tls(&self) -> bool {
        cfg!(feature = "tls")
    }

    async fn connect(&self, endpoint: &Endpoint) -> Result<FramedIo> {
        let stream = self.open_socket(endpoint).await?;
        match endpoint.scheme() {
            Scheme::Http => self.upgrade(stream, endpoint).await,
            Scheme::Https => self.upgrade_tls(stream, endpoint).await,
        }
    }
}

// ============================================================================
// TLS
// ============================================================================

#[cfg(feature = "tls")]
mod tls {
    use std::fmt;
    use std::sync::Arc;

    use tokio::net::TcpStream;
    use tokio_rustls::TlsConnector;
    use tokio_rustls::client::TlsStream;
    use tokio_rustls::rustls::pki_types::ServerName;
    use tokio_rustls::rustls::{ClientConfig, RootCertStore};

    use crate::error::{Error, Result};
    use crate::transport::Endpoint;

    /// TLS client trusting the bundled web PKI roots.
    #[derive(Clone)]
    pub(super) struct Connector(TlsConnector);

    impl Default for Connector {
        fn default() -> Self {
            let mut roots = RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            let config = ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth();
            Self(TlsConnector::from(Arc::new(config)))
        }
    }

    impl fmt::Debug for Connector {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("Connector")
        }
    }

    impl Connector {
        pub(super) async fn connect(
            &self,
            stream: TcpStream,
            endpoint: &Endpoint,
        ) -> Result<TlsStream<TcpStream>> {
            let name = ServerName::try_from(endpoint.socket_host().to_owned())
                .map_err(|e| Error::invalid_uri(format!("{endpoint}: {e}")))?;

            self.0
                .connect(name, stream)
                .await
                .map_err(|e| Error::connection(format!("TLS handshake with {endpoint} failed: {e}")))
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
