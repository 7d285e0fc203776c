//! HTTP upgrade from a plain byte stream to the framed protocol.
//!
//! ```text
//! → GET / HTTP/1.1
//!   Connection: Upgrade
//!   Upgrade: winksock/1
//!   Host: example.com
//!
//! ← HTTP/1.1 101 Switching Protocols
//!   ...
//! ```
//!
//! Anything the remote sends after the response header already belongs to
//! the frame stream and is handed back to the caller.

// ============================================================================
// Imports
// ============================================================================

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Protocol token sent in the `Upgrade` header.
pub const PROTOCOL_VERSION: &str = "winksock/1";

/// Largest response header accepted.
pub const MAX_RESPONSE_HEADER: usize = 1024;

const HEADER_END: &[u8] = b"\r\n\r\n";

/// Largest refusal body kept as the failure reason.
pub const MAX_REFUSAL_BODY: usize = 1024;

const BAD_HANDSHAKE: &str = "Unable to connect to host(BAD_HANDSHAKE)";

const BAD_HANDSHAKE_FROM_SERVER: &str = "Bad handshake from server";

// ============================================================================
// Request
// ============================================================================

/// Builds the upgrade request for `host`.
#[must_use]
pub fn request(host: &str, protocol: &str) -> String {
    format!(
        "GET / HTTP/1.1\r\n\
         Connection: Upgrade\r\n\
         Upgrade: {protocol}\r\n\
         Host: {host}\r\n\
         \r\n"
    )
}

// ============================================================================
// Response
// ============================================================================

/// Outcome of scanning the bytes received so far.
#[derive(Debug, PartialEq, Eq)]
pub enum Response {
    /// The header, or the body of a refusal, is not complete yet.
    Partial,
    /// Upgrade accepted; the header spans this many bytes.
    Upgraded { header_len: usize },
}

/// Checks the bytes received so far.
///
/// A refusal is reported once its body is complete: `Content-Length`
/// bytes when the header carries one, otherwise [`MAX_REFUSAL_BODY`] bytes.
/// A refusal without a length usually ends at EOF; see [`finish_at_eof`].
///
/// # Errors
///
/// [`Error::Handshake`] if the header exceeds [`MAX_RESPONSE_HEADER`] or
/// the status is not `101`. For a refused upgrade the reason is the
/// response body when there is one.
pub fn parse_response(buf: &[u8]) -> Result<Response> {
    let Some(end) = find_header_end(buf) else {
        if buf.len() >= MAX_RESPONSE_HEADER {
            return Err(Error::handshake(BAD_HANDSHAKE));
        }
        return Ok(Response::Partial);
    };

    let header_len = end + HEADER_END.len();
    if header_len > MAX_RESPONSE_HEADER {
        return Err(Error::handshake(BAD_HANDSHAKE));
    }

    let header = String::from_utf8_lossy(&buf[..end]);
    let status_line = header.lines().next().unwrap_or_default();
    trace!(status = %status_line, "Upgrade response");

    if status_line.split_whitespace().nth(1) == Some("101") {
        return Ok(Response::Upgraded { header_len });
    }

    let body = &buf[header_len..];
    let wanted = content_length(&header).unwrap_or(MAX_REFUSAL_BODY).min(MAX_REFUSAL_BODY);
    if body.len() < wanted {
        return Ok(Response::Partial);
    }
    Err(refusal(&body[..wanted]))
}

/// Settles a handshake whose stream ended before [`parse_response`] did.
///
/// Returns `None` when nothing resembling a refusal arrived.
#[must_use]
pub fn finish_at_eof(buf: &[u8]) -> Option<Error> {
    let text = String::from_utf8_lossy(buf);
    let status = text.lines().next()?.split_whitespace().nth(1)?;
    if status == "101" {
        return None;
    }

    match find_header_end(buf) {
        Some(end) => {
            let body = &buf[end + HEADER_END.len()..];
            Some(refusal(&body[..body.len().min(MAX_REFUSAL_BODY)]))
        }
        None => Some(Error::handshake(BAD_HANDSHAKE_FROM_SERVER)),
    }
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADER_END.len())
        .position(|window| window == HEADER_END)
}

fn content_length(header: &str) -> Option<usize> {
    header.lines().skip(1).find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.trim()
            .eq_ignore_ascii_case("content-length")
            .then(|| value.trim().parse().ok())
            .flatten()
    })
}

fn refusal(body: &[u8]) -> Error {
    let body = String::from_utf8_lossy(body);
    match body.trim() {
        "" => Error::handshake(BAD_HANDSHAKE_FROM_SERVER),
        reason => Error::handshake(reason),
    }
}

// ============================================================================
// Perform
// ============================================================================

/// Runs the upgrade over `io`.
///
/// Returns the bytes received past the response header.
///
/// # Errors
///
/// - [`Error::Handshake`] if the remote refused or sent a bad response
/// - [`Error::Connection`] if the stream ended mid-handshake
/// - [`Error::Io`] on read/write failure
pub async fn perform<S>(io: &mut S, host: &str, protocol: &str) -> Result<BytesMut>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    io.write_all(request(host, protocol).as_bytes()).await?;
    io.flush().await?;

    let mut buf = BytesMut::with_capacity(MAX_RESPONSE_HEADER);
    loop {
        if let Response::Upgraded { header_len } = parse_response(&buf)? {
            buf.advance(header_len);
            debug!(host, leftover = buf.len(), "Handshake complete");
            return Ok(buf);
        }

        if io.read_buf(&mut buf).await? == 0 {
            return Err(finish_at_eof(&buf)
                .unwrap_or_else(|| Error::connection("Connection closed during handshake")));
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
