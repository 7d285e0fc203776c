//! Stream framing for [`Frame`]s.
//!
//! [`FrameCodec`] plugs into `tokio_util::codec::Framed` so transports work
//! in whole frames: the decoder waits for the 2-byte length prefix and the
//! full body, the encoder writes the length-prefixed encoding.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::error::FrameError;

use super::frame::{Frame, HEADER_SIZE, LENGTH_SIZE};

/// Length-prefixed frame codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec;

impl FrameCodec {
    /// Creates a codec.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        if src.len() < LENGTH_SIZE {
            return Ok(None);
        }

        let len = u16::from_be_bytes([src[0], src[1]]) as usize;
        if len < HEADER_SIZE {
            return Err(FrameError::malformed(format!(
                "length prefix {len} is shorter than the {HEADER_SIZE}-byte header"
            )));
        }

        if src.len() < LENGTH_SIZE + len {
            src.reserve(LENGTH_SIZE + len - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_SIZE);
        let body = src.split_to(len).freeze();
        let frame = Frame::decode(body)?;
        trace!(%frame, "Frame decoded");
        Ok(Some(frame))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        frame.encode(dst)
    }
}
