//! Length-prefixed framing for shipped log records.
//!
//! Every record travels as `[u32 big-endian length][payload]`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::LogdError;

/// Size of the length prefix.
pub const HEADER_LEN: usize = 4;

/// Default upper bound on a single payload.
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Codec for `[u32 BE length][payload]` frames.
#[derive(Debug, Clone, Copy)]
pub struct LogFrameCodec {
    max_frame_len: usize,
}

impl LogFrameCodec {
    /// Creates a codec rejecting payloads above `max_frame_len` bytes.
    #[must_use]
    pub const fn new(max_frame_len: usize) -> Self {
        Self { max_frame_len }
    }

    /// Returns the payload limit.
    #[must_use]
    pub const fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }
}

impl Default for LogFrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl Decoder for LogFrameCodec {
    type Item = Bytes;
    type Error = LogdError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&src[..HEADER_LEN]);
        let len = u32::from_be_bytes(header) as usize;

        if len > self.max_frame_len {
            return Err(LogdError::FrameTooLarge {
                len,
                max: self.max_frame_len,
            });
        }

        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        Ok(Some(src.split_to(len).freeze()))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if src.is_empty() {
            return Ok(None);
        }
        // A partial length prefix at EOF is a clean end of stream.
        if src.len() < HEADER_LEN {
            src.clear();
            return Ok(None);
        }

        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&src[..HEADER_LEN]);
        let expected = u32::from_be_bytes(header) as usize;
        let got = src.len() - HEADER_LEN;
        src.clear();
        Err(LogdError::Truncated { expected, got })
    }
}

impl Encoder<Bytes> for LogFrameCodec {
    type Error = LogdError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let len = item.len();
        if len > self.max_frame_len {
            return Err(LogdError::FrameTooLarge {
                len,
                max: self.max_frame_len,
            });
        }
        let prefix = u32::try_from(len).map_err(|_| LogdError::FrameTooLarge {
            len,
            max: u32::MAX as usize,
        })?;

        dst.reserve(HEADER_LEN + len);
        dst.put_u32(prefix);
        dst.extend_from_slice(&item);
        Ok(())
    }
}
