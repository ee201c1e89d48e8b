//! Codec for the engine's multiplexed log format.
//!
//! Each frame is an 8-byte header followed by its payload:
//! `[stream_type][0][0][0][size: u32 big-endian][payload]`.
//! Stream types are 0 (stdin), 1 (stdout), 2 (stderr) and 3 (an error
//! raised by the daemon while streaming).

use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::{Decoder, FramedRead};

use crate::error::EngineError;
use crate::types::{LogChunk, LogStream};

/// Length of a frame header.
pub const HEADER_LEN: usize = 8;

/// Default upper bound on a frame payload.
pub const DEFAULT_MAX_FRAME_LEN: usize = 8 * 1024 * 1024;

const STDIN: u8 = 0;
const STDOUT: u8 = 1;
const STDERR: u8 = 2;
const SYSTEM_ERROR: u8 = 3;

/// Decodes multiplexed frames into [`LogChunk`]s.
///
/// Stdin frames are routed to stdout. A stream ending inside a frame is
/// reported as a decode error by [`Decoder::decode_eof`], and so is a
/// header announcing a payload above the decoder's limit.
#[derive(Debug, Clone, Copy)]
pub struct FrameDecoder {
    max_frame_len: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Creates a decoder accepting payloads up to [`DEFAULT_MAX_FRAME_LEN`].
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    /// Sets the largest payload accepted.
    #[must_use]
    pub const fn max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }
}

impl Decoder for FrameDecoder {
    type Item = LogChunk;
    type Error = EngineError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<LogChunk>, EngineError> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        let stream_type = src[0];
        let size = u32::from_be_bytes([src[4], src[5], src[6], src[7]]) as usize;
        if size > self.max_frame_len {
            return Err(EngineError::Decode {
                what: "log frame",
                message: format!("frame of {size} bytes exceeds the {} byte limit", self.max_frame_len),
            });
        }
        let frame_len = HEADER_LEN + size;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let payload = src.split_to(size).freeze();
        match stream_type {
            STDIN | STDOUT => Ok(Some(LogChunk::Stdout(payload))),
            STDERR => Ok(Some(LogChunk::Stderr(payload))),
            SYSTEM_ERROR => Err(EngineError::Daemon {
                message: String::from_utf8_lossy(&payload).into_owned(),
            }),
            other => Err(EngineError::Decode {
                what: "log frame",
                message: format!("unknown stream type {other}"),
            }),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<LogChunk>, EngineError> {
        match self.decode(src)? {
            Some(chunk) => Ok(Some(chunk)),
            None if src.is_empty() => Ok(None),
            None => Err(EngineError::Decode {
                what: "log frame",
                message: format!("stream ended inside a frame ({} trailing bytes)", src.len()),
            }),
        }
    }
}

/// Encodes one chunk as a multiplexed frame.
#[must_use]
pub fn encode_frame(chunk: &LogChunk) -> Bytes {
    let (stream_type, payload) = match chunk {
        LogChunk::Stdout(b) => (STDOUT, b),
        LogChunk::Stderr(b) => (STDERR, b),
    };
    let mut out = BytesMut::with_capacity(HEADER_LEN + payload.len());
    out.put_u8(stream_type);
    out.put_bytes(0, 3);
    #[allow(clippy::cast_possible_truncation)]
    out.put_u32(payload.len() as u32);
    out.put_slice(payload);
    out.freeze()
}

/// Wraps a raw multiplexed byte stream as a [`LogStream`].
pub fn decode_log_stream<R>(reader: R) -> LogStream
where
    R: AsyncRead + Send + Unpin + 'static,
{
    FramedRead::new(reader, FrameDecoder::new()).boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stdout(s: &str) -> LogChunk {
        LogChunk::Stdout(Bytes::copy_from_slice(s.as_bytes()))
    }

    fn stderr(s: &str) -> LogChunk {
        LogChunk::Stderr(Bytes::copy_from_slice(s.as_bytes()))
    }

    #[test]
    fn encoded_header_matches_wire_layout() {
        let frame = encode_frame(&stderr("oops"));
        assert_eq!(&frame[..HEADER_LEN], &[2, 0, 0, 0, 0, 0, 0, 4]);
        assert_eq!(&frame[HEADER_LEN..], b"oops");
    }

    #[test]
    fn decoder_waits_for_a_complete_frame() {
        let frame = encode_frame(&stdout("hello"));
        let mut buf = BytesMut::from(&frame[..10]);
        assert!(FrameDecoder::new().decode(&mut buf).expect("decode").is_none());
        buf.extend_from_slice(&frame[10..]);
        assert_eq!(FrameDecoder::new().decode(&mut buf).expect("decode"), Some(stdout("hello")));
        assert!(buf.is_empty());
    }

    #[test]
    fn stdin_frames_are_routed_to_stdout() {
        let mut buf = BytesMut::from(&[0u8, 0, 0, 0, 0, 0, 0, 2, b'h', b'i'][..]);
        assert_eq!(FrameDecoder::new().decode(&mut buf).expect("decode"), Some(stdout("hi")));
    }

    #[test]
    fn system_error_frame_is_an_error() {
        let mut buf = BytesMut::from(&[3u8, 0, 0, 0, 0, 0, 0, 3, b'b', b'a', b'd'][..]);
        let err = FrameDecoder::new().decode(&mut buf).unwrap_err();
        assert!(matches!(err, EngineError::Daemon { message } if message == "bad"));
    }

    #[test]
    fn unknown_stream_type_is_a_decode_error() {
        let mut buf = BytesMut::from(&[9u8, 0, 0, 0, 0, 0, 0, 0][..]);
        assert!(FrameDecoder::new().decode(&mut buf).unwrap_err().is_decode());
    }

    #[test]
    fn oversized_header_is_rejected_without_allocating() {
        let mut buf = BytesMut::from(&[1u8, 0, 0, 0, 0xff, 0xff, 0xff, 0xff, b'x'][..]);
        let capacity = buf.capacity();
        assert!(FrameDecoder::new().decode(&mut buf).unwrap_err().is_decode());
        assert_eq!(buf.capacity(), capacity);
    }

    #[test]
    fn limit_is_configurable() {
        let frame = encode_frame(&stdout("hello"));
        let mut buf = BytesMut::from(&frame[..]);
        assert!(FrameDecoder::new().max_frame_len(4).decode(&mut buf).unwrap_err().is_decode());

        let mut buf = BytesMut::from(&frame[..]);
        let chunk = FrameDecoder::new().max_frame_len(5).decode(&mut buf).expect("decode");
        assert_eq!(chunk, Some(stdout("hello")));
    }

    #[test]
    fn truncated_frame_at_eof_is_a_decode_error() {
        let frame = encode_frame(&stdout("truncated"));
        let mut buf = BytesMut::from(&frame[..HEADER_LEN + 3]);
        assert!(FrameDecoder::new().decode_eof(&mut buf).unwrap_err().is_decode());
    }

    #[tokio::test]
    async fn decode_log_stream_preserves_arrival_order() {
        let mut raw = BytesMut::new();
        for chunk in [stdout("one "), stderr("two "), stdout("three")] {
            raw.extend_from_slice(&encode_frame(&chunk));
        }
        let chunks: Vec<LogChunk> = decode_log_stream(std::io::Cursor::new(raw.freeze()))
            .map(|c| c.expect("chunk"))
            .collect()
            .await;
        assert_eq!(chunks, vec![stdout("one "), stderr("two "), stdout("three")]);
    }
}
