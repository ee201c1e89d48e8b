//! Incremental decoding of newline-delimited pull status records.

use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};

use crate::error::EngineError;
use crate::types::{PullStatus, PullStream};

/// Decodes a raw pull response one JSON record per line.
///
/// Blank lines are skipped. The first malformed record yields an
/// [`EngineError::Decode`] carrying the decoder's message.
pub fn decode_pull_stream<R>(reader: R) -> PullStream<'static>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    FramedRead::new(reader, LinesCodec::new())
        .filter_map(|line| async move {
            match line {
                Ok(line) if line.trim().is_empty() => None,
                Ok(line) => Some(serde_json::from_str::<PullStatus>(&line).map_err(|e| {
                    EngineError::Decode {
                        what: "pull status",
                        message: e.to_string(),
                    }
                })),
                Err(LinesCodecError::Io(e)) => Some(Err(EngineError::Io(e))),
                Err(e) => Some(Err(EngineError::Decode {
                    what: "pull status",
                    message: e.to_string(),
                })),
            }
        })
        .boxed()
}
