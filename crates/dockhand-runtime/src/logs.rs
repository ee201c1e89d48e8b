//! Demultiplexing of a container's combined log stream.
//!
//! A [`LogHandle`] owns the tagged stream returned by the engine. Each
//! accessor spawns one task that reads the stream once and writes the
//! selected channels into bounded in-memory pipes; a slow reader stalls
//! the task instead of growing a buffer.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use std::task::{Context, Poll};

use dockhand_common::constants::LOG_PIPE_CAPACITY;
use dockhand_engine::frame::decode_log_stream;
use dockhand_engine::{LogChunk, LogStream};
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::error::LogError;

/// Which channels a pass forwards, and where.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Stdout,
    Stderr,
    Combined,
    Separated,
}

/// The combined output of one container run.
///
/// The underlying stream can be read once: the first accessor takes it
/// and any later accessor returns an empty reader. Use
/// [`LogHandle::separated`] to get both channels.
///
/// Closing or dropping the handle releases the stream, stopping a pass
/// that is still running; its readers then see the end of output.
///
/// Accessors spawn a task and must be called from within a tokio runtime.
pub struct LogHandle {
    origin: String,
    source: Mutex<Option<LogStream>>,
    diagnostics: Option<UnboundedSender<LogError>>,
    stop: CancellationToken,
}

impl fmt::Debug for LogHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogHandle")
            .field("origin", &self.origin)
            .field("consumed", &self.is_consumed())
            .finish_non_exhaustive()
    }
}

impl LogHandle {
    /// Wraps a decoded log stream belonging to `origin`.
    #[must_use]
    pub fn from_stream(origin: impl Into<String>, stream: LogStream) -> Self {
        Self {
            origin: origin.into(),
            source: Mutex::new(Some(stream)),
            diagnostics: None,
            stop: CancellationToken::new(),
        }
    }

    /// Wraps a raw multiplexed byte stream as produced by the engine's
    /// log endpoint.
    #[must_use]
    pub fn from_raw<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self::from_stream("raw stream", decode_log_stream(reader))
    }

    /// Sends stream failures to `tx` in addition to logging them.
    #[must_use]
    pub fn with_diagnostics(mut self, tx: UnboundedSender<LogError>) -> Self {
        self.diagnostics = Some(tx);
        self
    }

    /// Returns whether an accessor has taken the stream or it was closed.
    #[must_use]
    pub fn is_consumed(&self) -> bool {
        self.source
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Returns a reader of the standard output chunks only.
    #[must_use]
    pub fn stdout(&self) -> LogReader {
        self.single(Route::Stdout)
    }

    /// Returns a reader of the standard error chunks only.
    #[must_use]
    pub fn stderr(&self) -> LogReader {
        self.single(Route::Stderr)
    }

    /// Returns a reader of both channels in arrival order.
    #[must_use]
    pub fn combined(&self) -> LogReader {
        self.single(Route::Combined)
    }

    /// Returns `(stdout, stderr)` readers fed from a single pass.
    ///
    /// Both readers must be drained concurrently: a full pipe on one side
    /// stalls the other.
    #[must_use]
    pub fn separated(&self) -> (LogReader, LogReader) {
        let (out_reader, out_writer) = pipe();
        let (err_reader, err_writer) = pipe();
        if let Some(source) = self.take(Route::Separated) {
            self.spawn(source, Route::Separated, Some(out_writer), Some(err_writer));
        }
        (out_reader, err_reader)
    }

    /// Releases the stream. A pass started by an accessor stops reading
    /// and closes its pipes. Safe to call more than once.
    pub fn close(&self) {
        self.stop.cancel();
        let released = self
            .source
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some();
        if released {
            tracing::debug!(origin = %self.origin, "log stream closed unread");
        }
    }

    fn single(&self, route: Route) -> LogReader {
        let (reader, writer) = pipe();
        if let Some(source) = self.take(route) {
            self.spawn(source, route, Some(writer), None);
        }
        reader
    }

    fn take(&self, route: Route) -> Option<LogStream> {
        let source = self
            .source
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if source.is_none() {
            tracing::warn!(origin = %self.origin, ?route, "log stream already consumed");
            self.report(LogError::AlreadyConsumed {
                origin: self.origin.clone(),
            });
        }
        source
    }

    fn report(&self, error: LogError) {
        if let Some(tx) = &self.diagnostics {
            let _ = tx.send(error);
        }
    }

    fn spawn(
        &self,
        source: LogStream,
        route: Route,
        first: Option<DuplexStream>,
        second: Option<DuplexStream>,
    ) {
        let pass = Pass {
            origin: self.origin.clone(),
            route,
            first,
            second,
            diagnostics: self.diagnostics.clone(),
        };
        let _ = tokio::spawn(pass.run(source, self.stop.clone()));
    }
}

impl Drop for LogHandle {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

/// One read of the source stream into one or two pipes.
struct Pass {
    origin: String,
    route: Route,
    /// Stdout pipe, or the only pipe of a single-reader route.
    first: Option<DuplexStream>,
    /// Stderr pipe of a separated route.
    second: Option<DuplexStream>,
    diagnostics: Option<UnboundedSender<LogError>>,
}

impl Pass {
    fn sink(&mut self, chunk: &LogChunk) -> Option<&mut Option<DuplexStream>> {
        match (self.route, chunk.is_stderr()) {
            (Route::Stdout | Route::Separated, false)
            | (Route::Stderr, true)
            | (Route::Combined, _) => Some(&mut self.first),
            (Route::Separated, true) => Some(&mut self.second),
            (Route::Stdout, true) | (Route::Stderr, false) => None,
        }
    }

    fn is_abandoned(&self) -> bool {
        self.first.is_none() && self.second.is_none()
    }

    async fn run(mut self, mut source: LogStream, stop: CancellationToken) {
        let mut forwarded = 0_usize;
        loop {
            let item = tokio::select! {
                biased;
                () = stop.cancelled() => break,
                item = source.next() => item,
            };
            let Some(item) = item else {
                break;
            };
            let chunk = match item {
                Ok(chunk) => chunk,
                Err(e) => {
                    tracing::warn!(origin = %self.origin, error = %e, "log stream ended early");
                    if let Some(tx) = &self.diagnostics {
                        let _ = tx.send(LogError::Stream {
                            origin: self.origin.clone(),
                            source: e,
                        });
                    }
                    break;
                }
            };
            let Some(slot) = self.sink(&chunk) else {
                continue;
            };
            let Some(pipe) = slot.as_mut() else {
                continue;
            };
            let written = tokio::select! {
                biased;
                () = stop.cancelled() => break,
                written = pipe.write_all(chunk.bytes()) => written,
            };
            if written.is_err() {
                // Reader dropped.
                *slot = None;
                if self.is_abandoned() {
                    tracing::debug!(origin = %self.origin, "all log readers dropped");
                    break;
                }
                continue;
            }
            forwarded += chunk.bytes().len();
        }
        drop(source);
        tracing::debug!(
            origin = %self.origin,
            route = ?self.route,
            bytes = forwarded,
            released = stop.is_cancelled(),
            "log pass finished"
        );
        for pipe in [self.first.as_mut(), self.second.as_mut()].into_iter().flatten() {
            let _ = pipe.shutdown().await;
        }
    }
}

fn pipe() -> (LogReader, DuplexStream) {
    let (reader, writer) = tokio::io::duplex(LOG_PIPE_CAPACITY);
    (LogReader { inner: reader }, writer)
}

/// One demultiplexed channel of a [`LogHandle`].
///
/// Ends when the source stream ends, fails, or was already consumed.
#[derive(Debug)]
pub struct LogReader {
    inner: DuplexStream,
}

impl LogReader {
    /// Reads the rest of the channel as UTF-8 text.
    ///
    /// # Errors
    ///
    /// Returns an error if the output is not valid UTF-8.
    pub async fn read_to_string(&mut self) -> io::Result<String> {
        let mut text = String::new();
        let _ = AsyncReadExt::read_to_string(&mut self.inner, &mut text).await?;
        Ok(text)
    }

    /// Reads the rest of the channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the pipe cannot be read.
    pub async fn read_to_end(&mut self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        let _ = AsyncReadExt::read_to_end(&mut self.inner, &mut buf).await?;
        Ok(buf)
    }
}

impl AsyncRead for LogReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}
