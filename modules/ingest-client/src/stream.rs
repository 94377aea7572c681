use collector_core::window::WindowSemaphore;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::codec::LinesCodecError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use wire::{Batch, Metadata, Reply, StreamEntry, Transport, WireError};

use crate::{ClientError, Result};

/// Ack counts of a finished stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSummary {
    pub acked: usize,
    pub failed: usize,
}

struct Outbound<E, T> {
    sink: SplitSink<Transport<T>, String>,
    buffer: Vec<E>,
}

impl<E, T> Outbound<E, T>
where
    E: StreamEntry,
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let batch = Batch { entries: std::mem::take(&mut self.buffer) };
        debug!(entries = batch.len(), "sending batch");
        wire::send(&mut self.sink, &batch).await?;
        Ok(())
    }
}

struct Drained {
    summary: StreamSummary,
    status: std::result::Result<(), WireError>,
}

/// Client half of a streaming call.
///
/// Each [`send`](BufferedStream::send) takes one unit of the window and every
/// server ack gives one back, so at most `window` entries are ever
/// unacknowledged. Entries go out in batches of `batch_size`.
pub struct BufferedStream<E, T = TcpStream> {
    out: Mutex<Outbound<E, T>>,
    window: WindowSemaphore,
    drainer: Option<JoinHandle<Drained>>,
    batch_size: usize,
}

impl<E, T> BufferedStream<E, T>
where
    E: StreamEntry,
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Open the streaming call for `E` on `io`.
    pub async fn open(io: T, muid: &str, batch_size: usize, window: usize) -> Result<Self> {
        let (mut sink, stream) = wire::framed(io).split();
        wire::send(&mut sink, &E::open(Metadata::muid(muid))).await?;
        let window = WindowSemaphore::new(window);
        debug!(%muid, batch_size, window = window.capacity(), "stream opened");
        let drainer = tokio::spawn(drain(stream, window.clone()));
        let batch_size = batch_size.max(1);
        Ok(BufferedStream {
            out: Mutex::new(Outbound { sink, buffer: Vec::with_capacity(batch_size) }),
            window,
            drainer: Some(drainer),
            batch_size,
        })
    }

    /// Queue one entry, waiting while the window is exhausted.
    pub async fn send(&self, entry: E) -> Result<()> {
        // a window smaller than a batch would otherwise wait on acks for
        // entries still sitting in the buffer
        if !self.window.try_acquire().map_err(|_| ClientError::Closed)? {
            self.out.lock().await.flush().await?;
            self.window.acquire().await.map_err(|_| ClientError::Closed)?;
        }
        let mut out = self.out.lock().await;
        out.buffer.push(entry);
        if out.buffer.len() >= self.batch_size {
            out.flush().await?;
        }
        Ok(())
    }

    /// Send whatever is buffered without waiting for a full batch.
    pub async fn flush(&self) -> Result<()> {
        self.out.lock().await.flush().await
    }

    /// Entries sent or buffered but not yet acknowledged.
    pub fn in_flight(&self) -> usize {
        self.window.in_flight()
    }

    /// Flush, close the sending direction and wait for the server to finish
    /// acknowledging, or for `ctx` to be cancelled.
    pub async fn close_send(mut self, ctx: &CancellationToken) -> Result<StreamSummary> {
        let out = self.out.get_mut();
        out.flush().await?;
        match out.sink.close().await {
            Ok(()) => {}
            // the server may already have hung up; its final status is with the drainer
            Err(LinesCodecError::Io(e)) if is_disconnect(&e) => debug!(error = %e, "peer closed first"),
            Err(e) => return Err(WireError::from(e).into()),
        }
        let Some(mut drainer) = self.drainer.take() else {
            return Err(ClientError::Closed);
        };
        tokio::select! {
            _ = ctx.cancelled() => {
                drainer.abort();
                self.window.close();
                Err(ClientError::Cancelled)
            }
            drained = &mut drainer => {
                let drained = drained?;
                drained.status?;
                Ok(drained.summary)
            }
        }
    }
}

impl<E, T> Drop for BufferedStream<E, T> {
    fn drop(&mut self) {
        if let Some(drainer) = self.drainer.take() {
            drainer.abort();
        }
    }
}

/// Consume acks until the server's final status or the connection goes away.
async fn drain<T>(mut stream: SplitStream<Transport<T>>, window: WindowSemaphore) -> Drained
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    let mut summary = StreamSummary::default();
    let status = loop {
        match wire::recv::<_, Reply>(&mut stream).await {
            Ok(Some(Reply::Ack { ok: true, .. })) => {
                summary.acked += 1;
                window.release();
            }
            Ok(Some(Reply::Ack { ok: false, error })) => {
                summary.failed += 1;
                warn!(%error, "entry rejected");
                window.release();
            }
            Ok(Some(reply @ Reply::Status { .. })) => break wire::expect_ok(reply),
            Ok(Some(other)) => break Err(WireError::Unexpected(format!("{other:?}"))),
            Ok(None) => {
                debug!("stream closed by server");
                break Ok(());
            }
            Err(WireError::Codec(LinesCodecError::Io(e))) if is_disconnect(&e) => {
                debug!(error = %e, "connection closed");
                break Ok(());
            }
            Err(e) => break Err(e),
        }
    };
    if let Err(e) = &status {
        warn!(error = %e, acked = summary.acked, failed = summary.failed, "stream ended with error");
    }
    window.close();
    Drained { summary, status }
}

fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
    )
}
