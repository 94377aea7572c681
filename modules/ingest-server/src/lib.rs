//! Ingest RPC server: one connection per call, unary measurement/stage calls
//! and four streaming observation calls with per-entry acknowledgements.

mod entry;

pub use entry::Ingest;

use collector_core::timestamp::ComponentRange;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use ingest::{Store, StoreError};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use wire::{Batch, Call, Code, EntradaEntry, LogEntry, Metadata, PassiveEntry, Reply, Transport, WireError, ZoneEntry};

/// Acks queued between the store and the connection writer.
const ACK_QUEUE: usize = 1024;

#[derive(Debug, Error)]
pub enum ServeError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("timestamp out of range: {0}")]
    Timestamp(#[from] ComponentRange),
    #[error("assertion failure: {0}")]
    Assertion(String),
    #[error("store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error(transparent)]
    Wire(#[from] WireError),
}

impl ServeError {
    /// Whether the stream may continue after acking this error.
    pub fn is_entry_error(&self) -> bool {
        match self {
            ServeError::Store(e) => e.is_entry_error(),
            ServeError::Timestamp(_) => true,
            _ => false,
        }
    }

    pub fn code(&self) -> Code {
        match self {
            ServeError::Store(StoreError::MissingMeasurementId) => Code::InvalidArgument,
            ServeError::Store(StoreError::Cancelled) => Code::Cancelled,
            _ => Code::Internal,
        }
    }

    fn reply(&self) -> Reply {
        Reply::status(self.code(), self.to_string())
    }
}

/// Accept connections until `shutdown` fires. Each connection serves one call.
pub async fn serve(listener: TcpListener, store: Arc<Store>, shutdown: CancellationToken) -> anyhow::Result<()> {
    info!(addr = %listener.local_addr()?, "ingest server listening");
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!("ingest server shutting down");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((sock, peer)) => {
                    let store = store.clone();
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        debug!(%peer, "client connected");
                        if let Err(e) = serve_connection(sock, store, shutdown).await {
                            warn!(%peer, error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) => error!(error = %e, "accept failed"),
            }
        }
    }
    Ok(())
}

/// Serve the single call carried by `io`.
pub async fn serve_connection<T>(io: T, store: Arc<Store>, shutdown: CancellationToken) -> Result<(), WireError>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut sink, mut stream) = wire::framed(io).split();
    let call: Call = match wire::recv(&mut stream).await {
        Ok(Some(call)) => call,
        Ok(None) => return Ok(()),
        Err(e) => {
            wire::send(&mut sink, &Reply::status(Code::InvalidArgument, e.to_string())).await?;
            return Err(e);
        }
    };
    let ctx = shutdown.child_token();
    debug!(method = call.method(), "call");

    match call {
        Call::StartMeasurement { description, host } => {
            let reply = unary(&store, &ctx, move |s, ctx| {
                s.start_measurement(ctx, &description, &host).map(|muid| Reply::Muid { muid })
            })
            .await;
            wire::send(&mut sink, &reply).await
        }
        Call::StopMeasurement { muid } => {
            let reply = unary(&store, &ctx, move |s, ctx| s.stop_measurement(ctx, &muid).map(|_| Reply::ok())).await;
            wire::send(&mut sink, &reply).await
        }
        Call::StartStage { muid } => {
            let reply = unary(&store, &ctx, move |s, ctx| s.start_stage(ctx, &muid).map(|_| Reply::ok())).await;
            wire::send(&mut sink, &reply).await
        }
        Call::StopStage { muid } => {
            let reply = unary(&store, &ctx, move |s, ctx| s.stop_stage(ctx, &muid).map(|_| Reply::ok())).await;
            wire::send(&mut sink, &reply).await
        }
        Call::StoreLogEntries { metadata } => entries::<LogEntry, T>(sink, stream, store, ctx, metadata).await,
        Call::StorePassiveEntry { metadata } => entries::<PassiveEntry, T>(sink, stream, store, ctx, metadata).await,
        Call::StoreEntradaEntry { metadata } => entries::<EntradaEntry, T>(sink, stream, store, ctx, metadata).await,
        Call::StoreZoneEntry { metadata } => entries::<ZoneEntry, T>(sink, stream, store, ctx, metadata).await,
    }
}

/// Run a store call off the async workers; the store lock may be held across a commit.
async fn unary<F>(store: &Arc<Store>, ctx: &CancellationToken, f: F) -> Reply
where
    F: FnOnce(&Store, &CancellationToken) -> Result<Reply, StoreError> + Send + 'static,
{
    let store = store.clone();
    let ctx = ctx.clone();
    match tokio::task::spawn_blocking(move || f(&store, &ctx)).await {
        Ok(Ok(reply)) => reply,
        Ok(Err(e)) => {
            warn!(error = %e, "call failed");
            ServeError::from(e).reply()
        }
        Err(e) => ServeError::from(e).reply(),
    }
}

async fn entries<E, T>(
    mut sink: SplitSink<Transport<T>, String>,
    mut stream: SplitStream<Transport<T>>,
    store: Arc<Store>,
    ctx: CancellationToken,
    metadata: Metadata,
) -> Result<(), WireError>
where
    E: Ingest,
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    let Some(muid) = metadata.muid.filter(|m| !m.is_empty()) else {
        warn!("stream opened without a measurement id");
        let e = ServeError::Store(StoreError::MissingMeasurementId);
        return wire::send(&mut sink, &e.reply()).await;
    };
    let active = {
        let store = store.clone();
        let muid = muid.clone();
        tokio::task::spawn_blocking(move || store.is_active(&muid)).await
    };
    match active {
        Ok(Ok(true)) => {}
        Ok(Ok(false)) => {
            let e = ServeError::Store(StoreError::NoActiveMeasurement(muid));
            return wire::send(&mut sink, &e.reply()).await;
        }
        Ok(Err(e)) => return wire::send(&mut sink, &ServeError::from(e).reply()).await,
        Err(e) => return wire::send(&mut sink, &ServeError::from(e).reply()).await,
    }

    let (tx, rx) = mpsc::channel(ACK_QUEUE);
    let writer = tokio::spawn(write_replies(sink, rx, ctx.clone()));

    let outcome = match read_batches::<E, T>(&mut stream, &store, &ctx, &muid, &tx).await {
        Ok(n) => {
            let store = store.clone();
            let flush_ctx = ctx.clone();
            match tokio::task::spawn_blocking(move || store.flush(&flush_ctx)).await {
                Ok(Ok(())) => {
                    debug!(%muid, entries = n, "stream finished");
                    Reply::ok()
                }
                Ok(Err(e)) => ServeError::from(e).reply(),
                Err(e) => ServeError::from(e).reply(),
            }
        }
        Err(e) => {
            warn!(%muid, error = %e, "stream aborted");
            e.reply()
        }
    };
    // the writer may already be gone if the client hung up
    let _ = tx.send(outcome).await;
    drop(tx);
    writer.await.map_err(|e| WireError::Io(std::io::Error::other(e)))?
}

/// Feed every batch through the store in arrival order. Returns the number of
/// entries processed once the client closes its side.
async fn read_batches<E, T>(
    stream: &mut SplitStream<Transport<T>>,
    store: &Arc<Store>,
    ctx: &CancellationToken,
    muid: &str,
    acks: &mpsc::Sender<Reply>,
) -> Result<usize, ServeError>
where
    E: Ingest,
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    let mut total = 0;
    loop {
        let batch: Batch<E> = tokio::select! {
            _ = ctx.cancelled() => return Err(StoreError::Cancelled.into()),
            next = wire::recv::<_, Batch<E>>(stream) => match next {
                Ok(Some(batch)) => batch,
                Ok(None) => return Ok(total),
                Err(WireError::Json(e)) => return Err(ServeError::Assertion(e.to_string())),
                Err(e) => return Err(e.into()),
            },
        };
        total += batch.len();
        let store = store.clone();
        let ctx = ctx.clone();
        let muid = muid.to_string();
        let acks = acks.clone();
        tokio::task::spawn_blocking(move || -> Result<(), ServeError> {
            for entry in batch.entries {
                match entry.ingest(&store, &ctx, &muid) {
                    Ok(()) => send_ack(&acks, Reply::ack::<String>(Ok(())))?,
                    Err(e) if e.is_entry_error() => {
                        debug!(error = %e, "entry rejected");
                        send_ack(&acks, Reply::ack(Err(&e)))?;
                    }
                    Err(e) => {
                        send_ack(&acks, Reply::ack(Err(&e)))?;
                        return Err(e);
                    }
                }
            }
            Ok(())
        })
        .await??;
    }
}

fn send_ack(acks: &mpsc::Sender<Reply>, reply: Reply) -> Result<(), ServeError> {
    acks.blocking_send(reply).map_err(|_| ServeError::Store(StoreError::Cancelled))
}

/// Sole owner of the write half. A failed write means the client is gone:
/// the call's token is cancelled so in-flight work stops.
async fn write_replies<T>(
    mut sink: SplitSink<Transport<T>, String>,
    mut rx: mpsc::Receiver<Reply>,
    ctx: CancellationToken,
) -> Result<(), WireError>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    while let Some(reply) = rx.recv().await {
        if let Err(e) = wire::send(&mut sink, &reply).await {
            ctx.cancel();
            return Err(e);
        }
    }
    sink.close().await?;
    Ok(())
}
