//! Client side of the ingest RPCs. Every call opens its own connection;
//! streaming calls hand back a [`BufferedStream`] that batches entries and
//! bounds the number of unacknowledged ones.

mod stream;

pub use stream::{BufferedStream, StreamSummary};

use thiserror::Error;
use tokio::net::TcpStream;
use tracing::debug;
use wire::{Call, EntradaEntry, LogEntry, PassiveEntry, Reply, StreamEntry, WireError, ZoneEntry};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("stream is closed")]
    Closed,
    #[error("ack drainer failed: {0}")]
    Drainer(#[from] tokio::task::JoinError),
    #[error("cancelled")]
    Cancelled,
}

pub type Result<T, E = ClientError> = std::result::Result<T, E>;

#[derive(Debug, Clone)]
pub struct Client {
    addr: String,
}

impl Client {
    pub fn new(addr: impl Into<String>) -> Self {
        Client { addr: addr.into() }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn connect(&self) -> Result<TcpStream> {
        let sock = TcpStream::connect(&self.addr)
            .await
            .map_err(|source| ClientError::Connect { addr: self.addr.clone(), source })?;
        sock.set_nodelay(true).map_err(WireError::from)?;
        Ok(sock)
    }

    async fn unary(&self, call: Call) -> Result<Reply> {
        debug!(method = call.method(), addr = %self.addr, "call");
        let mut transport = wire::framed(self.connect().await?);
        wire::send(&mut transport, &call).await?;
        Ok(wire::recv(&mut transport).await?.ok_or(WireError::Closed)?)
    }

    /// Returns the new measurement's muid.
    pub async fn start_measurement(&self, description: &str, host: &str) -> Result<String> {
        let call = Call::StartMeasurement { description: description.into(), host: host.into() };
        match self.unary(call).await? {
            Reply::Muid { muid } => Ok(muid),
            other => {
                wire::expect_ok(other)?;
                Err(WireError::Unexpected("status without muid".into()).into())
            }
        }
    }

    pub async fn stop_measurement(&self, muid: &str) -> Result<()> {
        Ok(wire::expect_ok(self.unary(Call::StopMeasurement { muid: muid.into() }).await?)?)
    }

    pub async fn start_stage(&self, muid: &str) -> Result<()> {
        Ok(wire::expect_ok(self.unary(Call::StartStage { muid: muid.into() }).await?)?)
    }

    pub async fn stop_stage(&self, muid: &str) -> Result<()> {
        Ok(wire::expect_ok(self.unary(Call::StopStage { muid: muid.into() }).await?)?)
    }

    pub async fn log_entries(&self, muid: &str, batch_size: usize, window: usize) -> Result<BufferedStream<LogEntry>> {
        self.open(muid, batch_size, window).await
    }

    pub async fn passive_entries(
        &self,
        muid: &str,
        batch_size: usize,
        window: usize,
    ) -> Result<BufferedStream<PassiveEntry>> {
        self.open(muid, batch_size, window).await
    }

    pub async fn entrada_entries(
        &self,
        muid: &str,
        batch_size: usize,
        window: usize,
    ) -> Result<BufferedStream<EntradaEntry>> {
        self.open(muid, batch_size, window).await
    }

    pub async fn zone_entries(&self, muid: &str, batch_size: usize, window: usize) -> Result<BufferedStream<ZoneEntry>> {
        self.open(muid, batch_size, window).await
    }

    async fn open<E: StreamEntry>(&self, muid: &str, batch_size: usize, window: usize) -> Result<BufferedStream<E>> {
        BufferedStream::open(self.connect().await?, muid, batch_size, window).await
    }
}
