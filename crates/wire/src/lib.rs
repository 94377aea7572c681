//! Messages and newline-delimited JSON framing shared by the ingest server and client.
//!
//! Every RPC runs on its own connection. The client sends a [`Call`] frame;
//! unary calls get one [`Reply`], streaming calls then exchange [`Batch`]
//! frames for [`Reply::Ack`] frames until the client closes its write half,
//! and the server finishes with a [`Reply::Status`].

mod message;

pub use message::*;

use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};

/// Large enough for a batch of certificates.
pub const MAX_FRAME: usize = 64 * 1024 * 1024;

pub type Transport<T> = Framed<T, LinesCodec>;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("framing: {0}")]
    Codec(#[from] LinesCodecError),
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("connection closed")]
    Closed,
    #[error("unexpected reply: {0}")]
    Unexpected(String),
    #[error("{code}: {message}")]
    Status { code: Code, message: String },
}

pub fn framed<T: AsyncRead + AsyncWrite>(io: T) -> Transport<T> {
    Framed::new(io, LinesCodec::new_with_max_length(MAX_FRAME))
}

pub async fn send<S, M>(sink: &mut S, msg: &M) -> Result<(), WireError>
where
    S: Sink<String, Error = LinesCodecError> + Unpin,
    M: Serialize,
{
    let line = serde_json::to_string(msg)?;
    sink.send(line).await?;
    Ok(())
}

/// Next frame, skipping blank lines; `None` at end of stream.
pub async fn recv<S, M>(stream: &mut S) -> Result<Option<M>, WireError>
where
    S: Stream<Item = Result<String, LinesCodecError>> + Unpin,
    M: DeserializeOwned,
{
    while let Some(line) = stream.next().await {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        return Ok(Some(serde_json::from_str(trimmed)?));
    }
    Ok(None)
}

/// Turn a final status frame into a result.
pub fn expect_ok(reply: Reply) -> Result<(), WireError> {
    match reply {
        Reply::Status { code: Code::Ok, .. } => Ok(()),
        Reply::Status { code, message } => Err(WireError::Status { code, message }),
        other => Err(WireError::Unexpected(format!("{other:?}"))),
    }
}
