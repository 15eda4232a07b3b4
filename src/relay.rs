//! Bidirectional relay between the client and the destination.
//!
//! The client->destination copy runs in its own task, the destination->client
//! copy runs in the caller. End-of-stream on one side is passed on as a write
//! shutdown of the other side. Once the destination->client direction is
//! done, or either direction fails, the forward task is cancelled and awaited
//! so both streams are closed by the time `relay` returns.

use std::io;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, copy, split};
use tracing::debug;

/// Byte counts of a finished relay. `from_client` is `None` when the
/// client->destination copy was cut short by the other direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub from_client: Option<u64>,
    pub from_server: u64,
}

/// copy_half copies until `reader` hits EOF, then shuts `writer` down
async fn copy_half<R, W>(reader: &mut R, writer: &mut W) -> io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let n = copy(reader, writer).await?;
    writer.shutdown().await?;
    Ok(n)
}

pub async fn relay<C, D>(client: C, destination: D) -> io::Result<RelayStats>
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    D: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut client_read, mut client_write) = split(client);
    let (mut dest_read, mut dest_write) = split(destination);

    let mut forward =
        tokio::spawn(async move { copy_half(&mut client_read, &mut dest_write).await });

    let reverse = copy_half(&mut dest_read, &mut client_write);
    tokio::pin!(reverse);

    tokio::select! {
        result = &mut reverse => {
            forward.abort();
            // Wait for the cancelled task to drop its halves
            let from_client = match (&mut forward).await {
                Ok(Ok(n)) => Some(n),
                _ => None,
            };
            let from_server = result?;
            debug!("destination finished first: {} bytes to client", from_server);
            Ok(RelayStats { from_client, from_server })
        }
        joined = &mut forward => {
            let from_client = joined.map_err(io::Error::other)??;
            debug!("client finished first: {} bytes to destination", from_client);
            let from_server = reverse.await?;
            Ok(RelayStats { from_client: Some(from_client), from_server })
        }
    }
}
