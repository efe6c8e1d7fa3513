//! Bidirectional byte relay
//!
//! Once a tunnel is established the proxy has no further interest in the
//! byte stream: both directions are copied concurrently and the relay ends
//! on the first EOF or error in either direction. The other direction is
//! torn down with the connection.

use anyhow::Result;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

/// Copy bytes between a client and its upstream until either side finishes
///
/// EOF on either stream is normal termination.
pub async fn relay<A, B>(client: A, upstream: B) -> Result<()>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut upstream_read, mut upstream_write) = tokio::io::split(upstream);

    let to_upstream = tokio::io::copy(&mut client_read, &mut upstream_write);
    let to_client = tokio::io::copy(&mut upstream_read, &mut client_write);

    // Each direction signals completion; the first signal ends the relay.
    tokio::select! {
        result = to_upstream => match result {
            Ok(bytes) => debug!("client->upstream finished: {} bytes", bytes),
            Err(e) => debug!("client->upstream error: {}", e),
        },
        result = to_client => match result {
            Ok(bytes) => debug!("upstream->client finished: {} bytes", bytes),
            Err(e) => debug!("upstream->client error: {}", e),
        },
    }

    Ok(())
}
