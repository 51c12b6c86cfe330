//! TCP acceptor. One task per connection, one request per connection.

use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use anyhow::{Context, Result};
use shared::codec::{read_frame, FramingError, DEFAULT_FRAME_LIMIT};
use crate::dispatch::Dispatcher;

/// Pause after a failed accept so a persistent error (EMFILE) does not spin
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))
}

/// Accept until `cancel` fires. Connections already accepted finish on their own.
pub async fn serve(
    listener: TcpListener,
    dispatcher: Dispatcher,
    io_timeout: Duration,
    cancel: CancellationToken,
) -> Result<()> {
    tracing::info!("Waiting for workstation connections...");

    loop {
        let (stream, peer) = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::error!("Accept failed: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            },
        };

        tracing::info!("Workstation connection from {}", peer);
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            handle_connection(stream, peer, dispatcher, io_timeout).await;
            tracing::info!("Workstation connection closed: {}", peer);
        });
    }

    tracing::info!("Acceptor stopped");
    Ok(())
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    dispatcher: Dispatcher,
    io_timeout: Duration,
) {
    let frame = match tokio::time::timeout(io_timeout, read_frame(&mut stream, DEFAULT_FRAME_LIMIT)).await {
        Ok(Ok(frame)) => frame,
        Ok(Err(FramingError::Closed)) => {
            tracing::debug!("{} closed without sending a command", peer);
            return;
        }
        Ok(Err(e)) => {
            tracing::warn!("Error handling workstation {}: {}", peer, e);
            return;
        }
        Err(_) => {
            tracing::warn!("Workstation {} sent no complete command within {:?}", peer, io_timeout);
            return;
        }
    };

    let document = match frame.into_document() {
        Ok(document) => document,
        Err(e) => {
            tracing::warn!("Error handling workstation {}: {}", peer, e);
            return;
        }
    };

    let outcome = dispatcher.handle(&document).await;
    tracing::info!(
        "Received command from {}: {}",
        peer,
        outcome.action.as_deref().unwrap_or("unknown")
    );

    let bytes = outcome.reply.to_bytes();
    if !outcome.wait_for_response || bytes.is_empty() {
        tracing::info!("No response sent to {}", peer);
        return;
    }

    match tokio::time::timeout(io_timeout, stream.write_all(&bytes)).await {
        Ok(Ok(())) => {
            let _ = stream.shutdown().await;
            tracing::info!("Sent response to {} ({} bytes)", peer, bytes.len());
        }
        Ok(Err(e)) => tracing::warn!("Failed to send response to {}: {}", peer, e),
        Err(_) => tracing::warn!("Timed out sending response to {}", peer),
    }
}
