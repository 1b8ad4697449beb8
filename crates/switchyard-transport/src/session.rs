//! Bridging one WebSocket to one broker peer.
//!
//! Inbound text frames go to the peer's `write` channel; everything the
//! broker delivers on `read` goes out as text frames. The two directions run
//! independently so a slow client never blocks delivery into the broker.

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use switchyard_core::{PeerChannels, PeerId};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tracing::{debug, warn};

/// Session errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The socket failed.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] axum::Error),

    /// The outbound task did not complete.
    #[error("Outbound task failed: {0}")]
    Task(#[from] JoinError),
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The client closed the socket.
    RemoteClosed,
    /// The broker removed the peer.
    BrokerClosed,
    /// The broker stopped taking the peer's messages.
    BrokerGone,
}

/// Run a session until either side goes away.
///
/// Dropping the peer's `write` channel on the way out is what tells the broker
/// the peer has left.
///
/// # Errors
///
/// Returns an error if the socket fails.
pub async fn bridge_session(
    socket: WebSocket,
    channels: PeerChannels,
) -> Result<SessionEnd, TransportError> {
    let PeerChannels { id, mut read, write } = channels;
    let (mut sink, mut stream) = socket.split();

    let mut outbound = tokio::spawn(async move {
        while let Some(msg) = read.recv().await {
            sink.send(Message::Text(msg)).await?;
        }
        // The client may already be gone; nothing left to report either way.
        let _ = sink.send(Message::Close(None)).await;
        Ok::<_, axum::Error>(())
    });

    let finished = tokio::select! {
        res = &mut outbound => Finished::Outbound(res),
        res = pump_inbound(id, &mut stream, &write) => Finished::Inbound(res),
    };
    drop(write);

    match finished {
        Finished::Outbound(res) => {
            debug!(peer = %id, "Broker closed peer");
            res??;
            Ok(SessionEnd::BrokerClosed)
        }
        Finished::Inbound(res) => {
            // The broker closes `read` once it sees `write` go away.
            if let Err(e) = outbound.await? {
                debug!(peer = %id, error = %e, "Outbound closed with error");
            }
            res
        }
    }
}

enum Finished {
    Outbound(Result<Result<(), axum::Error>, JoinError>),
    Inbound(Result<SessionEnd, TransportError>),
}

async fn pump_inbound(
    id: PeerId,
    stream: &mut SplitStream<WebSocket>,
    write: &mpsc::Sender<String>,
) -> Result<SessionEnd, TransportError> {
    while let Some(frame) = stream.next().await {
        let text = match frame? {
            Message::Text(text) => text,
            Message::Binary(data) => match String::from_utf8(data) {
                Ok(text) => text,
                Err(_) => {
                    warn!(peer = %id, "Dropping non UTF-8 binary frame");
                    continue;
                }
            },
            // Pongs are queued by the socket itself.
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(_) => {
                debug!(peer = %id, "Received close frame");
                return Ok(SessionEnd::RemoteClosed);
            }
        };

        if write.send(text).await.is_err() {
            return Ok(SessionEnd::BrokerGone);
        }
    }

    debug!(peer = %id, "WebSocket stream ended");
    Ok(SessionEnd::RemoteClosed)
}
