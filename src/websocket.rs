//! # Listen Feed Socket
//!
//! Client side of the remote call's live audio feed. The remote API streams one
//! binary WebSocket message per audio chunk (16-bit little-endian PCM); anything
//! else on the socket is informational.
//!
//! The pump below is the only reader of the socket. It forwards frames to the
//! playback sink in arrival order and returns as soon as the socket ends or the
//! owning session asks it to shut down.

use crate::audio::convert;
use crate::audio::playback::PlaybackSink;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub type FeedStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Why the pump stopped reading.
#[derive(Debug)]
pub enum FeedEnd {
    /// The session requested shutdown; carries the result of closing the socket.
    Shutdown(Result<(), tungstenite::Error>),
    /// The remote end closed the socket.
    RemoteClosed,
    /// The socket failed with a transport error.
    Failed(String),
}

/// Open the socket for a listen URL (`ws://` or `wss://`).
pub async fn connect(listen_url: &str) -> Result<FeedStream, tungstenite::Error> {
    let (stream, _response) = connect_async(listen_url).await?;
    info!("WebSocket connection opened: {}", listen_url);
    Ok(stream)
}

/// Read the feed until it ends or `shutdown` fires.
pub async fn pump(
    mut stream: FeedStream,
    sink: PlaybackSink,
    mut shutdown: oneshot::Receiver<()>,
    session_id: Uuid,
) -> FeedEnd {
    let mut frames = 0u64;

    loop {
        tokio::select! {
            // A dropped sender counts as a shutdown request too.
            _ = &mut shutdown => {
                let result = stream.close(None).await;
                debug!(%session_id, frames, "Listen feed shut down");
                return FeedEnd::Shutdown(result);
            }
            message = stream.next() => match message {
                Some(Ok(Message::Binary(data))) => {
                    if forward_frame(&data, &sink, session_id) {
                        frames += 1;
                    }
                }
                Some(Ok(Message::Text(text))) => {
                    info!(%session_id, "Non-audio message received: {}", text);
                }
                Some(Ok(Message::Close(frame))) => {
                    info!(%session_id, frames, "WebSocket connection closed: {:?}", frame);
                    return FeedEnd::RemoteClosed;
                }
                Some(Ok(other)) => {
                    debug!(%session_id, "Ignoring control frame: {:?}", other);
                }
                Some(Err(e)) => {
                    warn!(%session_id, "WebSocket error: {}", e);
                    return FeedEnd::Failed(e.to_string());
                }
                None => {
                    info!(%session_id, frames, "WebSocket stream ended");
                    return FeedEnd::RemoteClosed;
                }
            }
        }
    }
}

/// Convert one binary message and hand it to the sink. Returns whether a
/// buffer was forwarded.
fn forward_frame(data: &[u8], sink: &PlaybackSink, session_id: Uuid) -> bool {
    if data.is_empty() {
        debug!(%session_id, "Skipping empty audio frame");
        return false;
    }

    match convert::frame_to_float(data) {
        Ok(samples) => match sink.play(samples) {
            Ok(()) => true,
            Err(e) => {
                warn!(%session_id, "Playback sink rejected frame: {}", e);
                false
            }
        },
        Err(e) => {
            warn!(%session_id, "Dropping audio frame: {}", e);
            false
        }
    }
}
