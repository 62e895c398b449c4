// =============================================================================
// Exchange WebSocket transport (§4.1, §6)
// =============================================================================
//
// A thin connect/send/parse layer. The reconnect loop and subscription-set
// bookkeeping live with their owning component (the fill stream, §4.8) —
// this module only knows how to open a socket, serialize `WsRequest`
// frames, and deserialize inbound frames into `WsEnvelope`. Keeping state
// ownership with the caller avoids races between resubscribe and incoming
// messages (§9 design notes).
// =============================================================================

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::errors::ExchangeError;
use crate::exchange::models::{WsEnvelope, WsRequest};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Open a connection to the exchange's subscription WebSocket.
pub async fn connect(url: &str) -> Result<WsStream, ExchangeError> {
    let (stream, _response) = connect_async(url)
        .await
        .map_err(|e| ExchangeError::Transport(e.to_string()))?;
    Ok(stream)
}

/// Send a single subscribe/unsubscribe/ping frame.
pub async fn send(stream: &mut WsStream, request: &WsRequest) -> Result<(), ExchangeError> {
    let text = serde_json::to_string(request)
        .map_err(|e| ExchangeError::MalformedResponse(e.to_string()))?;
    stream
        .send(Message::Text(text))
        .await
        .map_err(|e| ExchangeError::Transport(e.to_string()))
}

/// Read and parse the next data frame, skipping pings/pongs/close frames
/// (returns `Ok(None)` for those, letting the caller's loop just continue).
pub async fn next_envelope(stream: &mut WsStream) -> Result<Option<WsEnvelope>, ExchangeError> {
    match stream.next().await {
        Some(Ok(Message::Text(text))) => match serde_json::from_str::<WsEnvelope>(&text) {
            Ok(envelope) => Ok(Some(envelope)),
            Err(e) => {
                debug!(error = %e, "non-envelope WS frame, skipping");
                Ok(None)
            }
        },
        Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => Ok(None),
        Some(Ok(Message::Close(_))) => Err(ExchangeError::Transport("connection closed".into())),
        Some(Ok(_)) => Ok(None),
        Some(Err(e)) => Err(ExchangeError::Transport(e.to_string())),
        None => Err(ExchangeError::Transport("stream ended".into())),
    }
}
