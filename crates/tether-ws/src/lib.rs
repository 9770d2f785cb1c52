//! WebSocket transport for the tether client
//!
//! Implements the runtime's [`TransportConnector`] over `tokio-tungstenite`.
//! Text frames map one-to-one onto transport frames; ping/pong and binary
//! traffic is handled below this layer or skipped.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;
use url::Url;

use tether_core::TransportError;
use tether_runtime::{TransportConnector, TransportEvent, TransportLink};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ----------------------------------------------------------------------------
// Connector
// ----------------------------------------------------------------------------

/// Opens WebSocket links for `ws://` and `wss://` endpoints
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TransportConnector for WsConnector {
    async fn open(&self, url: &str) -> Result<Box<dyn TransportLink>, TransportError> {
        // Early structural validation; handshake failures come back as Open
        Url::parse(url).map_err(|err| TransportError::InvalidUrl {
            url: url.to_string(),
            reason: err.to_string(),
        })?;

        let (stream, _response) =
            connect_async(url)
                .await
                .map_err(|err| TransportError::Open {
                    url: url.to_string(),
                    reason: err.to_string(),
                })?;

        debug!(url, "websocket open");

        let (sink, stream) = stream.split();
        Ok(Box::new(WsLink { sink, stream }))
    }
}

// ----------------------------------------------------------------------------
// Link
// ----------------------------------------------------------------------------

/// One open WebSocket
struct WsLink {
    sink: SplitSink<WsStream, WsMessage>,
    stream: SplitStream<WsStream>,
}

#[async_trait]
impl TransportLink for WsLink {
    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        self.sink
            .send(WsMessage::Text(frame))
            .await
            .map_err(|err| TransportError::Send {
                reason: err.to_string(),
            })
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        loop {
            match self.stream.next().await {
                None => return None,
                Some(Err(err)) => {
                    return Some(TransportEvent::Closed {
                        reason: Some(err.to_string()),
                    })
                }
                Some(Ok(WsMessage::Text(text))) => return Some(TransportEvent::Frame(text)),
                Some(Ok(WsMessage::Close(close_frame))) => {
                    return Some(TransportEvent::Closed {
                        reason: close_frame.map(|frame| frame.reason.to_string()),
                    })
                }
                Some(Ok(WsMessage::Binary(_))) => {
                    debug!("skipping binary frame");
                }
                // Keepalive traffic is answered by tungstenite itself
                Some(Ok(_)) => {}
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.sink.send(WsMessage::Close(None)).await;
        let _ = self.sink.close().await;
    }
}
