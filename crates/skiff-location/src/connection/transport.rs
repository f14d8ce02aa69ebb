//! Frame transports.
//!
//! A [`Transport`] is a pair of channels: client frames out, broker frames
//! in. The WebSocket transport pumps them through reader and writer tasks;
//! the in-memory transport hands the other ends to the caller, which plays
//! the broker.

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use skiff_proto::{BrokerFrame, ClientFrame};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::error::{LocationError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Duplex frame channel to a broker.
#[derive(Debug)]
pub struct Transport {
    pub(crate) outgoing: mpsc::UnboundedSender<ClientFrame>,
    pub(crate) incoming: mpsc::UnboundedReceiver<BrokerFrame>,
}

/// The broker's ends of an in-memory transport.
#[derive(Debug)]
pub struct BrokerSide {
    /// Frames sent by the client.
    pub incoming: mpsc::UnboundedReceiver<ClientFrame>,
    /// Frames to deliver to the client.
    pub outgoing: mpsc::UnboundedSender<BrokerFrame>,
}

impl BrokerSide {
    /// Next frame from the client, `None` once it hung up.
    pub async fn recv(&mut self) -> Option<ClientFrame> {
        self.incoming.recv().await
    }

    /// Deliver a frame to the client. Returns false once it hung up.
    pub fn send(&self, frame: BrokerFrame) -> bool {
        self.outgoing.send(frame).is_ok()
    }
}

impl Transport {
    /// Dial a broker over WebSocket.
    pub async fn websocket(url: &str) -> Result<Self> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| LocationError::Connection(format!("failed to connect to {url}: {e}")))?;
        debug!(url, "websocket connected");

        let (write, read) = ws_stream.split();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        tokio::spawn(reader_task(read, in_tx));
        tokio::spawn(writer_task(write, out_rx));

        Ok(Self {
            outgoing: out_tx,
            incoming: in_rx,
        })
    }

    /// A transport whose broker side is driven by the caller.
    #[must_use]
    pub fn memory() -> (Self, BrokerSide) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        (
            Self {
                outgoing: out_tx,
                incoming: in_rx,
            },
            BrokerSide {
                incoming: out_rx,
                outgoing: in_tx,
            },
        )
    }
}

async fn reader_task(mut read: SplitStream<WsStream>, tx: mpsc::UnboundedSender<BrokerFrame>) {
    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => match BrokerFrame::from_json(&text) {
                Ok(frame) => {
                    if tx.send(frame).is_err() {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "dropping undecodable broker frame"),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "websocket read failed");
                break;
            }
        }
    }
    debug!("websocket reader finished");
}

async fn writer_task(
    mut write: SplitSink<WsStream, Message>,
    mut rx: mpsc::UnboundedReceiver<ClientFrame>,
) {
    while let Some(frame) = rx.recv().await {
        let json = match frame.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "failed to encode client frame");
                continue;
            }
        };
        if let Err(e) = write.send(Message::Text(json)).await {
            warn!(error = %e, "websocket write failed");
            return;
        }
    }
    let _ = write.send(Message::Close(None)).await;
    debug!("websocket writer finished");
}
