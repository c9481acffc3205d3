//! The transport seam and its websocket implementation.
//!
//! The session talks to an abstract [`Transport`]: ready-state, buffered
//! bytes, text sends, and an inbound frame stream. The production
//! implementation wraps `tokio-tungstenite`; tests substitute their own.
//! Binary inbound frames are reserved and surface as a protocol error.

use crate::error::{LinkError, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Transport readiness, mirroring the websocket ready-state model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// One inbound event from the transport.
#[derive(Debug, Clone)]
pub enum Frame {
    Text(String),
    /// Binary frames are reserved; receiving one is a protocol error.
    Binary,
    /// The transport is gone.
    Closed,
}

/// A duplex framed-message transport.
#[async_trait]
pub trait Transport: Send + Sync {
    fn ready_state(&self) -> ReadyState;

    /// Bytes accepted for sending but not yet flushed to the wire.
    fn buffered_bytes(&self) -> usize;

    async fn send_text(&self, frame: String) -> Result<()>;

    fn close(&self);

    /// Take the inbound frame receiver. Available exactly once.
    fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<Frame>>;
}

/// Connects transports to hosts; the session owns one connector for the
/// lifetime of the client.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Arc<dyn Transport>>;
}

type WsSink = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

/// Production websocket transport.
pub struct WsTransport {
    writer: Mutex<WsSink>,
    state: Arc<AtomicU8>,
    buffered: Arc<AtomicUsize>,
    inbound: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<Frame>>>,
}

const STATE_OPEN: u8 = 1;
const STATE_CLOSING: u8 = 2;
const STATE_CLOSED: u8 = 3;

impl WsTransport {
    async fn connect(url: &str) -> Result<Arc<dyn Transport>> {
        log::debug!("[trellis-link] Connecting websocket to {}", url);
        let (stream, _response) = connect_async(url).await?;
        let (writer, mut reader) = stream.split();

        let state = Arc::new(AtomicU8::new(STATE_OPEN));
        let buffered = Arc::new(AtomicUsize::new(0));
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let reader_state = state.clone();
        tokio::spawn(async move {
            while let Some(message) = reader.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        if inbound_tx.send(Frame::Text(text.to_string())).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Binary(_)) => {
                        let _ = inbound_tx.send(Frame::Binary);
                    }
                    Ok(Message::Close(_)) => {
                        reader_state.store(STATE_CLOSED, Ordering::SeqCst);
                        let _ = inbound_tx.send(Frame::Closed);
                        break;
                    }
                    Ok(_) => {} // ping/pong handled by the library
                    Err(e) => {
                        log::warn!("[trellis-link] Websocket read error: {}", e);
                        reader_state.store(STATE_CLOSED, Ordering::SeqCst);
                        let _ = inbound_tx.send(Frame::Closed);
                        break;
                    }
                }
            }
            reader_state.store(STATE_CLOSED, Ordering::SeqCst);
        });

        Ok(Arc::new(WsTransport {
            writer: Mutex::new(writer),
            state,
            buffered,
            inbound: parking_lot::Mutex::new(Some(inbound_rx)),
        }))
    }
}

#[async_trait]
impl Transport for WsTransport {
    fn ready_state(&self) -> ReadyState {
        match self.state.load(Ordering::SeqCst) {
            STATE_OPEN => ReadyState::Open,
            STATE_CLOSING => ReadyState::Closing,
            STATE_CLOSED => ReadyState::Closed,
            _ => ReadyState::Connecting,
        }
    }

    fn buffered_bytes(&self) -> usize {
        self.buffered.load(Ordering::SeqCst)
    }

    async fn send_text(&self, frame: String) -> Result<()> {
        let len = frame.len();
        self.buffered.fetch_add(len, Ordering::SeqCst);
        let result = {
            let mut writer = self.writer.lock().await;
            writer.send(Message::Text(frame.into())).await
        };
        self.buffered.fetch_sub(len, Ordering::SeqCst);
        result.map_err(|e| {
            self.state.store(STATE_CLOSED, Ordering::SeqCst);
            LinkError::TransportError(e.to_string())
        })
    }

    fn close(&self) {
        // The server observes the TCP teardown; a graceful close frame would
        // need an async context the session does not hold here.
        self.state.store(STATE_CLOSED, Ordering::SeqCst);
    }

    fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<Frame>> {
        self.inbound.lock().take()
    }
}

/// Connector producing [`WsTransport`] instances.
#[derive(Debug, Default)]
pub struct WsConnector;

#[async_trait]
impl TransportConnector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Arc<dyn Transport>> {
        WsTransport::connect(url).await
    }
}
