//! Connection multiplexer
//!
//! Accepts WebSocket connections, gives each a random identifier, forwards
//! generate requests to the worker's request channel and writes routed results
//! back out. Per connection an inbound and an outbound duty run concurrently;
//! whichever finishes first ends the connection and cancels the other.

use crate::registry::{ConnectionGuard, ConnectionRegistry, Outbox};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use quill_common::config::CoordinatorConfig;
use quill_common::{QuillError, Result, METRICS};
use quill_proto::{assigned_id_message, ClientMessage, ConnectionId, GenerationRequest};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::UnboundedSender;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};
use tracing::{debug, info, warn};

type WsWriter = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsReader = SplitStream<WebSocketStream<TcpStream>>;

/// Fan-in of client requests, fan-out of results
#[derive(Clone)]
pub struct Multiplexer {
    registry: ConnectionRegistry,
    requests: UnboundedSender<GenerationRequest>,
    keep_alive: Arc<str>,
}

impl Multiplexer {
    pub fn new(
        registry: ConnectionRegistry,
        requests: UnboundedSender<GenerationRequest>,
        config: &CoordinatorConfig,
    ) -> Self {
        Self {
            registry,
            requests,
            keep_alive: config.keep_alive_message.as_str().into(),
        }
    }

    /// Accept connections until the listener fails
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        info!("Multiplexer listening on {}", listener.local_addr()?);

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    continue;
                }
            };

            let multiplexer = self.clone();
            tokio::spawn(async move {
                if let Err(e) = multiplexer.handle_connection(stream, peer).await {
                    if e.is_connection_scoped() {
                        debug!("Connection from {} ended: {}", peer, e);
                    } else {
                        warn!("Connection from {} failed: {}", peer, e);
                    }
                }
            });
        }
    }

    async fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) -> Result<()> {
        let ws_stream = accept_async(stream).await?;
        let (mut writer, mut reader) = ws_stream.split();

        let (id, mut outbox) = self.registry.register();
        let _guard = ConnectionGuard::new(self.registry.clone(), id);
        METRICS.coordinator.connections_total.inc();
        info!(
            "[ws connect] {} from {} ({} connections)",
            id,
            peer,
            self.registry.len()
        );

        writer.send(Message::Text(assigned_id_message(&id))).await?;

        tokio::select! {
            result = self.inbound(id, &mut reader) => result,
            result = outbound(&mut writer, &mut outbox) => result,
        }
    }

    /// Read client messages until the connection closes
    async fn inbound(&self, id: ConnectionId, reader: &mut WsReader) -> Result<()> {
        while let Some(message) = reader.next().await {
            match message? {
                Message::Text(text) => self.handle_text(id, &text)?,
                Message::Close(_) => break,
                _ => continue,
            }
        }
        Ok(())
    }

    /// Act on one text frame. Only a closed request channel is an error.
    pub fn handle_text(&self, id: ConnectionId, text: &str) -> Result<()> {
        match ClientMessage::parse(text, &self.keep_alive) {
            Ok(ClientMessage::KeepAlive) => {
                METRICS.coordinator.keep_alives.inc();
            }
            Ok(ClientMessage::Generate { text }) => {
                debug!("get {} ({} chars)", id, text.chars().count());
                METRICS.worker.queue_depth.inc();
                if self.requests.send(GenerationRequest::new(id, text)).is_err() {
                    METRICS.worker.queue_depth.dec();
                    return Err(QuillError::channel_closed("generation worker is gone"));
                }
                METRICS.coordinator.requests_enqueued.inc();
            }
            Ok(ClientMessage::Other { op }) => {
                debug!("Ignoring op {:?} from {}", op, id);
            }
            Err(e) => {
                METRICS.coordinator.malformed_messages.inc();
                warn!("Discarding message from {}: {}", id, e);
            }
        }
        Ok(())
    }
}

/// Write routed results until the outbox or the socket closes
async fn outbound(writer: &mut WsWriter, outbox: &mut Outbox) -> Result<()> {
    while let Some(payload) = outbox.recv().await {
        writer.send(Message::Text(payload)).await?;
    }
    Ok(())
}
