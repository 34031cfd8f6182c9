//! Control connection to the relay, reconnected with a fixed delay

use airshare_relay::{ClientMessage, ServerMessage};
use anyhow::Result;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, trace, warn};

/// What the control connection reports to its owner
#[derive(Debug, Clone, PartialEq)]
pub enum ControlEvent {
    Connected,
    Message(ServerMessage),
    Disconnected,
}

/// Why one connection attempt ended
enum ConnectionEnd {
    Lost,
    Shutdown,
}

/// Sending half of the control connection
#[derive(Clone)]
pub struct SignalingHandle {
    tx: mpsc::UnboundedSender<ClientMessage>,
}

impl SignalingHandle {
    pub fn new(tx: mpsc::UnboundedSender<ClientMessage>) -> Self {
        Self { tx }
    }

    pub fn send(&self, msg: ClientMessage) {
        if self.tx.send(msg).is_err() {
            debug!("Signaling client has stopped; message dropped");
        }
    }

    pub fn sender(&self) -> mpsc::UnboundedSender<ClientMessage> {
        self.tx.clone()
    }
}

/// Drop queued messages; false once every handle is gone
fn discard_queued(rx: &mut mpsc::UnboundedReceiver<ClientMessage>) -> bool {
    loop {
        match rx.try_recv() {
            Ok(msg) => debug!("Dropping stale {} message", msg.msg_type()),
            Err(TryRecvError::Empty) => return true,
            Err(TryRecvError::Disconnected) => return false,
        }
    }
}

pub struct SignalingClient {
    url: String,
    reconnect_delay: Duration,
    ping_interval: Option<Duration>,
}

impl SignalingClient {
    pub fn new(url: impl Into<String>, reconnect_delay: Duration, ping_interval: Option<Duration>) -> Self {
        Self {
            url: url.into(),
            reconnect_delay,
            ping_interval,
        }
    }

    /// Start the connection task. It runs until every [`SignalingHandle`]
    /// is dropped or the event receiver goes away.
    pub fn spawn(self) -> (SignalingHandle, mpsc::UnboundedReceiver<ControlEvent>) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        tokio::spawn(self.run(out_rx, event_tx));
        (SignalingHandle::new(out_tx), event_rx)
    }

    async fn run(
        self,
        mut out_rx: mpsc::UnboundedReceiver<ClientMessage>,
        event_tx: mpsc::UnboundedSender<ControlEvent>,
    ) {
        loop {
            match self.connection(&mut out_rx, &event_tx).await {
                Ok(ConnectionEnd::Shutdown) => break,
                Ok(ConnectionEnd::Lost) => {
                    if event_tx.send(ControlEvent::Disconnected).is_err() {
                        break;
                    }
                }
                Err(e) => warn!("Failed to connect to {}: {}", self.url, e),
            }

            warn!("Reconnecting to {} in {:?}", self.url, self.reconnect_delay);
            tokio::select! {
                _ = tokio::time::sleep(self.reconnect_delay) => {}
                _ = event_tx.closed() => break,
            }

            // Anything queued while offline belongs to the lost connection
            if !discard_queued(&mut out_rx) {
                break;
            }
        }
        debug!("Signaling client for {} stopped", self.url);
    }

    async fn connection(
        &self,
        out_rx: &mut mpsc::UnboundedReceiver<ClientMessage>,
        event_tx: &mpsc::UnboundedSender<ControlEvent>,
    ) -> Result<ConnectionEnd> {
        info!("Connecting to signaling server: {}", self.url);
        let (ws_stream, _) = connect_async(self.url.as_str()).await?;
        let (mut write, mut read) = ws_stream.split();

        if event_tx.send(ControlEvent::Connected).is_err() {
            return Ok(ConnectionEnd::Shutdown);
        }

        let ping_every = self.ping_interval.unwrap_or(Duration::from_secs(3600));
        let mut ping_ticker = tokio::time::interval_at(tokio::time::Instant::now() + ping_every, ping_every);

        loop {
            tokio::select! {
                outgoing = out_rx.recv() => {
                    let Some(msg) = outgoing else {
                        let _ = write.close().await;
                        return Ok(ConnectionEnd::Shutdown);
                    };
                    debug!("Sending {} to relay", msg.msg_type());
                    if let Err(e) = write.send(Message::Text(msg.to_json().into())).await {
                        warn!("Send to {} failed: {}", self.url, e);
                        return Ok(ConnectionEnd::Lost);
                    }
                }
                _ = ping_ticker.tick(), if self.ping_interval.is_some() => {
                    let ping = ClientMessage::Ping {};
                    if write.send(Message::Text(ping.to_json().into())).await.is_err() {
                        return Ok(ConnectionEnd::Lost);
                    }
                }
                incoming = read.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            trace!("Relay says: {}", text);
                            match serde_json::from_str::<ServerMessage>(&text) {
                                Ok(msg) => {
                                    if event_tx.send(ControlEvent::Message(msg)).is_err() {
                                        return Ok(ConnectionEnd::Shutdown);
                                    }
                                }
                                Err(e) => warn!("Ignoring malformed control message: {}", e),
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            warn!("Signaling connection closed: {}", self.url);
                            return Ok(ConnectionEnd::Lost);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            error!("WebSocket error from {}: {}", self.url, e);
                            return Ok(ConnectionEnd::Lost);
                        }
                    }
                }
            }
        }
    }
}
