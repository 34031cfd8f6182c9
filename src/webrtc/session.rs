//! Drives one session from rendezvous to a closed channel
//!
//! A single task owns the orchestrator and the file receiver. Control
//! messages, transport events and sender completion are multiplexed
//! with `select!`; only the file sender runs as its own task so that
//! backpressure waits never stall event handling.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::orchestrator::Orchestrator;
use super::peer::{NegotiationTransport, Peer, PeerEvent};
use super::signaling::{ControlEvent, SignalingClient};
use super::types::{Phase, SessionEvent, SessionIntent, WebRTCConfig};
use crate::error::Error;
use crate::transfer::{
    send_files, FileMetadata, FileReceiver, FlowControl, FrameSink, OutgoingFile, ReceiveEvent, SendUpdate,
};

/// Pause between draining the channel and closing the connection
pub const CLOSE_GRACE_PERIOD: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Encrypt outgoing files with this passphrase
    pub passphrase: Option<String>,
    pub flow: FlowControl,
    /// Overrides [`CLOSE_GRACE_PERIOD`]
    pub close_grace: Option<Duration>,
}

type SendTask = JoinHandle<crate::error::Result<Vec<FileMetadata>>>;

/// Run a session over WebRTC with the relay at `config.signaling_url`
///
/// The control connection is retried with a fixed delay until the first
/// connect succeeds. If it drops before the direct channel is open, the
/// session is abandoned and this returns [`Error::ControlChannelLost`];
/// the caller must start a new session.
pub async fn run_session(
    config: &WebRTCConfig,
    intent: SessionIntent,
    outgoing: Vec<OutgoingFile>,
    options: SessionOptions,
    events: mpsc::UnboundedSender<SessionEvent>,
) -> Result<()> {
    let (signaling, control_rx) =
        SignalingClient::new(&config.signaling_url, config.reconnect_delay, config.ping_interval).spawn();

    let (peer_tx, peer_rx) = mpsc::channel(1024);
    let peer = Peer::new(&config.stun_servers, peer_tx).await?;

    let orchestrator = Orchestrator::new(
        intent,
        peer,
        signaling.sender(),
        events.clone(),
        config.max_code_attempts,
    );

    drive(orchestrator, control_rx, peer_rx, outgoing, options, events).await
}

/// Event loop for one session, independent of the concrete transport
pub async fn drive<T: NegotiationTransport>(
    mut orchestrator: Orchestrator<T>,
    mut control_rx: mpsc::UnboundedReceiver<ControlEvent>,
    mut peer_rx: mpsc::Receiver<PeerEvent>,
    outgoing: Vec<OutgoingFile>,
    options: SessionOptions,
    events: mpsc::UnboundedSender<SessionEvent>,
) -> Result<()> {
    let mut outgoing = Some(outgoing);
    let mut receiver = FileReceiver::new();
    let mut send_task: Option<SendTask> = None;
    let mut started = false;
    let mut control_open = true;

    loop {
        let phase = orchestrator.phase();
        if phase.is_terminal() || (started && phase == Phase::Idle) {
            break;
        }

        tokio::select! {
            event = control_rx.recv(), if control_open => match event {
                Some(ControlEvent::Connected) => {
                    if !started {
                        started = true;
                        orchestrator.start();
                    } else {
                        debug!("Signaling reconnected");
                    }
                }
                Some(ControlEvent::Message(msg)) => orchestrator.handle_server_message(msg).await,
                Some(ControlEvent::Disconnected) => orchestrator.handle_control_lost(),
                None => {
                    control_open = false;
                    orchestrator.handle_control_lost();
                    if !started {
                        return Err(Error::ControlChannelLost.into());
                    }
                }
            },
            event = peer_rx.recv() => match event {
                Some(PeerEvent::LocalCandidate(candidate)) => orchestrator.handle_local_candidate(candidate),
                Some(PeerEvent::ChannelOpen(sink)) => {
                    if orchestrator.handle_channel_open() {
                        if let Some(files) = outgoing.take().filter(|f| !f.is_empty()) {
                            send_task = Some(spawn_sender(sink, files, &options, events.clone()));
                        }
                    }
                }
                Some(PeerEvent::Frame(frame)) => handle_frame(&mut receiver, frame, &events),
                Some(PeerEvent::ChannelClosed) => {
                    if let Some(meta) = receiver.abort() {
                        let err = Error::TransferAborted(format!("channel closed while receiving {}", meta.name));
                        let _ = events.send(SessionEvent::Warning(err.to_string()));
                    }
                    if let Some(task) = send_task.take() {
                        task.abort();
                        orchestrator
                            .fail(Error::TransferAborted("channel closed while sending".to_string()))
                            .await;
                    } else {
                        orchestrator.handle_channel_closed();
                    }
                }
                Some(PeerEvent::ChannelError(reason)) => orchestrator.handle_channel_error(&reason).await,
                Some(PeerEvent::ConnectionFailed) => {
                    if let Some(task) = send_task.take() {
                        task.abort();
                    }
                    orchestrator.handle_channel_error("peer connection failed").await;
                }
                None => break,
            },
            result = join_sender(&mut send_task) => {
                send_task = None;
                match result {
                    Ok(Ok(sent)) => {
                        info!("Sent {} file(s); closing", sent.len());
                        tokio::time::sleep(options.close_grace.unwrap_or(CLOSE_GRACE_PERIOD)).await;
                        orchestrator.close().await;
                    }
                    Ok(Err(e)) => orchestrator.fail(e).await,
                    Err(e) => {
                        orchestrator
                            .fail(Error::TransferAborted(format!("sender task failed: {}", e)))
                            .await
                    }
                }
            }
        }
    }

    if let Some(task) = send_task.take() {
        task.abort();
    }
    orchestrator.leave();

    match orchestrator.phase() {
        Phase::Closed | Phase::Connected => Ok(()),
        Phase::Failed => Err(orchestrator
            .take_failure()
            .unwrap_or_else(|| Error::NegotiationFailed("session failed".to_string()))
            .into()),
        _ => Err(Error::ControlChannelLost.into()),
    }
}

async fn join_sender(
    task: &mut Option<SendTask>,
) -> std::result::Result<crate::error::Result<Vec<FileMetadata>>, tokio::task::JoinError> {
    match task {
        Some(task) => task.await,
        None => std::future::pending().await,
    }
}

fn spawn_sender(
    sink: Arc<dyn FrameSink>,
    files: Vec<OutgoingFile>,
    options: &SessionOptions,
    events: mpsc::UnboundedSender<SessionEvent>,
) -> SendTask {
    let passphrase = options.passphrase.clone();
    let flow = options.flow.clone();

    tokio::spawn(async move {
        let mut observer = |update: SendUpdate<'_>| {
            let event = match update {
                SendUpdate::Started(meta) => SessionEvent::SendProgress {
                    name: meta.name.clone(),
                    sent: 0,
                    total: meta.size,
                },
                SendUpdate::Progress(meta, sent) => SessionEvent::SendProgress {
                    name: meta.name.clone(),
                    sent,
                    total: meta.size,
                },
                SendUpdate::Finished(meta) => SessionEvent::FileSent(meta.clone()),
            };
            let _ = events.send(event);
        };

        let sent = send_files(files, passphrase, sink.as_ref(), &flow, &mut observer).await?;
        flow.wait_for_drain(sink.as_ref()).await?;
        Ok::<_, Error>(sent)
    })
}

fn handle_frame(
    receiver: &mut FileReceiver,
    frame: crate::transfer::DataFrame,
    events: &mpsc::UnboundedSender<SessionEvent>,
) {
    let event = match receiver.handle_frame(frame) {
        Ok(Some(ReceiveEvent::Started(meta))) => SessionEvent::ReceiveStarted(meta),
        Ok(Some(ReceiveEvent::Progress { name, received, total })) => {
            SessionEvent::ReceiveProgress { name, received, total }
        }
        Ok(Some(ReceiveEvent::Completed(file))) => SessionEvent::FileReceived(file),
        Ok(None) => return,
        Err(e @ Error::SizeMismatch { .. }) => SessionEvent::Warning(e.to_string()),
        Err(e) => {
            warn!("Ignoring bad data frame: {}", e);
            return;
        }
    };
    let _ = events.send(event);
}
