//! Tests for session negotiation and the session driver

use super::*;
use crate::error::Error;
use crate::transfer::{DataFrame, FileReceiver, FlowControl, FrameSink, OutgoingFile, ReceiveEvent};
use airshare_relay::{ClientMessage, RelayError, ServerMessage};
use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Records negotiation calls instead of touching the network
#[derive(Clone, Default)]
struct FakeTransport {
    calls: Arc<Mutex<Vec<String>>>,
    fail_offer: bool,
}

impl FakeTransport {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }
}

#[async_trait]
impl NegotiationTransport for FakeTransport {
    async fn create_offer(&mut self) -> anyhow::Result<Value> {
        self.record("create_offer");
        if self.fail_offer {
            return Err(anyhow!("no ICE servers reachable"));
        }
        Ok(json!({"type": "offer", "sdp": "v=0 offer"}))
    }

    async fn accept_offer(&mut self, _offer: Value) -> anyhow::Result<Value> {
        self.record("accept_offer");
        Ok(json!({"type": "answer", "sdp": "v=0 answer"}))
    }

    async fn accept_answer(&mut self, _answer: Value) -> anyhow::Result<()> {
        self.record("accept_answer");
        Ok(())
    }

    async fn add_candidate(&mut self, candidate: Value) -> anyhow::Result<()> {
        self.record(&format!("add_candidate:{}", candidate["candidate"].as_str().unwrap_or("")));
        Ok(())
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        self.record("close");
        Ok(())
    }
}

/// Frame sink that keeps everything in memory
#[derive(Default)]
struct MemorySink {
    frames: Mutex<Vec<DataFrame>>,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send_text(&self, text: String) -> crate::error::Result<()> {
        self.frames.lock().unwrap().push(DataFrame::Text(text));
        Ok(())
    }

    async fn send_binary(&self, data: Bytes) -> crate::error::Result<()> {
        self.frames.lock().unwrap().push(DataFrame::Binary(data));
        Ok(())
    }

    async fn buffered_amount(&self) -> usize {
        0
    }

    fn is_open(&self) -> bool {
        true
    }
}

struct Harness {
    orchestrator: Orchestrator<FakeTransport>,
    transport: FakeTransport,
    signaling: mpsc::UnboundedReceiver<ClientMessage>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
}

fn harness(intent: SessionIntent, transport: FakeTransport, max_code_attempts: usize) -> Harness {
    let (signal_tx, signaling) = mpsc::unbounded_channel();
    let (event_tx, events) = mpsc::unbounded_channel();
    let orchestrator = Orchestrator::new(intent, transport.clone(), signal_tx, event_tx, max_code_attempts);
    Harness { orchestrator, transport, signaling, events }
}

fn drain<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> Vec<T> {
    let mut out = Vec::new();
    while let Ok(item) = rx.try_recv() {
        out.push(item);
    }
    out
}

fn candidate(n: u32) -> Value {
    json!({
        "candidate": format!("candidate:{} 1 udp 2122260223 192.168.1.{} 5000{} typ host", n, n, n),
        "sdpMid": "0",
        "sdpMLineIndex": 0,
    })
}

fn peer_joined() -> ServerMessage {
    ServerMessage::PeerJoined { peer_id: "client_peer".to_string(), client_count: 2 }
}

fn relay_error(err: RelayError) -> ServerMessage {
    ServerMessage::error(&err)
}

#[tokio::test]
async fn test_host_creates_session_and_offers_when_peer_joins() {
    let mut h = harness(SessionIntent::Host { code: Some("ABC123".to_string()) }, FakeTransport::default(), 5);
    assert_eq!(h.orchestrator.role(), Role::Initiator);

    h.orchestrator.start();
    assert_eq!(h.orchestrator.phase(), Phase::AwaitingPeer);
    assert_eq!(
        drain(&mut h.signaling),
        vec![ClientMessage::CreateSession { session_id: "ABC123".to_string() }]
    );

    h.orchestrator
        .handle_server_message(ServerMessage::SessionCreated {
            session_id: "ABC123".to_string(),
            timestamp: Utc::now(),
        })
        .await;
    assert_eq!(h.orchestrator.phase(), Phase::AwaitingPeer);

    h.orchestrator.handle_server_message(peer_joined()).await;
    assert_eq!(h.orchestrator.phase(), Phase::Negotiating);
    assert_eq!(h.transport.calls(), vec!["create_offer"]);
    assert_eq!(h.orchestrator.local_description().unwrap()["type"], "offer");
    assert!(h.orchestrator.remote_description().is_none());

    let sent = drain(&mut h.signaling);
    assert_eq!(sent.len(), 1);
    match &sent[0] {
        ClientMessage::Offer { offer, session_id } => {
            assert_eq!(offer["type"], "offer");
            assert_eq!(session_id.as_deref(), Some("ABC123"));
        }
        other => panic!("expected offer, got {:?}", other),
    }

    let events = drain(&mut h.events);
    assert!(events.iter().any(|e| matches!(e, SessionEvent::SessionCreated { code } if code == "ABC123")));
    assert!(events.iter().any(|e| matches!(e, SessionEvent::PeerJoined { client_count: 2, .. })));
}

#[tokio::test]
async fn test_initiator_applies_answer_once() {
    let mut h = harness(SessionIntent::Host { code: Some("ABC123".to_string()) }, FakeTransport::default(), 5);
    h.orchestrator.start();
    h.orchestrator.handle_server_message(peer_joined()).await;

    let answer = ServerMessage::Answer {
        answer: json!({"type": "answer", "sdp": "v=0"}),
        from_client: Some("client_peer".to_string()),
    };
    h.orchestrator.handle_server_message(answer.clone()).await;
    h.orchestrator.handle_server_message(answer).await;

    assert_eq!(h.transport.calls(), vec!["create_offer", "accept_answer"]);
    assert!(h.orchestrator.remote_description().is_some());
}

#[tokio::test]
async fn test_responder_buffers_early_candidates_until_offer() {
    let mut h = harness(SessionIntent::Join { code: "XYZ789".to_string() }, FakeTransport::default(), 5);
    assert_eq!(h.orchestrator.role(), Role::Responder);

    h.orchestrator.start();
    assert_eq!(
        drain(&mut h.signaling),
        vec![ClientMessage::JoinSession { session_id: "XYZ789".to_string() }]
    );

    h.orchestrator
        .handle_server_message(ServerMessage::SessionJoined {
            session_id: "XYZ789".to_string(),
            client_count: 2,
        })
        .await;
    assert_eq!(h.orchestrator.phase(), Phase::Negotiating);

    for n in 1..=2 {
        h.orchestrator
            .handle_server_message(ServerMessage::IceCandidate {
                candidate: candidate(n),
                from_client: Some("client_host".to_string()),
            })
            .await;
    }
    assert_eq!(h.orchestrator.pending_candidates(), 2);
    assert!(h.transport.calls().is_empty());

    h.orchestrator
        .handle_server_message(ServerMessage::Offer {
            offer: json!({"type": "offer", "sdp": "v=0"}),
            from_client: Some("client_host".to_string()),
        })
        .await;

    assert_eq!(h.orchestrator.pending_candidates(), 0);
    assert_eq!(h.orchestrator.local_description().unwrap()["type"], "answer");
    assert_eq!(h.orchestrator.remote_description().unwrap()["type"], "offer");
    let calls = h.transport.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[0], "accept_offer");
    assert!(calls[1].starts_with("add_candidate:candidate:1 "));
    assert!(calls[2].starts_with("add_candidate:candidate:2 "));

    let sent = drain(&mut h.signaling);
    assert!(matches!(
        &sent[..],
        [ClientMessage::Answer { session_id: Some(code), .. }] if code == "XYZ789"
    ));

    // Later candidates are applied directly
    h.orchestrator
        .handle_server_message(ServerMessage::IceCandidate { candidate: candidate(3), from_client: None })
        .await;
    assert_eq!(h.transport.calls().len(), 4);
    assert_eq!(h.orchestrator.pending_candidates(), 0);
}

#[tokio::test]
async fn test_generated_code_retries_on_duplicate() {
    let mut h = harness(SessionIntent::Host { code: None }, FakeTransport::default(), 5);
    h.orchestrator.start();
    let first = h.orchestrator.code().to_string();
    assert!(airshare_relay::is_valid_session_code(&first));
    drain(&mut h.signaling);

    h.orchestrator
        .handle_server_message(relay_error(RelayError::DuplicateSession(first.clone())))
        .await;

    assert_eq!(h.orchestrator.phase(), Phase::AwaitingPeer);
    let sent = drain(&mut h.signaling);
    assert_eq!(sent.len(), 1);
    match &sent[0] {
        ClientMessage::CreateSession { session_id } => {
            assert_eq!(session_id, h.orchestrator.code());
            assert!(airshare_relay::is_valid_session_code(session_id));
        }
        other => panic!("expected create-session, got {:?}", other),
    }
}

#[tokio::test]
async fn test_generated_code_gives_up_after_max_attempts() {
    let mut h = harness(SessionIntent::Host { code: None }, FakeTransport::default(), 2);
    h.orchestrator.start();

    for _ in 0..2 {
        let code = h.orchestrator.code().to_string();
        h.orchestrator
            .handle_server_message(relay_error(RelayError::DuplicateSession(code)))
            .await;
    }

    assert_eq!(h.orchestrator.phase(), Phase::Failed);
    assert!(matches!(h.orchestrator.take_failure(), Some(Error::DuplicateSession(_))));
    let creates = drain(&mut h.signaling)
        .into_iter()
        .filter(|m| matches!(m, ClientMessage::CreateSession { .. }))
        .count();
    assert_eq!(creates, 2);
}

#[tokio::test]
async fn test_explicit_code_duplicate_fails_immediately() {
    let mut h = harness(SessionIntent::Host { code: Some("TAKEN1".to_string()) }, FakeTransport::default(), 5);
    h.orchestrator.start();
    h.orchestrator
        .handle_server_message(relay_error(RelayError::DuplicateSession("TAKEN1".to_string())))
        .await;

    assert_eq!(h.orchestrator.phase(), Phase::Failed);
    assert!(matches!(h.orchestrator.take_failure(), Some(Error::DuplicateSession(code)) if code == "TAKEN1"));
    assert!(drain(&mut h.events).iter().any(|e| matches!(e, SessionEvent::Failed(_))));
}

#[tokio::test]
async fn test_join_unknown_session_fails() {
    let mut h = harness(SessionIntent::Join { code: "NOPE00".to_string() }, FakeTransport::default(), 5);
    h.orchestrator.start();
    h.orchestrator
        .handle_server_message(relay_error(RelayError::SessionNotFound("NOPE00".to_string())))
        .await;

    assert_eq!(h.orchestrator.phase(), Phase::Failed);
    assert!(matches!(h.orchestrator.take_failure(), Some(Error::SessionNotFound(_))));
    assert_eq!(h.transport.calls(), vec!["close"]);
}

#[tokio::test]
async fn test_offer_failure_fails_negotiation() {
    let transport = FakeTransport { fail_offer: true, ..Default::default() };
    let mut h = harness(SessionIntent::Host { code: Some("ABC123".to_string()) }, transport, 5);
    h.orchestrator.start();
    h.orchestrator.handle_server_message(peer_joined()).await;

    assert_eq!(h.orchestrator.phase(), Phase::Failed);
    assert!(matches!(h.orchestrator.take_failure(), Some(Error::NegotiationFailed(_))));
}

#[tokio::test]
async fn test_peer_left_during_negotiation_fails() {
    let mut h = harness(SessionIntent::Host { code: Some("ABC123".to_string()) }, FakeTransport::default(), 5);
    h.orchestrator.start();
    h.orchestrator.handle_server_message(peer_joined()).await;
    h.orchestrator
        .handle_server_message(ServerMessage::PeerLeft { peer_id: "client_peer".to_string(), client_count: 1 })
        .await;

    assert_eq!(h.orchestrator.phase(), Phase::Failed);
    assert!(matches!(h.orchestrator.take_failure(), Some(Error::NegotiationFailed(_))));
    assert_eq!(h.transport.calls(), vec!["create_offer", "close"]);
}

#[tokio::test]
async fn test_relay_error_after_pairing_is_a_warning() {
    let mut h = harness(SessionIntent::Host { code: Some("ABC123".to_string()) }, FakeTransport::default(), 5);
    h.orchestrator.start();
    h.orchestrator.handle_server_message(peer_joined()).await;
    assert!(h.orchestrator.handle_channel_open());
    drain(&mut h.events);

    h.orchestrator
        .handle_server_message(relay_error(RelayError::MalformedMessage("bad".to_string())))
        .await;

    assert_eq!(h.orchestrator.phase(), Phase::Connected);
    assert!(matches!(&drain(&mut h.events)[..], [SessionEvent::Warning(_)]));
}

#[tokio::test]
async fn test_control_loss_before_channel_returns_to_idle() {
    let mut h = harness(SessionIntent::Join { code: "XYZ789".to_string() }, FakeTransport::default(), 5);
    h.orchestrator.start();
    h.orchestrator
        .handle_server_message(ServerMessage::IceCandidate { candidate: candidate(1), from_client: None })
        .await;
    assert_eq!(h.orchestrator.pending_candidates(), 1);
    drain(&mut h.events);

    h.orchestrator.handle_control_lost();

    assert_eq!(h.orchestrator.phase(), Phase::Idle);
    assert_eq!(h.orchestrator.pending_candidates(), 0);
    let events = drain(&mut h.events);
    assert!(events.iter().any(|e| matches!(e, SessionEvent::SessionLost)));
    assert!(events.iter().any(|e| matches!(e, SessionEvent::PhaseChanged(Phase::Idle))));
}

#[tokio::test]
async fn test_control_loss_after_channel_is_ignored() {
    let mut h = harness(SessionIntent::Host { code: Some("ABC123".to_string()) }, FakeTransport::default(), 5);
    h.orchestrator.start();
    h.orchestrator.handle_server_message(peer_joined()).await;
    h.orchestrator.handle_channel_open();

    h.orchestrator.handle_control_lost();
    assert_eq!(h.orchestrator.phase(), Phase::Connected);
}

#[tokio::test]
async fn test_channel_open_and_close() {
    let mut h = harness(SessionIntent::Join { code: "XYZ789".to_string() }, FakeTransport::default(), 5);
    // Not negotiating yet
    assert!(!h.orchestrator.handle_channel_open());
    assert_eq!(h.orchestrator.phase(), Phase::Idle);

    h.orchestrator.start();
    h.orchestrator
        .handle_server_message(ServerMessage::SessionJoined { session_id: "XYZ789".to_string(), client_count: 2 })
        .await;

    // The responder waits for data instead of sending
    assert!(!h.orchestrator.handle_channel_open());
    assert_eq!(h.orchestrator.phase(), Phase::Connected);

    h.orchestrator.handle_channel_closed();
    assert_eq!(h.orchestrator.phase(), Phase::Closed);
    assert!(h.orchestrator.phase().is_terminal());
}

#[tokio::test]
async fn test_channel_closed_during_negotiation_fails() {
    let mut h = harness(SessionIntent::Host { code: Some("ABC123".to_string()) }, FakeTransport::default(), 5);
    h.orchestrator.start();
    h.orchestrator.handle_server_message(peer_joined()).await;

    h.orchestrator.handle_channel_closed();

    assert_eq!(h.orchestrator.phase(), Phase::Failed);
    assert!(matches!(h.orchestrator.take_failure(), Some(Error::NegotiationFailed(_))));
}

#[tokio::test]
async fn test_local_candidates_only_relayed_while_negotiating() {
    let mut h = harness(SessionIntent::Host { code: Some("ABC123".to_string()) }, FakeTransport::default(), 5);
    h.orchestrator.start();
    drain(&mut h.signaling);

    h.orchestrator.handle_local_candidate(candidate(1));
    assert!(drain(&mut h.signaling).is_empty());

    h.orchestrator.handle_server_message(peer_joined()).await;
    drain(&mut h.signaling);

    h.orchestrator.handle_local_candidate(candidate(2));
    h.orchestrator.handle_local_candidate(candidate(3));
    let sent = drain(&mut h.signaling);
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|m| matches!(
        m,
        ClientMessage::IceCandidate { session_id: Some(code), .. } if code == "ABC123"
    )));
}

#[test]
fn test_phase_transitions() {
    assert!(Phase::Idle.can_transition_to(Phase::AwaitingPeer));
    assert!(Phase::Negotiating.can_transition_to(Phase::Connected));
    assert!(Phase::Connected.can_transition_to(Phase::Closed));
    assert!(Phase::Negotiating.can_transition_to(Phase::Failed));
    assert!(Phase::AwaitingPeer.can_transition_to(Phase::Idle));

    assert!(!Phase::Idle.can_transition_to(Phase::Connected));
    assert!(!Phase::Closed.can_transition_to(Phase::Failed));
    assert!(!Phase::Failed.can_transition_to(Phase::Idle));
    assert!(!Phase::Connected.can_transition_to(Phase::Idle));
}

#[test]
fn test_candidate_json_roundtrip() {
    let parsed = candidate_from_json(&candidate(7)).unwrap();
    assert!(parsed.candidate.starts_with("candidate:7"));
    assert_eq!(parsed.sdp_mid.as_deref(), Some("0"));
    assert_eq!(parsed.sdp_mline_index, Some(0));

    let json = candidate_to_json(&parsed);
    assert_eq!(json["sdpMLineIndex"], 0);
    assert_eq!(json["candidate"], candidate(7)["candidate"]);
}

#[test]
fn test_candidate_from_json_accepts_lowercase_index() {
    let parsed = candidate_from_json(&json!({"candidate": "candidate:1 1 udp 1 10.0.0.1 1 typ host", "sdpMlineIndex": 1}))
        .unwrap();
    assert_eq!(parsed.sdp_mline_index, Some(1));
}

#[test]
fn test_empty_candidate_is_end_of_candidates() {
    assert!(candidate_from_json(&json!({"candidate": ""})).is_none());
    assert!(candidate_from_json(&json!({})).is_none());
}

async fn wait_for(
    events: &mut mpsc::UnboundedReceiver<SessionEvent>,
    seen: &mut Vec<SessionEvent>,
    pred: impl Fn(&SessionEvent) -> bool,
) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.expect("event stream ended");
            let done = pred(&event);
            seen.push(event);
            if done {
                return;
            }
        }
    })
    .await
    .expect("timed out waiting for event");
}

fn quick_options() -> SessionOptions {
    SessionOptions {
        passphrase: None,
        flow: FlowControl::default(),
        close_grace: Some(Duration::ZERO),
    }
}

#[tokio::test]
async fn test_drive_initiator_sends_queued_files() {
    let (signal_tx, mut signal_rx) = mpsc::unbounded_channel();
    let (event_tx, mut events) = mpsc::unbounded_channel();
    let transport = FakeTransport::default();
    let orchestrator = Orchestrator::new(
        SessionIntent::Host { code: Some("ABC123".to_string()) },
        transport.clone(),
        signal_tx,
        event_tx.clone(),
        5,
    );
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let (peer_tx, peer_rx) = mpsc::channel(16);

    let files = vec![
        OutgoingFile::new("a.txt", &b"hello"[..]),
        OutgoingFile::new("empty.bin", Vec::<u8>::new()),
    ];
    let task = tokio::spawn(drive(orchestrator, control_rx, peer_rx, files, quick_options(), event_tx));

    let mut seen = Vec::new();
    control_tx.send(ControlEvent::Connected).unwrap();
    control_tx.send(ControlEvent::Message(peer_joined())).unwrap();
    wait_for(&mut events, &mut seen, |e| matches!(e, SessionEvent::PhaseChanged(Phase::Negotiating))).await;

    let sink = Arc::new(MemorySink::default());
    peer_tx.send(PeerEvent::ChannelOpen(sink.clone())).await.unwrap();

    task.await.unwrap().unwrap();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }

    let sent: Vec<_> = seen
        .iter()
        .filter_map(|e| match e {
            SessionEvent::FileSent(meta) => Some(meta.name.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(sent, vec!["a.txt", "empty.bin"]);
    assert!(seen.iter().any(|e| matches!(e, SessionEvent::PhaseChanged(Phase::Closed))));
    assert!(transport.calls().contains(&"close".to_string()));
    assert!(drain(&mut signal_rx).contains(&ClientMessage::LeaveSession {}));

    // Replaying the frames reproduces both files
    let mut receiver = FileReceiver::new();
    let mut received = Vec::new();
    for frame in sink.frames.lock().unwrap().drain(..) {
        if let Some(ReceiveEvent::Completed(file)) = receiver.handle_frame(frame).unwrap() {
            received.push(file);
        }
    }
    assert_eq!(received.len(), 2);
    assert_eq!(received[0].data, Bytes::from_static(b"hello"));
    assert!(received[1].data.is_empty());
}

#[tokio::test]
async fn test_drive_responder_receives_until_channel_closes() {
    let (signal_tx, mut signal_rx) = mpsc::unbounded_channel();
    let (event_tx, mut events) = mpsc::unbounded_channel();
    let orchestrator = Orchestrator::new(
        SessionIntent::Join { code: "XYZ789".to_string() },
        FakeTransport::default(),
        signal_tx,
        event_tx.clone(),
        5,
    );
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let (peer_tx, peer_rx) = mpsc::channel(16);
    let task = tokio::spawn(drive(orchestrator, control_rx, peer_rx, Vec::new(), quick_options(), event_tx));

    let mut seen = Vec::new();
    control_tx.send(ControlEvent::Connected).unwrap();
    control_tx
        .send(ControlEvent::Message(ServerMessage::Offer {
            offer: json!({"type": "offer", "sdp": "v=0"}),
            from_client: Some("client_host".to_string()),
        }))
        .unwrap();
    wait_for(&mut events, &mut seen, |e| matches!(e, SessionEvent::PhaseChanged(Phase::Negotiating))).await;

    let metadata = r#"{"type":"file-metadata","name":"notes.txt","size":5,"mimeType":"text/plain","encrypted":false}"#;
    peer_tx.send(PeerEvent::ChannelOpen(Arc::new(MemorySink::default()))).await.unwrap();
    peer_tx.send(PeerEvent::Frame(DataFrame::Text(metadata.to_string()))).await.unwrap();
    peer_tx.send(PeerEvent::Frame(DataFrame::Binary(Bytes::from_static(b"hello")))).await.unwrap();
    peer_tx.send(PeerEvent::Frame(DataFrame::Text(r#"{"type":"file-end"}"#.to_string()))).await.unwrap();
    peer_tx.send(PeerEvent::ChannelClosed).await.unwrap();

    task.await.unwrap().unwrap();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }

    let file = seen
        .iter()
        .find_map(|e| match e {
            SessionEvent::FileReceived(file) => Some(file.clone()),
            _ => None,
        })
        .expect("file received");
    assert_eq!(file.metadata.name, "notes.txt");
    assert_eq!(file.data, Bytes::from_static(b"hello"));
    assert!(seen.iter().any(|e| matches!(e, SessionEvent::PhaseChanged(Phase::Closed))));

    let sent = drain(&mut signal_rx);
    assert!(matches!(sent.first(), Some(ClientMessage::JoinSession { .. })));
    assert!(sent.iter().any(|m| matches!(m, ClientMessage::Answer { .. })));
}

#[tokio::test]
async fn test_drive_reports_lost_control_channel() {
    let (signal_tx, _signal_rx) = mpsc::unbounded_channel();
    let (event_tx, mut events) = mpsc::unbounded_channel();
    let orchestrator = Orchestrator::new(
        SessionIntent::Join { code: "XYZ789".to_string() },
        FakeTransport::default(),
        signal_tx,
        event_tx.clone(),
        5,
    );
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let (_peer_tx, peer_rx) = mpsc::channel(16);
    let task = tokio::spawn(drive(orchestrator, control_rx, peer_rx, Vec::new(), quick_options(), event_tx));

    control_tx.send(ControlEvent::Connected).unwrap();
    control_tx.send(ControlEvent::Disconnected).unwrap();

    let err = task.await.unwrap().unwrap_err();
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::ControlChannelLost)));

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(seen.iter().any(|e| matches!(e, SessionEvent::SessionLost)));
}
