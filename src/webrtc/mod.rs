//! Direct peer connectivity for file sessions
//!
//! Uses the airshare relay for signaling:
//! - Host creates a session code, joiner joins it
//! - Initiator (host) creates the data channel and the offer
//! - Offers, answers and candidates are relayed verbatim

mod orchestrator;
mod peer;
mod session;
mod signaling;
mod types;

#[cfg(test)]
mod tests;

pub use orchestrator::Orchestrator;
pub use peer::{candidate_from_json, candidate_to_json, DataChannelSink, NegotiationTransport, Peer, PeerEvent};
pub use session::{drive, run_session, SessionOptions, CLOSE_GRACE_PERIOD};
pub use signaling::{ControlEvent, SignalingClient, SignalingHandle};
pub use types::{Phase, Role, SessionEvent, SessionIntent, WebRTCConfig, DATA_CHANNEL_LABEL};
