//! Rendezvous relay for airshare
//!
//! This crate provides:
//! - The session store pairing at most two participants per code
//! - The signaling router that relays negotiation records between them
//! - The axum WebSocket handler for control connections

pub mod error;
pub mod protocol;
pub mod router;
pub mod session;
mod server;

pub use error::{ErrorKind, RelayError};
pub use protocol::{
    generate_client_id, generate_session_code, is_valid_session_code, normalize_session_code,
    ClientMessage, ServerMessage, SESSION_CODE_ALPHABET, SESSION_CODE_LEN,
};
pub use router::{spawn_router, Router, RouterConfig, RouterHandle, SessionInfo};
pub use server::{handle_socket, ws_handler, RelayState};
pub use session::{SessionStore, StoreStats, MAX_SESSION_MEMBERS};
