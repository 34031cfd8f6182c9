//! airshare: direct browser-style file sharing between two peers
//!
//! - `server`: HTTP front end hosting the rendezvous relay
//! - `webrtc`: session negotiation and the direct data channel
//! - `transfer`: chunked file transfer with optional encryption

pub mod config;
pub mod error;
pub mod mime;
pub mod server;
pub mod transfer;
pub mod webrtc;

pub use airshare_relay::{normalize_session_code, RouterConfig};
pub use config::{get_airshare_dir, get_config_path, Config};
pub use error::{Error, Result};
pub use server::AirshareServer;
pub use transfer::{DirectorySink, OutgoingFile, ReceivedFile};
pub use webrtc::{run_session, SessionEvent, SessionIntent, SessionOptions, WebRTCConfig};
