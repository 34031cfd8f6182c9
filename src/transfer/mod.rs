//! File transfer over the direct channel
//!
//! - `frame`: wire format and chunking
//! - `engine`: sender with backpressure, receiver state machine
//! - `crypto`: optional passphrase encryption of whole files
//! - `sink`: storing received files

pub mod crypto;
mod engine;
mod frame;
mod sink;

pub use engine::{
    send_files, FileReceiver, FlowControl, FrameSink, IncomingTransfer, OutgoingFile, OutgoingTransfer,
    ReceiveEvent, ReceivedFile, SendObserver, SendUpdate, DRAIN_POLL_INTERVAL,
};
pub use frame::{chunk_count, chunks, ControlFrame, DataFrame, FileMetadata, BUFFER_HIGH_WATER, CHUNK_SIZE};
pub use sink::{safe_file_name, DirectorySink};
