//! Data-channel wire format
//!
//! One file is sent as:
//! 1. a text frame `{"type":"file-metadata","name",...}`
//! 2. zero or more binary frames of at most [`CHUNK_SIZE`] bytes
//! 3. a text frame `{"type":"file-end"}`

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Payload bytes per binary frame
pub const CHUNK_SIZE: usize = 16 * 1024;

/// Outstanding channel bytes above which the sender waits
pub const BUFFER_HIGH_WATER: usize = CHUNK_SIZE * 10;

/// Declared properties of the file that follows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub name: String,
    /// Bytes on the wire (post-encryption when `encrypted`)
    pub size: u64,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    pub encrypted: bool,
}

/// Text control frames
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlFrame {
    #[serde(rename = "file-metadata")]
    FileMetadata(FileMetadata),
    #[serde(rename = "file-end")]
    FileEnd {},
}

impl ControlFrame {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::MalformedMessage(e.to_string()))
    }
}

/// One message on the direct channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataFrame {
    Text(String),
    Binary(Bytes),
}

/// Number of binary frames a payload of `len` bytes is split into
pub fn chunk_count(len: usize) -> usize {
    len.div_ceil(CHUNK_SIZE)
}

/// Split a payload into chunks, in emission order
pub fn chunks(payload: &Bytes) -> impl Iterator<Item = Bytes> + '_ {
    (0..payload.len())
        .step_by(CHUNK_SIZE)
        .map(move |start| payload.slice(start..(start + CHUNK_SIZE).min(payload.len())))
}
