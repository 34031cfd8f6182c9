//! Chunked file transfer over an ordered, reliable channel
//!
//! The sender writes metadata, chunks and a terminator for one file at a
//! time, waiting whenever the channel holds too many unsent bytes. The
//! receiver appends chunks in arrival order and relies on the channel for
//! ordering; it never reorders.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use super::crypto;
use super::frame::{chunks, ControlFrame, DataFrame, FileMetadata, BUFFER_HIGH_WATER};
use crate::error::{Error, Result};
use crate::mime::mime_type_for;

/// Interval between checks of the channel's outstanding byte count
pub const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Upper bound on receive-buffer pre-allocation from a declared size
const MAX_PREALLOC: usize = 64 * 1024 * 1024;

/// Write side of the direct channel
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn send_text(&self, text: String) -> Result<()>;
    async fn send_binary(&self, data: Bytes) -> Result<()>;
    /// Bytes queued on the channel but not yet sent
    async fn buffered_amount(&self) -> usize;
    fn is_open(&self) -> bool;
}

/// Backpressure policy for the sender
#[derive(Debug, Clone)]
pub struct FlowControl {
    pub high_water: usize,
    pub poll_interval: Duration,
}

impl Default for FlowControl {
    fn default() -> Self {
        Self {
            high_water: BUFFER_HIGH_WATER,
            poll_interval: DRAIN_POLL_INTERVAL,
        }
    }
}

impl FlowControl {
    /// Suspend until the channel's outstanding bytes are at or below the high-water mark
    pub async fn wait_for_capacity<S: FrameSink + ?Sized>(&self, sink: &S) -> Result<()> {
        loop {
            if !sink.is_open() {
                return Err(Error::TransferAborted("channel closed while draining".to_string()));
            }
            let buffered = sink.buffered_amount().await;
            if buffered <= self.high_water {
                return Ok(());
            }
            trace!("Channel has {} bytes buffered, waiting", buffered);
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Suspend until everything queued has left the channel
    pub async fn wait_for_drain<S: FrameSink + ?Sized>(&self, sink: &S) -> Result<()> {
        Self { high_water: 0, poll_interval: self.poll_interval }
            .wait_for_capacity(sink)
            .await
    }
}

/// A file picked for sending
#[derive(Debug, Clone)]
pub struct OutgoingFile {
    pub name: String,
    pub mime_type: String,
    pub data: Bytes,
}

impl OutgoingFile {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let name = name.into();
        Self {
            mime_type: mime_type_for(&name).to_string(),
            name,
            data: data.into(),
        }
    }

    /// Read a file from disk, named by its final path component
    pub async fn read(path: &Path) -> Result<Self> {
        let data = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "file".to_string());
        Ok(Self::new(name, data))
    }
}

/// Sender-side notifications for one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendUpdate<'a> {
    Started(&'a FileMetadata),
    /// Payload bytes handed to the channel so far
    Progress(&'a FileMetadata, u64),
    Finished(&'a FileMetadata),
}

pub type SendObserver<'a> = dyn FnMut(SendUpdate<'_>) + Send + 'a;

/// One file being sent
#[derive(Debug)]
pub struct OutgoingTransfer {
    metadata: FileMetadata,
    payload: Bytes,
    chunks_sent: usize,
}

impl OutgoingTransfer {
    /// Build the wire payload, encrypting it when a passphrase is given
    pub fn prepare(file: OutgoingFile, passphrase: Option<&str>) -> Result<Self> {
        let (payload, encrypted) = match passphrase {
            Some(passphrase) => (Bytes::from(crypto::encrypt(&file.data, passphrase)?), true),
            None => (file.data, false),
        };

        Ok(Self {
            metadata: FileMetadata {
                name: file.name,
                size: payload.len() as u64,
                mime_type: file.mime_type,
                encrypted,
            },
            payload,
            chunks_sent: 0,
        })
    }

    pub fn metadata(&self) -> &FileMetadata {
        &self.metadata
    }

    pub fn chunks_sent(&self) -> usize {
        self.chunks_sent
    }

    /// Send metadata, every chunk and the terminator
    pub async fn send<S: FrameSink + ?Sized>(
        &mut self,
        sink: &S,
        flow: &FlowControl,
        observer: &mut SendObserver<'_>,
    ) -> Result<()> {
        info!(
            "Sending {} ({} bytes, encrypted: {})",
            self.metadata.name, self.metadata.size, self.metadata.encrypted
        );
        sink.send_text(ControlFrame::FileMetadata(self.metadata.clone()).to_json()).await?;
        observer(SendUpdate::Started(&self.metadata));

        let mut sent = 0u64;
        for chunk in chunks(&self.payload) {
            flow.wait_for_capacity(sink).await?;
            sent += chunk.len() as u64;
            sink.send_binary(chunk).await?;
            self.chunks_sent += 1;
            observer(SendUpdate::Progress(&self.metadata, sent));
        }

        sink.send_text(ControlFrame::FileEnd {}.to_json()).await?;
        observer(SendUpdate::Finished(&self.metadata));
        debug!("Sent {} in {} chunks", self.metadata.name, self.chunks_sent);
        Ok(())
    }
}

/// Send a queue of files strictly one after another
pub async fn send_files<S: FrameSink + ?Sized>(
    files: Vec<OutgoingFile>,
    passphrase: Option<String>,
    sink: &S,
    flow: &FlowControl,
    observer: &mut SendObserver<'_>,
) -> Result<Vec<FileMetadata>> {
    let mut sent = Vec::with_capacity(files.len());
    for file in files {
        let passphrase = passphrase.clone();
        // Key derivation and encryption are CPU-bound
        let mut transfer = tokio::task::spawn_blocking(move || {
            OutgoingTransfer::prepare(file, passphrase.as_deref())
        })
        .await
        .map_err(|e| Error::TransferAborted(format!("prepare task failed: {}", e)))??;

        transfer.send(sink, flow, observer).await?;
        sent.push(transfer.metadata.clone());
    }
    Ok(sent)
}

/// A fully reassembled file, still encrypted if it was sent that way
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    pub metadata: FileMetadata,
    pub data: Bytes,
}

impl ReceivedFile {
    /// Plaintext bytes, decrypting with `passphrase` when needed
    pub fn open(&self, passphrase: Option<&str>) -> Result<Bytes> {
        if !self.metadata.encrypted {
            return Ok(self.data.clone());
        }
        let passphrase = passphrase.ok_or(Error::InvalidPassphrase)?;
        crypto::decrypt(&self.data, passphrase).map(Bytes::from)
    }
}

/// A file being received
#[derive(Debug)]
pub struct IncomingTransfer {
    pub metadata: FileMetadata,
    buffer: BytesMut,
    received: u64,
}

impl IncomingTransfer {
    fn new(metadata: FileMetadata) -> Self {
        let capacity = usize::try_from(metadata.size).unwrap_or(MAX_PREALLOC).min(MAX_PREALLOC);
        Self {
            metadata,
            buffer: BytesMut::with_capacity(capacity),
            received: 0,
        }
    }

    pub fn received(&self) -> u64 {
        self.received
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveEvent {
    Started(FileMetadata),
    Progress { name: String, received: u64, total: u64 },
    Completed(ReceivedFile),
}

/// Receive-side state machine over incoming data frames
#[derive(Debug, Default)]
pub struct FileReceiver {
    current: Option<IncomingTransfer>,
}

impl FileReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&IncomingTransfer> {
        self.current.as_ref()
    }

    /// Drop the partial file, if any (channel closed mid-file)
    pub fn abort(&mut self) -> Option<FileMetadata> {
        self.current.take().map(|t| t.metadata)
    }

    pub fn handle_frame(&mut self, frame: DataFrame) -> Result<Option<ReceiveEvent>> {
        match frame {
            DataFrame::Text(text) => match ControlFrame::parse(&text)? {
                ControlFrame::FileMetadata(metadata) => {
                    if let Some(previous) = self.current.take() {
                        warn!(
                            "Discarding unfinished {} ({} of {} bytes)",
                            previous.metadata.name, previous.received, previous.metadata.size
                        );
                    }
                    info!("Receiving {} ({} bytes)", metadata.name, metadata.size);
                    self.current = Some(IncomingTransfer::new(metadata.clone()));
                    Ok(Some(ReceiveEvent::Started(metadata)))
                }
                ControlFrame::FileEnd {} => self.finish().map(|f| f.map(ReceiveEvent::Completed)),
            },
            DataFrame::Binary(data) => {
                let Some(transfer) = self.current.as_mut() else {
                    warn!("Ignoring {} byte chunk outside a transfer", data.len());
                    return Ok(None);
                };
                let total = transfer.received + data.len() as u64;
                if total > transfer.metadata.size {
                    warn!(
                        "Dropping {}: {} bytes exceed the declared {}",
                        transfer.metadata.name, total, transfer.metadata.size
                    );
                    let Some(transfer) = self.current.take() else {
                        return Ok(None);
                    };
                    return Err(Error::SizeMismatch {
                        name: transfer.metadata.name,
                        declared: transfer.metadata.size,
                        received: total,
                    });
                }
                transfer.buffer.extend_from_slice(&data);
                transfer.received += data.len() as u64;
                Ok(Some(ReceiveEvent::Progress {
                    name: transfer.metadata.name.clone(),
                    received: transfer.received,
                    total: transfer.metadata.size,
                }))
            }
        }
    }

    fn finish(&mut self) -> Result<Option<ReceivedFile>> {
        let Some(transfer) = self.current.take() else {
            warn!("Ignoring file-end outside a transfer");
            return Ok(None);
        };

        if transfer.received != transfer.metadata.size {
            warn!(
                "Size mismatch for {}: declared {}, received {}",
                transfer.metadata.name, transfer.metadata.size, transfer.received
            );
            return Err(Error::SizeMismatch {
                name: transfer.metadata.name,
                declared: transfer.metadata.size,
                received: transfer.received,
            });
        }

        debug!("Completed {}", transfer.metadata.name);
        Ok(Some(ReceivedFile {
            metadata: transfer.metadata,
            data: transfer.buffer.freeze(),
        }))
    }
}
