//! Tag channel capability
//!
//! One implementation per reader chip / transport. The writer only ever sees
//! a `Box<dyn TagChannel>`.

use std::fmt;
use std::time::Duration;

/// Unique identifier (NFCID1) of a tag in the field
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TagId(Vec<u8>);

impl TagId {
    pub fn new(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for TagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&data_encoding::HEXUPPER.encode(&self.0))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    #[error("failed to open {device}: {reason}")]
    Open { device: String, reason: String },
    #[error("reader is not open")]
    NotOpen,
    #[error("reader I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "serial")]
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("timed out waiting for the reader")]
    Timeout,
    #[error("reader protocol error: {0}")]
    Protocol(String),
    #[error("tag left the field")]
    TagLost,
    #[error("tag rejected command 0x{command:02x} (status 0x{status:02x})")]
    TagStatus { command: u8, status: u8 },
    #[error("tag is not NDEF formatted")]
    NotFormatted,
    #[error("record needs {needed} bytes, tag holds {capacity}")]
    TagTooSmall { needed: usize, capacity: usize },
    #[error("invalid tag data: {0}")]
    Data(#[from] wipi_proto::type2::TlvError),
    #[error("{0}")]
    Simulated(String),
}

pub type Result<T> = std::result::Result<T, HardwareError>;

/// Trait for NFC reader transports
///
/// Every operation may block; callers keep them off latency sensitive threads.
pub trait TagChannel: Send {
    /// Short description of the transport for logs, e.g. `pn532 on /dev/ttyS0`
    fn describe(&self) -> String;

    /// Acquire the transport. Calling it on an open channel is a no-op.
    fn open(&mut self) -> Result<()>;

    /// Wait up to `timeout` for a tag. `Ok(None)` means no tag was presented.
    fn poll_for_tag(&mut self, timeout: Duration) -> Result<Option<TagId>>;

    /// Write an NDEF message to the tag returned by the last poll
    fn write_record(&mut self, record: &[u8]) -> Result<()>;

    /// Read the NDEF message back from the tag returned by the last poll
    fn read_record(&mut self) -> Result<Vec<u8>>;

    /// Release the transport. Safe to call repeatedly or on a channel never opened.
    fn close(&mut self) -> Result<()>;
}
