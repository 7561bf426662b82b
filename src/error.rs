//! Error type shared by every layer of the codec.

use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TapeError>;

#[derive(Error, Debug)]
pub enum TapeError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The requested file is not on the tape.
    #[error("File not found on tape: {0:?}")]
    NotFound(String),

    /// Neither a CAS nor a WAV structure could be recognised.
    #[error("Unrecognized container: {0}")]
    Unrecognized(String),

    #[error("Malformed WAV header: {0}")]
    MalformedHeader(String),

    #[error("Unsupported WAV format: {0}")]
    UnsupportedFormat(String),

    /// Sync marker not found within the scan bound, or a bad trailer byte.
    #[error("Framing error at bit {bit_position}: {reason}")]
    Framing { bit_position: u64, reason: String },

    #[error(
        "Checksum mismatch in block type {block_type:#04x}: expected {expected:#04x}, got {actual:#04x}"
    )]
    ChecksumMismatch { block_type: u8, expected: u8, actual: u8 },

    /// The stream ended mid-block or mid-bit.
    #[error("Unexpected end of stream: {0}")]
    UnexpectedEof(String),

    #[error("Operation not permitted in {mode:?} mode: {operation}")]
    InvalidMode { mode: crate::tape::AccessMode, operation: &'static str },

    #[error("Invalid tape filename: {0:?}")]
    InvalidFilename(String),

    #[error("Malformed directory entry: {0}")]
    MalformedEntry(String),

    #[error("Invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl TapeError {
    /// True for failures that leave the stream usable for another block scan.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TapeError::ChecksumMismatch { .. } | TapeError::Framing { .. } | TapeError::MalformedEntry(_)
        )
    }
}

impl From<TapeError> for io::Error {
    fn from(e: TapeError) -> Self {
        match e {
            TapeError::Io(inner) => inner,
            TapeError::NotFound(_) => io::Error::new(io::ErrorKind::NotFound, e),
            TapeError::UnexpectedEof(_) => io::Error::new(io::ErrorKind::UnexpectedEof, e),
            TapeError::InvalidMode { .. } => io::Error::new(io::ErrorKind::PermissionDenied, e),
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
