//! Error types for the transport layer.
//!
//! The taxonomy distinguishes framing errors (wire-level frame boundary
//! issues), pipeline errors (compression or cipher failures), registry errors
//! (schema-level encode/decode failures), and transport errors (I/O and
//! resource failures that are fatal for a connection).
//!
//! Propagation policy: transport errors idempotently drive the connection to
//! disconnected. Framing and pipeline errors are swallowed at the pump
//! boundary — the offending frame is dropped, the decoder resets, and the
//! connection stays open — but they are always logged.

use std::io;

use thiserror::Error;

/// Wire-level errors in frame structure.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    /// A frame header decoded to a zero payload length.
    #[error("frame header decoded to zero length")]
    ZeroLengthFrame,

    /// Frame length prefix indicates a size exceeding the configured maximum.
    #[error("frame exceeds max length: {size} > {max}")]
    OversizedFrame {
        /// Payload size indicated by the length prefix.
        size: usize,
        /// Maximum allowed payload size.
        max: usize,
    },
}

/// Stage of the crypto/compress pipeline that produced an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineStage {
    Compress,
    Decompress,
    Encrypt,
    Decrypt,
}

impl PipelineStage {
    /// Lower-case stage name used in log output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Compress => "compress",
            Self::Decompress => "decompress",
            Self::Encrypt => "encrypt",
            Self::Decrypt => "decrypt",
        }
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by the compression and cipher collaborators.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A pipeline stage failed outright.
    #[error("{stage} failed: {reason}")]
    Stage {
        /// Stage that failed.
        stage: PipelineStage,
        /// Failure description from the collaborator.
        reason: String,
    },

    /// A pipeline stage produced empty output for a non-empty input.
    ///
    /// An empty result from decrypt or decompress cannot carry a message, so
    /// the frame is dropped.
    #[error("{stage} produced empty output")]
    EmptyOutput {
        /// Stage that produced no bytes.
        stage: PipelineStage,
    },
}

impl PipelineError {
    /// Build a [`PipelineError::Stage`] from any displayable failure.
    pub fn stage(stage: PipelineStage, reason: impl ToString) -> Self {
        Self::Stage {
            stage,
            reason: reason.to_string(),
        }
    }
}

/// Schema-level errors from the message registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The message type was never registered and has no wire tag.
    #[error("message type {type_name} is not registered")]
    UnregisteredMessage {
        /// Rust type name of the offending message.
        type_name: &'static str,
    },

    /// The plaintext is too short to carry the tag discriminator.
    #[error("payload too short for tag envelope: {len} < 4")]
    TruncatedEnvelope {
        /// Plaintext length observed.
        len: usize,
    },

    /// Serializing a message body failed.
    #[error("message encode failed: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    /// Deserializing a message body failed.
    #[error("message decode failed: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

/// Top-level error type for connection and server operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    /// Socket read or write failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A wire-level framing error.
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// A compression or cipher failure.
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// A schema-level encode or decode failure.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// A pump channel closed while the connection was still in use.
    #[error("connection channel closed")]
    ChannelClosed,

    /// The send queue is at its high-water mark.
    #[error("send queue full")]
    SendQueueFull,

    /// The receive buffer pool has no buffers left.
    #[error("buffer pool exhausted")]
    PoolExhausted,

    /// The operation requires a connected peer.
    #[error("connection is disconnected")]
    Disconnected,
}

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, TransportError>;
