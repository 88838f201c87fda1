//! Public API for the `sealframe` library.
//!
//! This crate provides a length-prefixed, encrypted, compressed,
//! typed-message transport over TCP: a 3-byte little-endian frame codec that
//! survives arbitrary read fragmentation, a fixed compress-then-encrypt
//! payload pipeline with injectable collaborators, a frozen tag-discriminated
//! message registry, and per-connection full-duplex pumps with lifecycle
//! events.

pub mod buffer_pool;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod frame;
pub mod metrics;
pub mod pipeline;
pub mod registry;
pub mod server;

pub use buffer_pool::BufferPool;
pub use config::{KeepAliveConfig, ServerConfig};
pub use connection::Connection;
pub use error::{FramingError, PipelineError, PipelineStage, RegistryError, Result, TransportError};
pub use events::{ConnectionListener, NoopListener};
pub use frame::{FrameDecoder, FrameEncoder, HEADER_LEN, MAX_PAYLOAD_LEN};
pub use pipeline::{AesGcmCipher, Cipher, Compressor, Identity, Pipeline, ZlibCompressor};
pub use registry::{Message, MessageRegistry, RegistryBuilder, UnknownMessage};
pub use server::{ServerContext, TransportServer};
