//! Length-prefixed frame encoding and decoding.
//!
//! Every frame on the wire is a 3-byte little-endian payload length followed
//! by that many payload bytes. There is no type byte, checksum, or version
//! field. [`FrameDecoder`] reassembles frames from in-order chunks of
//! arbitrary size; [`FrameEncoder`] prepends the header to outgoing payloads.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::FramingError;

/// Size of the frame header in bytes.
pub const HEADER_LEN: usize = 3;

/// Largest payload representable in the 3-byte header (16 MiB minus one).
pub const MAX_PAYLOAD_LEN: usize = (1 << 24) - 1;

/// Decode a 3-byte little-endian length header.
#[inline]
fn read_header(header: [u8; HEADER_LEN]) -> usize {
    usize::from(header[0]) | usize::from(header[1]) << 8 | usize::from(header[2]) << 16
}

/// Receive-side phase of the decoder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    /// Accumulating the 3-byte length header.
    ReadingHeader,
    /// Accumulating payload bytes until `payload_len` is reached.
    ReadingPayload,
}

/// Incremental decoder reassembling frames from fragmented reads.
///
/// The decoder carries its scratch state across chunks: a chunk may split a
/// header mid-way, split a payload, or carry several complete frames. Feeding
/// the same byte stream in any partition of chunks yields the same frame
/// sequence.
///
/// A header that decodes to zero, or to a length above the configured
/// maximum, is a [`FramingError`]. The caller decides the recovery policy;
/// [`FrameDecoder::reset`] abandons the current frame and returns the decoder
/// to a header boundary.
///
/// # Examples
///
/// ```
/// use sealframe::frame::FrameDecoder;
///
/// let mut decoder = FrameDecoder::new(1024);
/// // One frame split across two chunks, boundary inside the header.
/// let frames = decoder.decode_chunk(&[0x02, 0x00]).expect("first chunk");
/// assert!(frames.is_empty());
/// let frames = decoder.decode_chunk(&[0x00, 0xAA, 0xBB]).expect("second chunk");
/// assert_eq!(frames, vec![bytes::Bytes::from_static(&[0xAA, 0xBB])]);
/// ```
#[derive(Debug)]
pub struct FrameDecoder {
    phase: Phase,
    partial_header: [u8; HEADER_LEN],
    partial_header_len: usize,
    payload_len: usize,
    payload: Vec<u8>,
    max_frame_length: usize,
}

impl FrameDecoder {
    /// Create a decoder accepting payloads up to `max_frame_length` bytes.
    ///
    /// The limit is clamped to [`MAX_PAYLOAD_LEN`], the largest value the
    /// 3-byte header can express.
    #[must_use]
    pub fn new(max_frame_length: usize) -> Self {
        Self {
            phase: Phase::ReadingHeader,
            partial_header: [0; HEADER_LEN],
            partial_header_len: 0,
            payload_len: 0,
            payload: Vec::new(),
            max_frame_length: max_frame_length.min(MAX_PAYLOAD_LEN),
        }
    }

    /// Feed one chunk of bytes, returning the payloads of any frames that
    /// completed within it.
    ///
    /// Scratch state persists across calls; the chunk read cursor does not.
    ///
    /// # Errors
    ///
    /// Returns a [`FramingError`] when a header decodes to zero or exceeds
    /// the configured maximum. The remainder of the chunk is not consumed;
    /// call [`reset`](Self::reset) before feeding further chunks.
    pub fn decode_chunk(&mut self, chunk: &[u8]) -> Result<Vec<Bytes>, FramingError> {
        let mut frames = Vec::new();
        let mut rest = chunk;

        while !rest.is_empty() {
            match self.phase {
                Phase::ReadingHeader => {
                    let need = HEADER_LEN - self.partial_header_len;
                    if rest.len() < need {
                        // Chunk ends mid-header: hold the bytes and yield.
                        let end = self.partial_header_len + rest.len();
                        self.partial_header[self.partial_header_len..end].copy_from_slice(rest);
                        self.partial_header_len = end;
                        break;
                    }
                    self.partial_header[self.partial_header_len..HEADER_LEN]
                        .copy_from_slice(&rest[..need]);
                    rest = &rest[need..];
                    self.partial_header_len = 0;

                    let len = read_header(self.partial_header);
                    if len == 0 {
                        return Err(FramingError::ZeroLengthFrame);
                    }
                    if len > self.max_frame_length {
                        return Err(FramingError::OversizedFrame {
                            size: len,
                            max: self.max_frame_length,
                        });
                    }
                    self.payload_len = len;
                    self.payload = Vec::with_capacity(len);
                    self.phase = Phase::ReadingPayload;
                }
                Phase::ReadingPayload => {
                    let take = rest.len().min(self.payload_len - self.payload.len());
                    self.payload.extend_from_slice(&rest[..take]);
                    rest = &rest[take..];

                    if self.payload.len() == self.payload_len {
                        frames.push(Bytes::from(std::mem::take(&mut self.payload)));
                        self.payload_len = 0;
                        self.phase = Phase::ReadingHeader;
                    }
                }
            }
        }

        Ok(frames)
    }

    /// Abandon any partially decoded frame and return to a header boundary.
    pub fn reset(&mut self) {
        self.phase = Phase::ReadingHeader;
        self.partial_header_len = 0;
        self.payload_len = 0;
        self.payload = Vec::new();
    }

    /// Payload bytes buffered for the frame currently being assembled.
    #[must_use]
    pub fn buffered(&self) -> usize { self.payload.len() }

    /// Whether the decoder sits at a frame boundary with no partial state.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.phase == Phase::ReadingHeader && self.partial_header_len == 0
    }
}

/// Encoder prepending the 3-byte little-endian length header.
#[derive(Clone, Copy, Debug)]
pub struct FrameEncoder {
    max_frame_length: usize,
}

impl FrameEncoder {
    /// Create an encoder rejecting payloads above `max_frame_length` bytes.
    #[must_use]
    pub fn new(max_frame_length: usize) -> Self {
        Self {
            max_frame_length: max_frame_length.min(MAX_PAYLOAD_LEN),
        }
    }

    /// Frame `payload` into a single buffer of header plus payload bytes.
    ///
    /// # Errors
    ///
    /// Returns [`FramingError::OversizedFrame`] when the payload exceeds the
    /// configured maximum, and [`FramingError::ZeroLengthFrame`] for an empty
    /// payload, which the header cannot represent distinguishably.
    pub fn encode(&self, payload: &[u8]) -> Result<Bytes, FramingError> {
        if payload.is_empty() {
            return Err(FramingError::ZeroLengthFrame);
        }
        if payload.len() > self.max_frame_length {
            return Err(FramingError::OversizedFrame {
                size: payload.len(),
                max: self.max_frame_length,
            });
        }

        let mut frame = BytesMut::with_capacity(HEADER_LEN + payload.len());
        frame.put_u8((payload.len() & 0xFF) as u8);
        frame.put_u8((payload.len() >> 8 & 0xFF) as u8);
        frame.put_u8((payload.len() >> 16 & 0xFF) as u8);
        frame.extend_from_slice(payload);
        Ok(frame.freeze())
    }
}

impl Default for FrameEncoder {
    fn default() -> Self { Self::new(MAX_PAYLOAD_LEN) }
}
