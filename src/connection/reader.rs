//! Receive pump: socket reader producer and decode consumer.
//!
//! The reader owns one pooled buffer and the chunk channel sender; the
//! decode consumer owns the frame decoder scratch state, so no lock guards
//! it. Dropping the sender (on read error, remote close, or cancellation)
//! lets the consumer finish the queued chunks and exit.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use log::{error, info, warn};
use tokio::{io::AsyncReadExt, net::tcp::OwnedReadHalf, sync::mpsc};

use super::Connection;
use crate::{
    frame::FrameDecoder,
    metrics::{self, Direction},
};

/// Producer half: read the socket into the pooled buffer and forward chunks.
pub(super) async fn run_reader(
    connection: Arc<Connection>,
    mut read_half: OwnedReadHalf,
    chunk_tx: mpsc::Sender<Bytes>,
    mut buffer: BytesMut,
) {
    loop {
        tokio::select! {
            () = connection.cancelled() => break,
            result = read_half.read_buf(&mut buffer) => match result {
                Ok(0) => {
                    info!("peer closed connection: peer={}", connection.peer_addr());
                    break;
                }
                Ok(read) => {
                    // Copy out so the pooled buffer can be refilled while the
                    // consumer still holds earlier chunks.
                    let chunk = Bytes::copy_from_slice(&buffer[..read]);
                    buffer.clear();
                    if chunk_tx.send(chunk).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!(
                        "socket read failed: peer={}, error={e}",
                        connection.peer_addr()
                    );
                    break;
                }
            },
        }
    }

    connection.context().pool().release(buffer);
    drop(chunk_tx);
    connection.log_pump_exit("reader");
    connection.disconnect();
}

/// Outcome of delivering one decoded frame.
enum Delivery {
    /// Frame delivered, or dropped in a way that leaves the stream usable.
    Continue,
    /// Pipeline failure: abandon the rest of the current chunk.
    AbortChunk,
}

/// Consumer half: drain the chunk channel through decoder, pipeline, and
/// registry, emitting a read event per message.
pub(super) async fn run_decoder(connection: Arc<Connection>, mut chunk_rx: mpsc::Receiver<Bytes>) {
    let mut decoder = FrameDecoder::new(connection.context().config().max_frame_length());

    while let Some(chunk) = chunk_rx.recv().await {
        connection.set_receiving(true);
        connection.context().add_bytes_received(chunk.len() as u64);

        match decoder.decode_chunk(&chunk) {
            Ok(frames) => {
                for payload in frames {
                    if let Delivery::AbortChunk = deliver(&connection, &payload) {
                        decoder.reset();
                        break;
                    }
                }
            }
            Err(e) => {
                // The connection stays open; the decoder resumes at a header
                // boundary with the next chunk.
                warn!(
                    "framing error, rest of chunk dropped: peer={}, error={e}",
                    connection.peer_addr()
                );
                metrics::inc_framing_errors();
                decoder.reset();
            }
        }

        if chunk_rx.is_empty() {
            connection.set_receiving(false);
        }
    }

    connection.set_receiving(false);
    connection.log_pump_exit("decode");
    connection.disconnect();
}

/// Run one frame payload through decrypt, decompress, and deserialize.
fn deliver(connection: &Arc<Connection>, payload: &[u8]) -> Delivery {
    let plaintext = match connection.context().pipeline().inbound(payload) {
        Ok(plaintext) => plaintext,
        Err(e) => {
            warn!(
                "frame dropped: pipeline error: peer={}, error={e}",
                connection.peer_addr()
            );
            metrics::inc_pipeline_errors();
            return Delivery::AbortChunk;
        }
    };

    match connection.context().registry().deserialize(&plaintext) {
        Ok(message) => {
            metrics::inc_frames(Direction::Inbound);
            connection
                .context()
                .listener()
                .message_received(connection, message);
            Delivery::Continue
        }
        Err(e) => {
            warn!(
                "frame dropped: undecodable message: peer={}, error={e}",
                connection.peer_addr()
            );
            metrics::inc_decode_errors();
            Delivery::Continue
        }
    }
}
