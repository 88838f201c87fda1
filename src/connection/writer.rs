//! Send pump: frame queued plaintexts and write them to the socket.

use std::sync::Arc;

use log::{error, warn};
use tokio::{io::AsyncWriteExt, net::tcp::OwnedWriteHalf, sync::mpsc};

use super::Connection;
use crate::{
    error::TransportError,
    frame::FrameEncoder,
    metrics::{self, Direction},
};

/// Consumer: dequeue serialized payloads, apply compress then encrypt, frame
/// with the 3-byte header built from the encrypted length, and write header
/// plus payload to the socket in one call.
pub(super) async fn run_writer(
    connection: Arc<Connection>,
    mut write_half: OwnedWriteHalf,
    mut send_rx: mpsc::Receiver<Vec<u8>>,
) {
    let encoder = FrameEncoder::new(connection.context().config().max_frame_length());

    loop {
        let plaintext = tokio::select! {
            () = connection.cancelled() => break,
            item = send_rx.recv() => match item {
                Some(plaintext) => plaintext,
                None => break,
            },
        };
        connection.set_sending(true);

        match seal(&connection, &encoder, &plaintext) {
            Ok(frame) => {
                if let Err(e) = write_half.write_all(&frame).await {
                    error!(
                        "socket write failed: peer={}, error={e}",
                        connection.peer_addr()
                    );
                    drain(&mut send_rx);
                    connection.set_sending(false);
                    connection.log_pump_exit("send");
                    connection.disconnect();
                    return;
                }
                connection.context().add_bytes_sent(frame.len() as u64);
                metrics::inc_frames(Direction::Outbound);
            }
            Err(e) => {
                warn!(
                    "outbound frame dropped: peer={}, error={e}",
                    connection.peer_addr()
                );
                metrics::inc_pipeline_errors();
            }
        }

        if send_rx.is_empty() {
            connection.set_sending(false);
        }
    }

    connection.set_sending(false);
    connection.log_pump_exit("send");
    connection.disconnect();
}

/// Apply the outbound pipeline and frame the result.
fn seal(
    connection: &Arc<Connection>,
    encoder: &FrameEncoder,
    plaintext: &[u8],
) -> Result<bytes::Bytes, TransportError> {
    let sealed = connection.context().pipeline().outbound(plaintext)?;
    Ok(encoder.encode(&sealed)?)
}

/// Discard everything still queued after a write failure.
fn drain(send_rx: &mut mpsc::Receiver<Vec<u8>>) {
    while send_rx.try_recv().is_ok() {}
}
