//! Listener interface for connection lifecycle and message events.

use std::sync::Arc;

use crate::{connection::Connection, registry::Message};

/// Callbacks invoked by a connection's pumps.
///
/// All methods default to no-ops, so implementations override only the
/// events they care about. Callbacks run inline on the pump tasks: a slow
/// `message_received` delays later frames on the same connection.
pub trait ConnectionListener: Send + Sync {
    /// The connection transitioned between connected and disconnected.
    ///
    /// Fires at most once per transition; the disconnect event fires exactly
    /// once over the connection's lifetime.
    fn state_changed(&self, connection: &Arc<Connection>, connected: bool) {
        let _ = (connection, connected);
    }

    /// A message completed the receive pipeline.
    ///
    /// Emissions are strictly ordered per connection.
    fn message_received(&self, connection: &Arc<Connection>, message: Box<dyn Message>) {
        let _ = (connection, message);
    }

    /// A message was accepted for sending.
    ///
    /// Fires at submission with the serialized plaintext, before the bytes
    /// reach the wire; it is not a delivery signal.
    fn message_sent(
        &self,
        connection: &Arc<Connection>,
        message: &dyn Message,
        len: usize,
        plaintext: &[u8],
    ) {
        let _ = (connection, message, len, plaintext);
    }
}

/// Listener discarding every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopListener;

impl ConnectionListener for NoopListener {}
