//! Per-connection state handed from the manager to the transport layer.

use tokio::sync::mpsc;

use crate::domain::{Identity, OutboundFrame, SessionId};

/// An accepted connection, ready to have its pumps started.
///
/// `outbound` is the receiving end of the connection's bounded outbound
/// queue. Rooms and the manager hold the sending ends; the queue closes
/// once the manager has torn the connection down and every room has
/// processed the matching unregister.
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub identity: Identity,
    /// Unix millis at which the manager accepted the connection.
    pub connected_at: i64,
    pub outbound: mpsc::Receiver<OutboundFrame>,
}
