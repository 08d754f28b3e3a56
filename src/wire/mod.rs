pub mod codec;
pub mod envelope;

use envelope::CommandEnvelope;

pub type ConnectionId = u64;

/// A decoded request stamped with the connection it arrived on.
///
/// `origin` is `None` for commands injected by the process itself.
#[derive(Clone, Debug, PartialEq)]
pub struct CommandRequest {
    pub envelope: CommandEnvelope,
    pub origin: Option<ConnectionId>,
}

impl CommandRequest {
    pub fn from_connection(envelope: CommandEnvelope, origin: ConnectionId) -> Self {
        Self {
            envelope,
            origin: Some(origin),
        }
    }

    pub fn local(envelope: CommandEnvelope) -> Self {
        Self {
            envelope,
            origin: None,
        }
    }
}

/// Bytes a handler wants delivered to one client, framed on the way out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    pub connection_id: ConnectionId,
    pub payload: Vec<u8>,
}
