pub mod manager;

use std::collections::HashMap;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};

use crate::config;
use crate::wire::codec::{encode_frame, CodecError, FrameDecoder, CHUNK_SIZE_BYTES};
use crate::wire::ConnectionId;

pub use manager::ConnectionManager;

/// Upper bound on bytes pulled from one connection per poll cycle.
pub const MAX_READ_PER_CYCLE_BYTES: usize = CHUNK_SIZE_BYTES * 16;

#[derive(Debug)]
pub enum ServerError {
    Bind {
        address: String,
        source: io::Error,
    },
    SetNonBlocking {
        source: io::Error,
    },
    Accept {
        source: io::Error,
    },
    ConfigureAcceptedStream {
        source: io::Error,
    },
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bind { address, source } => {
                write!(f, "failed to bind TCP server on {address}: {source}")
            }
            Self::SetNonBlocking { source } => {
                write!(f, "failed to set TCP server to non-blocking mode: {source}")
            }
            Self::Accept { source } => write!(f, "failed to accept TCP connection: {source}"),
            Self::ConfigureAcceptedStream { source } => {
                write!(f, "failed to configure accepted TCP stream: {source}")
            }
        }
    }
}

impl std::error::Error for ServerError {}

/// Result of draining everything currently readable from a socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadStatus {
    pub bytes_read: usize,
    pub peer_closed: bool,
}

/// An accepted client socket plus the buffers needed to frame across partial IO.
pub struct PersistentConnection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    stream: TcpStream,
    decoder: FrameDecoder,
    outbound: Vec<u8>,
}

impl PersistentConnection {
    fn new(
        id: ConnectionId,
        stream: TcpStream,
        peer_addr: SocketAddr,
        max_message_size_bytes: usize,
    ) -> Result<Self, ServerError> {
        stream
            .set_nodelay(true)
            .map_err(|source| ServerError::ConfigureAcceptedStream { source })?;
        stream
            .set_nonblocking(true)
            .map_err(|source| ServerError::ConfigureAcceptedStream { source })?;

        Ok(Self {
            id,
            peer_addr,
            stream,
            decoder: FrameDecoder::new(max_message_size_bytes),
            outbound: Vec::new(),
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Reads until the socket would block or [`MAX_READ_PER_CYCLE_BYTES`] have arrived.
    ///
    /// Stops early once the buffered header exceeds the size limit; the next
    /// [`PersistentConnection::next_frame`] call reports it. A zero-length read
    /// marks the peer as closed.
    pub fn read_available(&mut self) -> io::Result<ReadStatus> {
        let mut buffer = [0_u8; CHUNK_SIZE_BYTES];
        let mut status = ReadStatus {
            bytes_read: 0,
            peer_closed: false,
        };

        while status.bytes_read < MAX_READ_PER_CYCLE_BYTES {
            let want = (MAX_READ_PER_CYCLE_BYTES - status.bytes_read).min(CHUNK_SIZE_BYTES);
            match self.stream.read(&mut buffer[..want]) {
                Ok(0) => {
                    status.peer_closed = true;
                    return Ok(status);
                }
                Ok(read) => {
                    self.decoder.push(&buffer[..read]);
                    status.bytes_read += read;
                    if self.decoder.check_pending().is_err() {
                        return Ok(status);
                    }
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => return Ok(status),
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => return Err(error),
            }
        }
        Ok(status)
    }

    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, CodecError> {
        self.decoder.next_frame()
    }

    pub fn queue_frame(&mut self, payload: &[u8]) {
        self.outbound.extend_from_slice(&encode_frame(payload));
    }

    pub fn has_pending_output(&self) -> bool {
        !self.outbound.is_empty()
    }

    /// Writes queued output in bounded chunks until done or the socket would block.
    pub fn flush(&mut self) -> io::Result<usize> {
        let mut written_total = 0;
        while !self.outbound.is_empty() {
            let end = self.outbound.len().min(CHUNK_SIZE_BYTES);
            match self.stream.write(&self.outbound[..end]) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
                Ok(written) => {
                    self.outbound.drain(..written);
                    written_total += written;
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => break,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => return Err(error),
            }
        }
        Ok(written_total)
    }

    pub fn shutdown(&self) -> io::Result<()> {
        self.stream.shutdown(Shutdown::Both)
    }
}

/// Non-blocking listener owning every live client connection.
pub struct TcpServer {
    listener: TcpListener,
    max_message_size_bytes: usize,
    next_connection_id: ConnectionId,
    connections: HashMap<ConnectionId, PersistentConnection>,
}

impl TcpServer {
    pub fn bind(
        config: &config::ServerConfig,
        max_message_size_bytes: usize,
    ) -> Result<Self, ServerError> {
        let address = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(&address).map_err(|source| ServerError::Bind {
            address,
            source,
        })?;
        listener
            .set_nonblocking(true)
            .map_err(|source| ServerError::SetNonBlocking { source })?;

        Ok(Self {
            listener,
            max_message_size_bytes,
            next_connection_id: 1,
            connections: HashMap::new(),
        })
    }

    pub fn from_app_config(app_config: &config::AppConfig) -> Result<Self, ServerError> {
        Self::bind(&app_config.server, app_config.wire.max_message_size_bytes)
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn try_accept_persistent(&mut self) -> Result<Option<ConnectionId>, ServerError> {
        match self.listener.accept() {
            Ok((stream, peer_addr)) => {
                let id = self.next_connection_id;
                self.next_connection_id += 1;
                let connection =
                    PersistentConnection::new(id, stream, peer_addr, self.max_message_size_bytes)?;
                self.connections.insert(id, connection);
                Ok(Some(id))
            }
            Err(source) if source.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(source) => Err(ServerError::Accept { source }),
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.connections.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn connection_mut(&mut self, id: ConnectionId) -> Option<&mut PersistentConnection> {
        self.connections.get_mut(&id)
    }

    /// Closes and forgets one connection; returns it if it was still tracked.
    pub fn drop_connection(&mut self, id: ConnectionId) -> Option<PersistentConnection> {
        let connection = self.connections.remove(&id)?;
        let _ = connection.shutdown();
        Some(connection)
    }

    pub fn shutdown_all_connections(&mut self) {
        for connection in self.connections.values() {
            let _ = connection.shutdown();
        }
        self.connections.clear();
    }
}
