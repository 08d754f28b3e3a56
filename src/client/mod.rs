use std::fmt;
use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use serde_json::Value;

use crate::commands::REPLYING_COMMANDS;
use crate::wire::codec::{receive_frame, send_frame, DEFAULT_MAX_MESSAGE_SIZE_BYTES};
use crate::wire::envelope::CommandEnvelope;

#[derive(Debug)]
pub enum ClientError {
    Connect { address: String, source: io::Error },
    Io(io::Error),
    ConnectionClosed,
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect { address, source } => write!(f, "failed to connect to {address}: {source}"),
            Self::Io(source) => write!(f, "transport error: {source}"),
            Self::ConnectionClosed => write!(f, "server closed the connection before replying"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<io::Error> for ClientError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// Blocking client for the framed command protocol.
pub struct ControlClient {
    stream: TcpStream,
    max_message_size_bytes: usize,
}

impl ControlClient {
    pub fn connect(address: impl ToSocketAddrs + fmt::Display) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(&address).map_err(|source| ClientError::Connect {
            address: address.to_string(),
            source,
        })?;
        stream.set_nodelay(true)?;

        Ok(Self {
            stream,
            max_message_size_bytes: DEFAULT_MAX_MESSAGE_SIZE_BYTES,
        })
    }

    pub fn set_reply_timeout(&mut self, timeout: Option<Duration>) -> Result<(), ClientError> {
        self.stream.set_read_timeout(timeout)?;
        Ok(())
    }

    pub fn send(&mut self, command: &str, args: Value) -> Result<(), ClientError> {
        let payload = CommandEnvelope::new(command, args).encode();
        send_frame(&mut self.stream, &payload)?;
        Ok(())
    }

    /// Waits for the next reply. An empty or truncated frame means the server hung up.
    pub fn receive(&mut self) -> Result<Vec<u8>, ClientError> {
        let payload = receive_frame(&mut self.stream, self.max_message_size_bytes)?;
        if payload.is_empty() {
            return Err(ClientError::ConnectionClosed);
        }
        Ok(payload)
    }

    pub fn request(&mut self, command: &str, args: Value) -> Result<Vec<u8>, ClientError> {
        self.send(command, args)?;
        self.receive()
    }
}

pub fn expects_reply(command: &str) -> bool {
    REPLYING_COMMANDS.contains(&command)
}
