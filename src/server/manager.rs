use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::json;

use crate::logging::{LogLevel, Logger};
use crate::shutdown::StopSignal;
use crate::state::RenderState;
use crate::wire::envelope::CommandEnvelope;
use crate::wire::{CommandRequest, ConnectionId, Reply};

use super::TcpServer;

const LOG_CONTEXT: &str = "server::connections";

/// Multiplexes the listener and all clients on one thread.
///
/// Each cycle accepts pending clients, turns every complete frame into a
/// [`CommandRequest`] on the inbound queue, then drains the reply queue back
/// onto the matching sockets.
pub struct ConnectionManager {
    server: TcpServer,
    inbound: Sender<CommandRequest>,
    replies: Receiver<Reply>,
    state: Arc<RenderState>,
    stop: StopSignal,
    logger: Arc<Logger>,
    poll_interval: Duration,
}

impl ConnectionManager {
    pub fn new(
        server: TcpServer,
        inbound: Sender<CommandRequest>,
        replies: Receiver<Reply>,
        state: Arc<RenderState>,
        stop: StopSignal,
        logger: Arc<Logger>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            server,
            inbound,
            replies,
            state,
            stop,
            logger,
            poll_interval,
        }
    }

    pub fn run(mut self) {
        if let Ok(address) = self.server.local_addr() {
            self.logger.log(
                LogLevel::Info,
                Some(LOG_CONTEXT),
                "Connection manager listening",
                Some(json!({ "address": address.to_string() })),
            );
        }

        while !self.stop.is_triggered() {
            if !self.poll_once() {
                thread::sleep(self.poll_interval);
            }
        }

        let open = self.server.connection_count();
        self.server.shutdown_all_connections();
        self.logger.info(
            Some(LOG_CONTEXT),
            &format!("Connection manager stopped; closed {open} connections"),
        );
    }

    /// One accept/read/reply cycle. Returns whether any IO happened.
    pub fn poll_once(&mut self) -> bool {
        let mut busy = self.accept_pending();
        for id in self.server.connection_ids() {
            busy |= self.service_connection(id);
        }
        busy |= self.drain_replies();
        busy |= self.flush_pending();
        busy
    }

    fn accept_pending(&mut self) -> bool {
        let mut accepted = false;
        loop {
            match self.server.try_accept_persistent() {
                Ok(Some(id)) => {
                    accepted = true;
                    let peer = self
                        .server
                        .connection_mut(id)
                        .map(|connection| connection.peer_addr().to_string());
                    self.logger.log(
                        LogLevel::Info,
                        Some(LOG_CONTEXT),
                        "Accepted connection",
                        Some(json!({ "connection_id": id, "peer": peer })),
                    );
                }
                Ok(None) => return accepted,
                Err(error) => {
                    self.logger.warn(Some(LOG_CONTEXT), &error.to_string());
                    return accepted;
                }
            }
        }
    }

    fn service_connection(&mut self, id: ConnectionId) -> bool {
        let verbose = self.state.settings().verbose;
        let Some(connection) = self.server.connection_mut(id) else {
            return false;
        };

        let status = match connection.read_available() {
            Ok(status) => status,
            Err(error) => {
                self.logger.warn(
                    Some(LOG_CONTEXT),
                    &format!("Read failed on connection {id}: {error}"),
                );
                self.close(id, "read error");
                return true;
            }
        };

        let mut payloads = Vec::new();
        let mut protocol_error = None;
        loop {
            match connection.next_frame() {
                Ok(Some(payload)) => payloads.push(payload),
                Ok(None) => break,
                Err(error) => {
                    protocol_error = Some(error);
                    break;
                }
            }
        }

        for payload in payloads {
            if verbose {
                self.logger.info(
                    Some(LOG_CONTEXT),
                    &format!("Received {} byte message from connection {id}", payload.len()),
                );
            }
            self.enqueue(id, &payload);
        }

        if let Some(error) = protocol_error {
            self.logger.error(
                Some(LOG_CONTEXT),
                &format!("Protocol violation on connection {id}: {error}"),
            );
            self.close(id, "protocol violation");
        } else if status.peer_closed {
            self.close(id, "peer closed");
        }

        status.bytes_read > 0 || status.peer_closed
    }

    fn enqueue(&self, id: ConnectionId, payload: &[u8]) {
        match CommandEnvelope::decode(payload) {
            Ok(envelope) => {
                if self
                    .inbound
                    .send(CommandRequest::from_connection(envelope, id))
                    .is_err()
                {
                    self.logger
                        .error(Some(LOG_CONTEXT), "Inbound queue closed; message dropped");
                }
            }
            Err(error) => {
                self.logger.warn(
                    Some(LOG_CONTEXT),
                    &format!("Discarded message from connection {id}: {error}"),
                );
            }
        }
    }

    fn drain_replies(&mut self) -> bool {
        let verbose = self.state.settings().verbose;
        let mut delivered = false;

        loop {
            let reply = match self.replies.try_recv() {
                Ok(reply) => reply,
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return delivered,
            };
            delivered = true;

            match self.server.connection_mut(reply.connection_id) {
                Some(connection) => {
                    connection.queue_frame(&reply.payload);
                    if verbose {
                        self.logger.info(
                            Some(LOG_CONTEXT),
                            &format!(
                                "Queued {} byte reply for connection {}",
                                reply.payload.len(),
                                reply.connection_id
                            ),
                        );
                    }
                }
                None => self.logger.warn(
                    Some(LOG_CONTEXT),
                    &format!(
                        "Dropped {} byte reply for closed connection {}",
                        reply.payload.len(),
                        reply.connection_id
                    ),
                ),
            }
        }
    }

    fn flush_pending(&mut self) -> bool {
        let mut wrote = false;
        for id in self.server.connection_ids() {
            let Some(connection) = self.server.connection_mut(id) else {
                continue;
            };
            if !connection.has_pending_output() {
                continue;
            }
            match connection.flush() {
                Ok(written) => wrote |= written > 0,
                Err(error) => {
                    self.logger.warn(
                        Some(LOG_CONTEXT),
                        &format!("Write failed on connection {id}: {error}"),
                    );
                    self.close(id, "write error");
                    wrote = true;
                }
            }
        }
        wrote
    }

    fn close(&mut self, id: ConnectionId, reason: &str) {
        if let Some(connection) = self.server.drop_connection(id) {
            self.logger.log(
                LogLevel::Info,
                Some(LOG_CONTEXT),
                "Closed connection",
                Some(json!({
                    "connection_id": connection.id(),
                    "peer": connection.peer_addr().to_string(),
                    "reason": reason
                })),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::{SocketAddr, TcpStream};
    use std::sync::mpsc::{self, Receiver, Sender};
    use std::sync::Arc;
    use std::thread::{self, JoinHandle};
    use std::time::Duration;

    use serde_json::json;

    use crate::config::ServerConfig;
    use crate::logging::tests::{memory_logger_at, MemorySink};
    use crate::logging::LogLevel;
    use crate::model::{Frame, Rgb, Sequence};
    use crate::server::TcpServer;
    use crate::shutdown::StopSignal;
    use crate::state::{RenderSettings, RenderState};
    use crate::wire::codec::{receive_frame, send_frame};
    use crate::wire::{CommandRequest, Reply};

    use super::ConnectionManager;

    struct Running {
        addr: SocketAddr,
        inbound: Receiver<CommandRequest>,
        replies: Sender<Reply>,
        stop: StopSignal,
        sink: Arc<MemorySink>,
        handle: JoinHandle<()>,
    }

    impl Running {
        fn client(&self) -> TcpStream {
            let client = TcpStream::connect(self.addr).expect("client should connect");
            client
                .set_read_timeout(Some(Duration::from_secs(5)))
                .expect("read timeout");
            client
        }

        fn next_request(&self) -> CommandRequest {
            self.inbound
                .recv_timeout(Duration::from_secs(5))
                .expect("a request should arrive")
        }

        fn finish(self) -> Arc<MemorySink> {
            self.stop.trigger();
            self.handle.join().expect("manager thread should exit");
            self.sink
        }
    }

    fn start(max_message_size_bytes: usize) -> Running {
        start_with(max_message_size_bytes, true)
    }

    fn start_with(max_message_size_bytes: usize, verbose: bool) -> Running {
        let server = TcpServer::bind(
            &ServerConfig {
                host: "127.0.0.1".to_owned(),
                port: 0,
                poll_interval_ms: 2,
            },
            max_message_size_bytes,
        )
        .expect("server should bind");
        let addr = server.local_addr().expect("local addr");
        let (logger, sink) = memory_logger_at(LogLevel::Info);
        let (inbound_tx, inbound_rx) = mpsc::channel();
        let (replies_tx, replies_rx) = mpsc::channel();
        let state = Arc::new(RenderState::new(
            1,
            RenderSettings {
                fps: 30.0,
                brightness: 1.0,
                show_fps: false,
                verbose,
            },
            Sequence::single("boot", Frame::filled(Rgb::BLACK, 1)),
        ));
        let stop = StopSignal::new();

        let manager = ConnectionManager::new(
            server,
            inbound_tx,
            replies_rx,
            state,
            stop.clone(),
            logger,
            Duration::from_millis(2),
        );
        let handle = thread::spawn(move || manager.run());

        Running {
            addr,
            inbound: inbound_rx,
            replies: replies_tx,
            stop,
            sink,
            handle,
        }
    }

    #[test]
    fn stamps_requests_with_origin_and_routes_replies_back() {
        let running = start(1024 * 1024);
        let mut first = running.client();
        let mut second = running.client();

        send_frame(&mut first, br#"{"command":"fill","args":[1,2,3]}"#).expect("send fill");
        let fill = running.next_request();
        send_frame(&mut second, br#"{"command":"get_log"}"#).expect("send get_log");
        let get_log = running.next_request();

        assert_eq!(fill.envelope.command, "fill");
        assert_eq!(fill.envelope.args, json!([1, 2, 3]));
        assert_eq!(get_log.envelope.args, serde_json::Value::Null);
        let (first_id, second_id) = (
            fill.origin.expect("stamped origin"),
            get_log.origin.expect("stamped origin"),
        );
        assert_ne!(first_id, second_id);

        running
            .replies
            .send(Reply {
                connection_id: second_id,
                payload: b"\"log text\"".to_vec(),
            })
            .expect("reply queue open");
        let reply = receive_frame(&mut second, 1024).expect("second client gets the reply");
        assert_eq!(reply, b"\"log text\"");

        let sink = running.finish();
        assert!(sink.contains("[INFO] [server::connections] Received 33 byte message"));
        assert!(sink.contains(&format!("Queued 10 byte reply for connection {second_id}")));
    }

    #[test]
    fn quiet_transport_logs_no_per_message_lines() {
        let running = start_with(1024, false);
        let mut client = running.client();

        send_frame(&mut client, br#"{"command":"temp"}"#).expect("send temp");
        let origin = running.next_request().origin.expect("stamped origin");
        running
            .replies
            .send(Reply {
                connection_id: origin,
                payload: b"{}".to_vec(),
            })
            .expect("reply queue open");
        assert_eq!(receive_frame(&mut client, 1024).expect("reply"), b"{}");

        let sink = running.finish();
        assert!(sink.contains("Accepted connection"));
        assert!(!sink.contains("byte message"));
        assert!(!sink.contains("byte reply"));
    }

    #[test]
    fn undecodable_messages_keep_the_connection_open() {
        let running = start(1024);
        let mut client = running.client();

        send_frame(&mut client, b"not json").expect("send garbage");
        send_frame(&mut client, b"[1,2,3]").expect("send array");
        send_frame(&mut client, br#"{"command":"stop"}"#).expect("send stop");

        let request = running.next_request();
        assert_eq!(request.envelope.command, "stop");

        let sink = running.finish();
        assert!(sink.contains("payload is not valid UTF-8 JSON"));
        assert!(sink.contains("request must be a JSON object, got array"));
    }

    #[test]
    fn oversized_frames_close_the_connection() {
        let running = start(16);
        let mut client = running.client();

        send_frame(&mut client, &[b'x'; 64]).expect("send oversized");
        // The server may reset rather than close cleanly if unread bytes remain.
        if let Ok(after_close) = receive_frame(&mut client, 1024) {
            assert!(after_close.is_empty());
        }

        let sink = running.finish();
        assert!(sink.contains("Protocol violation"));
    }

    #[test]
    fn replies_for_closed_connections_are_dropped() {
        let running = start(1024);
        let client = running.client();
        let mut live = running.client();
        send_frame(&mut live, br#"{"command":"temp"}"#).expect("send temp");
        let live_id = running.next_request().origin.expect("stamped origin");
        drop(client);

        running
            .replies
            .send(Reply {
                connection_id: live_id + 100,
                payload: b"{}".to_vec(),
            })
            .expect("reply queue open");
        running
            .replies
            .send(Reply {
                connection_id: live_id,
                payload: b"{}".to_vec(),
            })
            .expect("reply queue open");
        let reply = receive_frame(&mut live, 1024).expect("live client still served");
        assert_eq!(reply, b"{}");

        let sink = running.finish();
        assert!(sink.contains(&format!("for closed connection {}", live_id + 100)));
    }
}
