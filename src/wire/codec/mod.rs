use std::fmt;
use std::io::{self, Read, Write};

pub const FRAME_HEADER_SIZE_BYTES: usize = 8;
pub const CHUNK_SIZE_BYTES: usize = 4096;
pub const DEFAULT_MAX_MESSAGE_SIZE_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, PartialEq, Eq)]
pub enum CodecError {
    MessageTooLarge { length: u64, limit: usize },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MessageTooLarge { length, limit } => write!(
                f,
                "protocol error: declared message length {length} exceeds max {limit}"
            ),
        }
    }
}

impl std::error::Error for CodecError {}

pub fn encode_header(payload_len: usize) -> [u8; FRAME_HEADER_SIZE_BYTES] {
    (payload_len as u64).to_be_bytes()
}

pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE_BYTES + payload.len());
    frame.extend_from_slice(&encode_header(payload.len()));
    frame.extend_from_slice(payload);
    frame
}

fn check_length(length: u64, limit: usize) -> Result<usize, CodecError> {
    match usize::try_from(length) {
        Ok(size) if size <= limit => Ok(size),
        _ => Err(CodecError::MessageTooLarge { length, limit }),
    }
}

/// Writes one length-prefixed message to a blocking writer.
///
/// The payload goes out in [`CHUNK_SIZE_BYTES`] pieces so a socket that accepts
/// partial writes never has to take the whole message in one call.
pub fn send_frame<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    writer.write_all(&encode_header(payload.len()))?;
    for chunk in payload.chunks(CHUNK_SIZE_BYTES) {
        writer.write_all(chunk)?;
    }
    writer.flush()
}

/// Reads one length-prefixed message from a blocking reader.
///
/// A peer that closes mid-message yields whatever was accumulated, possibly an
/// empty payload. Callers treat a short result as a closed connection.
pub fn receive_frame<R: Read>(reader: &mut R, max_message_size_bytes: usize) -> io::Result<Vec<u8>> {
    let mut header = [0_u8; FRAME_HEADER_SIZE_BYTES];
    let mut header_filled = 0;
    while header_filled < FRAME_HEADER_SIZE_BYTES {
        match reader.read(&mut header[header_filled..]) {
            Ok(0) => return Ok(Vec::new()),
            Ok(read) => header_filled += read,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(error) => return Err(error),
        }
    }

    let declared = u64::from_be_bytes(header);
    let length = check_length(declared, max_message_size_bytes)
        .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error))?;

    let mut payload = Vec::with_capacity(length.min(CHUNK_SIZE_BYTES * 16));
    let mut chunk = [0_u8; CHUNK_SIZE_BYTES];
    while payload.len() < length {
        let want = (length - payload.len()).min(CHUNK_SIZE_BYTES);
        match reader.read(&mut chunk[..want]) {
            Ok(0) => break,
            Ok(read) => payload.extend_from_slice(&chunk[..read]),
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(error) => return Err(error),
        }
    }

    Ok(payload)
}

/// Reassembles framed messages from bytes arriving in arbitrary pieces.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    max_message_size_bytes: usize,
}

impl FrameDecoder {
    pub fn new(max_message_size_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_message_size_bytes,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Fails once a buffered header declares more than the limit, without
    /// consuming anything. Lets readers stop pulling bytes for a doomed frame.
    pub fn check_pending(&self) -> Result<(), CodecError> {
        if self.buffer.len() < FRAME_HEADER_SIZE_BYTES {
            return Ok(());
        }
        let mut header = [0_u8; FRAME_HEADER_SIZE_BYTES];
        header.copy_from_slice(&self.buffer[..FRAME_HEADER_SIZE_BYTES]);
        check_length(u64::from_be_bytes(header), self.max_message_size_bytes).map(|_| ())
    }

    /// Pops the next complete payload, if one is fully buffered.
    ///
    /// The size limit is checked as soon as the header is available, before any
    /// payload bytes are waited for.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, CodecError> {
        if self.buffer.len() < FRAME_HEADER_SIZE_BYTES {
            return Ok(None);
        }

        let mut header = [0_u8; FRAME_HEADER_SIZE_BYTES];
        header.copy_from_slice(&self.buffer[..FRAME_HEADER_SIZE_BYTES]);
        let length = check_length(u64::from_be_bytes(header), self.max_message_size_bytes)?;

        let total = FRAME_HEADER_SIZE_BYTES + length;
        if self.buffer.len() < total {
            return Ok(None);
        }

        let payload = self.buffer[FRAME_HEADER_SIZE_BYTES..total].to_vec();
        self.buffer.drain(..total);
        Ok(Some(payload))
    }
}

#[cfg(test)]
mod tests {
    use std::io::{self, Cursor, Read};

    use super::{
        encode_frame, receive_frame, send_frame, CodecError, FrameDecoder, CHUNK_SIZE_BYTES,
        DEFAULT_MAX_MESSAGE_SIZE_BYTES, FRAME_HEADER_SIZE_BYTES,
    };

    /// Hands out at most `step` bytes per read call.
    struct TrickleReader {
        data: Vec<u8>,
        position: usize,
        step: usize,
    }

    impl Read for TrickleReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let remaining = self.data.len() - self.position;
            let take = remaining.min(self.step).min(buf.len());
            buf[..take].copy_from_slice(&self.data[self.position..self.position + take]);
            self.position += take;
            Ok(take)
        }
    }

    /// Accepts at most `step` bytes per write call and records every call size.
    #[derive(Default)]
    struct PartialWriter {
        written: Vec<u8>,
        calls: Vec<usize>,
        step: usize,
    }

    impl io::Write for PartialWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let take = buf.len().min(self.step);
            self.written.extend_from_slice(&buf[..take]);
            self.calls.push(take);
            Ok(take)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn large_payload() -> Vec<u8> {
        (0..CHUNK_SIZE_BYTES * 3 + 17).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn header_is_eight_byte_big_endian_length() {
        let frame = encode_frame(b"{\"command\":\"stop\"}");
        assert_eq!(&frame[..FRAME_HEADER_SIZE_BYTES], &18_u64.to_be_bytes());
        assert_eq!(&frame[FRAME_HEADER_SIZE_BYTES..], b"{\"command\":\"stop\"}");
    }

    #[test]
    fn send_then_receive_preserves_empty_and_large_payloads() {
        for payload in [Vec::new(), b"fill".to_vec(), large_payload()] {
            let mut wire = Vec::new();
            send_frame(&mut wire, &payload).expect("send into vec should succeed");

            let received = receive_frame(&mut Cursor::new(wire), DEFAULT_MAX_MESSAGE_SIZE_BYTES)
                .expect("receive should succeed");
            assert_eq!(received, payload);
        }
    }

    #[test]
    fn send_never_hands_the_writer_more_than_one_chunk() {
        let payload = large_payload();
        let mut writer = PartialWriter {
            step: CHUNK_SIZE_BYTES * 2,
            ..PartialWriter::default()
        };

        send_frame(&mut writer, &payload).expect("send should tolerate partial writes");

        assert_eq!(&writer.written[FRAME_HEADER_SIZE_BYTES..], payload.as_slice());
        assert!(writer.calls.iter().all(|size| *size <= CHUNK_SIZE_BYTES));
    }

    #[test]
    fn receive_handles_one_byte_reads() {
        let payload = large_payload();
        let mut reader = TrickleReader {
            data: encode_frame(&payload),
            position: 0,
            step: 1,
        };

        let received = receive_frame(&mut reader, DEFAULT_MAX_MESSAGE_SIZE_BYTES)
            .expect("trickled receive should succeed");
        assert_eq!(received, payload);
    }

    #[test]
    fn receive_returns_empty_payload_when_peer_sends_nothing() {
        let received = receive_frame(&mut Cursor::new(Vec::<u8>::new()), 1024)
            .expect("closed stream is not an error");
        assert!(received.is_empty());
    }

    #[test]
    fn receive_returns_partial_payload_when_peer_closes_early() {
        let mut wire = encode_frame(b"0123456789");
        wire.truncate(FRAME_HEADER_SIZE_BYTES + 4);

        let received = receive_frame(&mut Cursor::new(wire), 1024)
            .expect("truncated stream is not an error");
        assert_eq!(received, b"0123");
    }

    #[test]
    fn receive_rejects_declared_length_above_limit() {
        let wire = u64::MAX.to_be_bytes().to_vec();
        let error = receive_frame(&mut Cursor::new(wire), 1024)
            .expect_err("oversized length should fail");
        assert_eq!(error.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn decoder_yields_same_payload_for_any_chunking() {
        let payload = large_payload();
        let wire = encode_frame(&payload);

        for step in [1, 3, 7, FRAME_HEADER_SIZE_BYTES, 1000, wire.len()] {
            let mut decoder = FrameDecoder::new(DEFAULT_MAX_MESSAGE_SIZE_BYTES);
            let mut decoded = Vec::new();
            for piece in wire.chunks(step) {
                decoder.push(piece);
                while let Some(frame) = decoder.next_frame().expect("frame should decode") {
                    decoded.push(frame);
                }
            }

            assert_eq!(decoded, vec![payload.clone()], "chunk size {step}");
            assert_eq!(decoder.buffered_len(), 0);
        }
    }

    #[test]
    fn decoder_splits_back_to_back_frames() {
        let mut wire = encode_frame(b"first");
        wire.extend_from_slice(&encode_frame(b""));
        wire.extend_from_slice(&encode_frame(b"third"));
        wire.extend_from_slice(&encode_frame(b"fourth")[..5]);

        let mut decoder = FrameDecoder::new(1024);
        decoder.push(&wire);

        assert_eq!(decoder.next_frame(), Ok(Some(b"first".to_vec())));
        assert_eq!(decoder.next_frame(), Ok(Some(Vec::new())));
        assert_eq!(decoder.next_frame(), Ok(Some(b"third".to_vec())));
        assert_eq!(decoder.next_frame(), Ok(None));
        assert_eq!(decoder.buffered_len(), 5);
    }

    #[test]
    fn pending_check_flags_oversized_header_without_consuming() {
        let header = (1_u64 << 40).to_be_bytes();
        let mut decoder = FrameDecoder::new(16);
        decoder.push(&header[..4]);
        assert_eq!(decoder.check_pending(), Ok(()));

        decoder.push(&header[4..]);
        decoder.push(b"xx");
        assert!(matches!(
            decoder.check_pending(),
            Err(CodecError::MessageTooLarge { limit: 16, .. })
        ));
        assert_eq!(decoder.buffered_len(), FRAME_HEADER_SIZE_BYTES + 2);
    }

    #[test]
    fn decoder_rejects_oversized_header_before_payload_arrives() {
        let mut decoder = FrameDecoder::new(16);
        decoder.push(&17_u64.to_be_bytes());

        assert_eq!(
            decoder.next_frame(),
            Err(CodecError::MessageTooLarge {
                length: 17,
                limit: 16
            })
        );
    }
}
