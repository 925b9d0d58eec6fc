//! Fast Packet assembler: rebuilds application messages by aggregating the
//! CAN frames of a multi-packet session.
use super::MAX_FAST_PACKET_PAYLOAD;

/// Maximum number of Fast Packet sessions handled in parallel (distinct
/// sources).
const MAX_CONCURRENT_SESSIONS: usize = 4;

#[derive(Debug)]
pub enum ProcessResult {
    /// Frame not recognized as Fast Packet or discarded (invalid sequence,
    /// session pool exhausted, etc.).
    Ignored,
    /// Frame successfully integrated but additional fragments are still
    /// missing.
    FragmentConsumed,
    /// All expected fragments were received; the complete message is now
    /// available.
    MessageComplete(CompletedMessage),
}

/// Safe container returning a reassembled message without exposing the
/// assembler's internal buffer.
#[derive(Debug, PartialEq, Eq)]
pub struct CompletedMessage {
    pub payload: [u8; MAX_FAST_PACKET_PAYLOAD],
    pub len: usize,
}

impl CompletedMessage {
    pub fn as_slice(&self) -> &[u8] {
        &self.payload[..self.len]
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum SessionState {
    Inactive,
    InProgress,
}

#[derive(Debug, Clone, Copy)]
struct FastPacketSession {
    state: SessionState,
    source_address: u8,
    sequence_id: u8,
    buffer: [u8; MAX_FAST_PACKET_PAYLOAD],
    expected_size: usize,
    current_size: usize,
    last_frame_index: u8,
}

impl FastPacketSession {
    const fn new() -> Self {
        Self {
            state: SessionState::Inactive,
            source_address: 0,
            sequence_id: 0,
            buffer: [0; MAX_FAST_PACKET_PAYLOAD],
            expected_size: 0,
            current_size: 0,
            last_frame_index: 0,
        }
    }

    fn reset(&mut self) {
        self.state = SessionState::Inactive;
        self.sequence_id = 0;
        self.expected_size = 0;
        self.current_size = 0;
        self.last_frame_index = 0;
    }
}

/// Owns a fixed pool of reusable reassembly sessions, one per concurrent
/// source.
#[derive(Debug, Copy, Clone)]
pub struct FastPacketAssembler {
    sessions: [FastPacketSession; MAX_CONCURRENT_SESSIONS],
}

impl Default for FastPacketAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl FastPacketAssembler {
    pub const fn new() -> Self {
        Self {
            sessions: [FastPacketSession::new(); MAX_CONCURRENT_SESSIONS],
        }
    }

    /// Process a CAN frame that may belong to a Fast Packet session.
    pub fn process_frame(&mut self, source_address: u8, data: &[u8; 8]) -> ProcessResult {
        let frame_index = data[0] & 0x1F;
        let sequence_id = (data[0] >> 5) & 0x07;

        if frame_index == 0 {
            let expected_size = data[1] as usize;
            if !(8..=MAX_FAST_PACKET_PAYLOAD).contains(&expected_size) {
                return ProcessResult::Ignored;
            }

            let ideal = self.sessions.iter().position(|s| {
                s.source_address == source_address && s.state == SessionState::Inactive
            });
            let session_index = ideal.or_else(|| {
                self.sessions
                    .iter()
                    .position(|s| s.state == SessionState::Inactive)
            });

            let Some(index) = session_index else {
                return ProcessResult::Ignored;
            };

            let session = &mut self.sessions[index];
            session.state = SessionState::InProgress;
            session.source_address = source_address;
            session.expected_size = expected_size;
            session.sequence_id = sequence_id;
            session.last_frame_index = 0;

            let data_len = 6;
            session.buffer[0..data_len].copy_from_slice(&data[2..]);
            session.current_size = data_len;

            ProcessResult::FragmentConsumed
        } else {
            let Some(session) = self.sessions.iter_mut().find(|s| {
                s.state == SessionState::InProgress
                    && s.source_address == source_address
                    && s.sequence_id == sequence_id
            }) else {
                return ProcessResult::Ignored;
            };

            if frame_index != session.last_frame_index.wrapping_add(1) {
                session.reset();
                return ProcessResult::Ignored;
            }
            session.last_frame_index = frame_index;

            let bytes_needed = session.expected_size - session.current_size;
            let bytes_in_frame = 7;
            let copy_len = bytes_needed.min(bytes_in_frame);

            let data_slice = &data[1..1 + copy_len];
            let buffer_slice =
                &mut session.buffer[session.current_size..session.current_size + copy_len];
            buffer_slice.copy_from_slice(data_slice);
            session.current_size += copy_len;

            if session.current_size >= session.expected_size {
                let mut payload_buffer = [0u8; MAX_FAST_PACKET_PAYLOAD];
                let payload_len = session.expected_size;
                payload_buffer[..payload_len].copy_from_slice(&session.buffer[..payload_len]);
                session.reset();
                ProcessResult::MessageComplete(CompletedMessage {
                    payload: payload_buffer,
                    len: payload_len,
                })
            } else {
                ProcessResult::FragmentConsumed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::builder::FastPacketBuilder;
    use super::*;

    #[test]
    fn reassembles_a_multi_frame_message() {
        let payload: Vec<u8> = (0..20).collect();
        let frames: Vec<_> = FastPacketBuilder::new(0x1234, 0x10, None, &payload)
            .with_sequence_id(5)
            .build()
            .collect::<Result<_, _>>()
            .unwrap();

        let mut assembler = FastPacketAssembler::new();
        let mut result = None;
        for frame in &frames {
            result = Some(assembler.process_frame(0x10, &frame.data));
        }

        match result.unwrap() {
            ProcessResult::MessageComplete(msg) => assert_eq!(msg.as_slice(), &payload[..]),
            other => panic!("expected MessageComplete, got {other:?}"),
        }
    }

    #[test]
    fn out_of_sequence_continuation_resets_the_session() {
        let payload: Vec<u8> = (0..20).collect();
        let frames: Vec<_> = FastPacketBuilder::new(0x1234, 0x10, None, &payload)
            .with_sequence_id(1)
            .build()
            .collect::<Result<_, _>>()
            .unwrap();

        let mut assembler = FastPacketAssembler::new();
        assembler.process_frame(0x10, &frames[0].data);
        let result = assembler.process_frame(0x10, &frames[2].data);
        assert!(matches!(result, ProcessResult::Ignored));
    }

    #[test]
    fn distinct_sources_use_independent_sessions() {
        let a: Vec<u8> = (0..20).collect();
        let b: Vec<u8> = (100..120).collect();
        let frames_a: Vec<_> = FastPacketBuilder::new(0x1234, 0x10, None, &a)
            .with_sequence_id(0)
            .build()
            .collect::<Result<_, _>>()
            .unwrap();
        let frames_b: Vec<_> = FastPacketBuilder::new(0x1234, 0x20, None, &b)
            .with_sequence_id(0)
            .build()
            .collect::<Result<_, _>>()
            .unwrap();

        let mut assembler = FastPacketAssembler::new();
        assembler.process_frame(0x10, &frames_a[0].data);
        assembler.process_frame(0x20, &frames_b[0].data);
        assembler.process_frame(0x10, &frames_a[1].data);
        let result_a = assembler.process_frame(0x10, &frames_a[2].data);
        let result_b = assembler.process_frame(0x20, &frames_b[1].data);

        assert!(matches!(result_a, ProcessResult::MessageComplete(_)));
        assert!(matches!(result_b, ProcessResult::MessageComplete(_)));
    }
}
