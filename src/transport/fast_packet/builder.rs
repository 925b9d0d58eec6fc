//! CAN frame generator for Fast Packet messages: builds the required frame
//! sequence (single or multi-packet) from an application payload.
use std::sync::atomic::{AtomicU8, Ordering};

use crate::error::CanIdBuildError;
use crate::identifier::CanId;
use crate::transport::frame::CanFrame;

use super::MAX_FAST_PACKET_PAYLOAD;

static GLOBAL_SEQUENCE_ID: AtomicU8 = AtomicU8::new(0);

fn next_sequence_id() -> u8 {
    GLOBAL_SEQUENCE_ID
        .fetch_update(Ordering::AcqRel, Ordering::Relaxed, |prev| {
            Some((prev + 1) & 0x07)
        })
        .unwrap()
        & 0x07
}

/// Shared parameters for all frames composing a Fast Packet message.
#[derive(Debug)]
pub struct FastPacketBuilder<'a> {
    pgn: u32,
    source_address: u8,
    destination: Option<u8>,
    payload: &'a [u8],
    sequence_id: u8,
}

/// Lazy iterator returning frames one by one as they are encoded.
pub struct FrameIterator<'a> {
    builder: FastPacketBuilder<'a>,
    frame_index: u8,
    bytes_sent: usize,
}

impl<'a> Iterator for FrameIterator<'a> {
    type Item = Result<CanFrame, CanIdBuildError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.bytes_sent >= self.builder.payload.len() {
            return None;
        }

        let mut id_builder = CanId::builder(self.builder.pgn, self.builder.source_address);
        if let Some(destination) = self.builder.destination {
            id_builder = id_builder.destination(destination);
        }

        let id = match id_builder.build() {
            Ok(id) => id,
            Err(e) => {
                self.bytes_sent = self.builder.payload.len();
                return Some(Err(e));
            }
        };

        let total_len = self.builder.payload.len();

        // Single-frame message: no Fast Packet framing needed.
        if total_len <= 8 {
            self.bytes_sent = total_len;
            return Some(Ok(CanFrame::new(id, self.builder.payload)));
        }

        let header = ((self.builder.sequence_id & 0x07) << 5) | (self.frame_index & 0x1F);
        let frame = if self.bytes_sent == 0 {
            let mut data = [0xFFu8; 8];
            data[0] = header;
            data[1] = self.builder.payload.len() as u8;
            let bytes_to_copy = 6.min(self.builder.payload.len());
            data[2..2 + bytes_to_copy].copy_from_slice(&self.builder.payload[0..bytes_to_copy]);
            self.bytes_sent += bytes_to_copy;
            CanFrame {
                id,
                data,
                len: 2 + bytes_to_copy,
            }
        } else {
            let mut data = [0xFFu8; 8];
            data[0] = header;
            let remaining = self.builder.payload.len() - self.bytes_sent;
            let bytes_to_copy = 7.min(remaining);
            let slice = &self.builder.payload[self.bytes_sent..self.bytes_sent + bytes_to_copy];
            data[1..1 + bytes_to_copy].copy_from_slice(slice);
            self.bytes_sent += bytes_to_copy;
            CanFrame {
                id,
                data,
                len: 1 + bytes_to_copy,
            }
        };

        self.frame_index = self.frame_index.wrapping_add(1);
        Some(Ok(frame))
    }
}

impl<'a> FastPacketBuilder<'a> {
    /// Create a Fast Packet encoder (or single-frame builder if the payload
    /// already fits in one frame). Panics if `payload` exceeds
    /// [`MAX_FAST_PACKET_PAYLOAD`] — callers route larger payloads through
    /// TP/ETP instead.
    pub fn new(pgn: u32, source_address: u8, destination: Option<u8>, payload: &'a [u8]) -> Self {
        assert!(
            payload.len() <= MAX_FAST_PACKET_PAYLOAD,
            "payload exceeds Fast Packet's maximum; route through TP/ETP instead"
        );
        Self {
            pgn,
            source_address,
            destination,
            payload,
            sequence_id: next_sequence_id(),
        }
    }

    /// Override the 3-bit Fast Packet sequence identifier. Used by tests to
    /// avoid depending on the process-global counter.
    pub fn with_sequence_id(mut self, sequence_id: u8) -> Self {
        self.sequence_id = sequence_id & 0x07;
        self
    }

    pub fn build(self) -> FrameIterator<'a> {
        FrameIterator {
            builder: self,
            frame_index: 0,
            bytes_sent: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_frame_payload_yields_one_frame() {
        let payload = [1, 2, 3];
        let frames: Vec<_> = FastPacketBuilder::new(0x1234, 0x10, Some(0x20), &payload)
            .build()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload(), [1, 2, 3]);
    }

    #[test]
    fn multi_frame_payload_carries_sequence_and_length_header() {
        let payload: Vec<u8> = (0..20).collect();
        let frames: Vec<_> = FastPacketBuilder::new(0x1234, 0x10, None, &payload)
            .with_sequence_id(3)
            .build()
            .collect::<Result<_, _>>()
            .unwrap();

        // 6 bytes in the first frame, 7 in each continuation: ceil((20-6)/7) + 1 = 3
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].data[0] >> 5, 3);
        assert_eq!(frames[0].data[1], 20);
        assert_eq!(frames[1].data[0] & 0x1F, 1);
        assert_eq!(frames[2].data[0] & 0x1F, 2);
    }
}
