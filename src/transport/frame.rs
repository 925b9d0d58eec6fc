//! In-memory representation of a CAN frame.
use crate::identifier::CanId;

/// Raw CAN frame as read from, or about to be written to, the bus.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CanFrame {
    /// Full 29-bit CAN identifier.
    pub id: CanId,
    /// Payload buffer. Classic CAN frames always provide eight bytes of
    /// storage; `len` marks how many are meaningful.
    pub data: [u8; 8],
    /// Number of valid payload bytes (Data Length Code, 0 to 8).
    pub len: usize,
}

impl CanFrame {
    pub fn new(id: CanId, payload: &[u8]) -> Self {
        let mut data = [0xFFu8; 8];
        let len = payload.len().min(8);
        data[..len].copy_from_slice(&payload[..len]);
        Self { id, data, len }
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len]
    }
}
