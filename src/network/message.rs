//! Reassembled application-level messages handed to callbacks, and the
//! length validation the Network Manager applies before building one from a
//! single raw frame.
use crate::error::ExtractionError;
use crate::identifier::Priority;
use crate::transport::frame::CanFrame;

/// DM13 (Stop/Start Broadcast Command); the one fixed-length PGN this crate
/// validates on the single-frame RX path (out-of-scope diagnostic PGNs
/// generally pass through unvalidated, but DM13's DLC is load-bearing for
/// higher layers and cheap to check here).
pub const PGN_DM13: u32 = 0x00DF00;

fn expected_dlc(pgn: u32) -> Option<usize> {
    match pgn {
        PGN_DM13 => Some(8),
        _ => None,
    }
}

/// A fully reassembled message: a PGN, its payload, and the addressing that
/// produced it. Built either from one raw frame or from a completed TP/ETP
/// session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub pgn: u32,
    pub source_address: u8,
    pub destination_address: Option<u8>,
    pub priority: Priority,
    pub data: Vec<u8>,
}

impl Message {
    /// Build a `Message` from a single-frame (non-TP/ETP) reception,
    /// enforcing any fixed-length rule known for `frame`'s PGN.
    pub fn from_frame(frame: &CanFrame) -> Result<Self, ExtractionError> {
        let pgn = frame.id.pgn();
        if let Some(expected) = expected_dlc(pgn) {
            if frame.len != expected {
                return Err(ExtractionError::InvalidLength {
                    pgn,
                    expected,
                    actual: frame.len,
                });
            }
        }
        Ok(Self {
            pgn,
            source_address: frame.id.source_address(),
            destination_address: frame.id.destination(),
            priority: frame.id.priority(),
            data: frame.payload().to_vec(),
        })
    }
}
