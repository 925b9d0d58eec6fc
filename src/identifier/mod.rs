//! Packing and unpacking of the 29-bit extended CAN identifiers used by
//! SAE J1939 / ISO 11783 (priority, PGN, source and destination addresses).
use crate::error::CanIdBuildError;

/// Global address reserved for broadcast destinations and the "no address
/// claimed yet" source placeholder.
pub const GLOBAL_ADDRESS: u8 = 0xFF;
/// Null address: an internal control function that failed to claim reports
/// this as its source.
pub const NULL_ADDRESS: u8 = 0xFE;

/// A validated 3-bit CAN arbitration priority (0 = highest, 7 = lowest).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(u8);

impl Priority {
    pub const DEFAULT: Priority = Priority(6);

    /// Build a validated priority. Fails with [`CanIdBuildError::InvalidPriority`]
    /// when the value does not fit in 3 bits.
    pub const fn new(value: u8) -> Result<Self, CanIdBuildError> {
        if value > 7 {
            Err(CanIdBuildError::InvalidPriority(value))
        } else {
            Ok(Self(value))
        }
    }

    pub const fn get(self) -> u8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<u8> for Priority {
    type Error = CanIdBuildError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// A 29-bit extended CAN identifier, stored in its wire layout:
/// `priority(3) | EDP/DP(2) | PF(8) | PS(8) | SA(8)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CanId(pub u32);

impl CanId {
    /// Start building an identifier for `pgn`, sourced from `source_address`.
    pub fn builder(pgn: u32, source_address: u8) -> CanIdBuilder {
        CanIdBuilder::new(pgn, source_address)
    }

    /// Priority (bits 26-28).
    pub fn priority(&self) -> Priority {
        Priority(((self.0 >> 26) & 0x07) as u8)
    }

    /// PDU Format byte (bits 16-23). `pf >= 240` marks a PDU2 (broadcast) frame.
    pub fn pdu_format(&self) -> u8 {
        ((self.0 >> 16) & 0xFF) as u8
    }

    /// True when this identifier encodes a PDU2 (broadcast, group-extension)
    /// message rather than a PDU1 (addressed) one.
    pub fn is_pdu2(&self) -> bool {
        self.pdu_format() >= 240
    }

    /// The 18-bit Parameter Group Number, folding the PDU-specific byte into
    /// the PGN for PDU2 frames and omitting it (destination instead) for PDU1.
    pub fn pgn(&self) -> u32 {
        let ps = ((self.0 >> 8) & 0xFF) as u32;
        let pf = self.pdu_format() as u32;
        let dp = (self.0 >> 24) & 0x01;
        let edp = (self.0 >> 25) & 0x01;
        let r_dp = (edp << 17) | (dp << 16);

        if pf >= 240 {
            r_dp | (pf << 8) | ps
        } else {
            r_dp | (pf << 8)
        }
    }

    /// Destination address for PDU1 (addressed) frames; `None` for PDU2
    /// (broadcast) frames, which carry no destination.
    pub fn destination(&self) -> Option<u8> {
        if self.is_pdu2() {
            None
        } else {
            Some(((self.0 >> 8) & 0xFF) as u8)
        }
    }

    /// Source address (bits 0-7).
    pub fn source_address(&self) -> u8 {
        (self.0 & 0xFF) as u8
    }
}

/// Fluent builder enforcing the PDU1/PDU2 construction rules for [`CanId`].
#[derive(Debug, Clone, Copy)]
pub struct CanIdBuilder {
    priority: Priority,
    pgn: u32,
    source_address: u8,
    destination: Option<u8>,
}

impl CanIdBuilder {
    pub fn new(pgn: u32, source_address: u8) -> Self {
        Self {
            priority: Priority::DEFAULT,
            pgn,
            source_address,
            destination: None,
        }
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Marks the frame as addressed (PDU1) to `destination`.
    pub fn destination(mut self, destination: u8) -> Self {
        self.destination = Some(destination);
        self
    }

    /// Builds the identifier, applying the J1939 PDU1/PDU2 rules:
    /// - PF < 240 (PDU1): a destination is mandatory and the PGN's low byte
    ///   must be zero (the destination occupies that position on the wire).
    /// - PF >= 240 (PDU2): no destination may be supplied; the PGN's low
    ///   byte is the group extension and is copied onto the wire unchanged.
    pub fn build(self) -> Result<CanId, CanIdBuildError> {
        if self.pgn > 0x3_FFFF {
            return Err(CanIdBuildError::InvalidPgn(self.pgn));
        }

        let edp = (self.pgn >> 17) & 0x01;
        let dp = (self.pgn >> 16) & 0x01;
        let pf = ((self.pgn >> 8) & 0xFF) as u8;
        let ps = (self.pgn & 0xFF) as u8;

        let id = match self.destination {
            None => {
                if pf < 240 {
                    return Err(CanIdBuildError::InvalidForAddressed { pgn: self.pgn });
                }
                (edp << 25) | (dp << 24) | ((pf as u32) << 16) | ((ps as u32) << 8)
            }
            Some(destination) => {
                if pf >= 240 {
                    return Err(CanIdBuildError::InvalidForBroadcast { pgn: self.pgn });
                }
                (edp << 25) | (dp << 24) | ((pf as u32) << 16) | ((destination as u32) << 8)
            }
        };

        Ok(CanId(
            ((self.priority.get() as u32) << 26) | id | (self.source_address as u32),
        ))
    }
}

#[cfg(test)]
#[path = "tests.rs"]
mod tests;
