//! NMEA 2000 Fast Packet: the thin, non-core multi-frame variant the spec
//! allows alongside TP/ETP (§1). Encapsulates payloads up to 223 bytes
//! across successive CAN frames using a 3-bit sequence id + 5-bit frame
//! index header byte, rather than J1939's RTS/CTS flow control.
pub const MAX_FAST_PACKET_PAYLOAD: usize = 223;

pub mod assembler;
pub mod builder;

pub use assembler::{CompletedMessage, FastPacketAssembler, ProcessResult};
pub use builder::FastPacketBuilder;
