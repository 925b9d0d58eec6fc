//! Extended Transport Protocol (ETP): the same RTS/CTS shape as TP, for
//! payloads of 1786 to 117,440,505 bytes, with a Data Packet Offset burst
//! header so the 8-bit DT sequence number can reset on every CTS grant.
pub mod session;

pub use session::{EtpSession, FrameOutcome, SessionKey, TickOutcome};
