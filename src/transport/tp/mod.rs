//! Transport Protocol (TP): BAM broadcast and RTS/CTS addressed transfers
//! for payloads of 9 to 1785 bytes (SAE J1939-21 §5.10).
pub mod session;

pub use session::{FrameOutcome, Role, SessionKey, TickOutcome, TpSession};
