//! Non-fatal conditions a tick can surface (§7): the core never aborts the
//! process, so every failure mode ends up as an entry in the `Vec<Fault>`
//! `NetworkManager::tick` returns.
use crate::error::{CanIdBuildError, ExtractionError, InvalidArgument, SessionError};
use crate::name::Name;
use crate::transport::{AbortReason, CanFrame};

#[derive(Debug, Clone)]
pub enum Fault {
    /// The HAL rejected a write N=3 times in a row; the frame was dropped.
    TransientBusError { frame: CanFrame },
    /// A TP/ETP session's timer expired waiting for a peer response.
    SessionTimeout { source: u8, destination: u8, pgn: u32 },
    /// A peer sent `Conn_Abort`.
    SessionAbort { source: u8, destination: u8, pgn: u32, reason: AbortReason },
    /// A peer violated the protocol (bad/duplicate sequence, oversized total).
    ProtocolViolation { source: u8, destination: u8, pgn: u32, reason: AbortReason },
    /// No session slot, or a session already exists for this tuple.
    ResourcesExhausted { source: u8, destination: u8, pgn: u32 },
    /// An Internal CF lost address-claim contention and has no fallback left.
    AddressContentionLost { name: Name },
    /// The outbound or command queue was full when an API call tried to push.
    QueueFull,
    /// A single-frame RX failed its PGN-specific length check.
    ExtractionError(ExtractionError),
    /// `send` was asked to build a CAN identifier that can't exist (e.g. a
    /// destination against a PDU2 PGN).
    FrameBuildFailed(CanIdBuildError),
    /// `send` referenced a `CfId` with no corresponding Internal CF, or one
    /// that has not finished claiming an address yet.
    UnknownOrUnclaimedControlFunction,
    /// A command was rejected as a synchronous API misuse.
    InvalidArgument(InvalidArgument),
}

pub(crate) fn from_session_error(source: u8, destination: u8, pgn: u32, err: SessionError) -> Fault {
    match err {
        SessionError::TimedOut(_) => Fault::SessionTimeout { source, destination, pgn },
        SessionError::Aborted(reason) => Fault::SessionAbort { source, destination, pgn, reason },
        SessionError::ProtocolViolation(reason) => {
            Fault::ProtocolViolation { source, destination, pgn, reason }
        }
        SessionError::ResourcesExhausted
        | SessionError::AlreadyInSession
        | SessionError::PayloadTooLarge(_) => Fault::ResourcesExhausted { source, destination, pgn },
    }
}
