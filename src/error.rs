//! Error definitions shared across library modules.
//! Each type models a specific failure scenario (CAN identifier construction,
//! frame extraction, session transport, queue back-pressure, and synchronous
//! API misuse).
use thiserror::Error;

use crate::transport::AbortReason;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
/// Errors that can occur while building a 29-bit CAN identifier.
pub enum CanIdBuildError {
    /// Priority exceeds the 3-bit field (> 7).
    #[error("priority {0} does not fit in 3 bits")]
    InvalidPriority(u8),
    /// PGN exceeds the 18-bit field.
    #[error("PGN {0:#x} does not fit in 18 bits")]
    InvalidPgn(u32),
    /// Attempt to build a broadcast message (PDU2, PF >= 240) with a destination.
    #[error("PDU2 PGN {pgn:#x} (PF >= 240) cannot take a destination address")]
    InvalidForBroadcast { pgn: u32 },
    /// Attempt to build an addressed message (PDU1, PF < 240) without a destination.
    #[error("PDU1 PGN {pgn:#x} (PF < 240) requires a destination address")]
    InvalidForAddressed { pgn: u32 },
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
/// Failures while extracting fields from a raw CAN frame.
pub enum ExtractionError {
    /// The frame's PGN does not match what the caller expected.
    #[error("unexpected PGN {actual:#x}, expected {expected:#x}")]
    UnexpectedPgn { expected: u32, actual: u32 },
    /// Payload length does not match the fixed wire format for this PGN.
    #[error("invalid payload length {actual} for PGN {pgn:#x}, expected {expected}")]
    InvalidLength {
        pgn: u32,
        expected: usize,
        actual: usize,
    },
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
/// Errors raised by a transport (TP or ETP) session.
pub enum SessionError {
    /// The peer (or we) aborted the session; carries the wire abort reason.
    #[error("session aborted: {0:?}")]
    Aborted(AbortReason),
    /// No timely response was observed for the current timer; the session
    /// was torn down and, for RTS/CTS sessions, a Conn_Abort was emitted.
    #[error("session timed out waiting for {0}")]
    TimedOut(&'static str),
    /// A frame violated the protocol (bad sequence, oversized total, etc.).
    #[error("protocol violation: {0:?}")]
    ProtocolViolation(AbortReason),
    /// The session table is full (`max_transport_sessions` reached).
    #[error("session table full")]
    ResourcesExhausted,
    /// A second opener attempted to start a session for a (src, dst, pgn)
    /// tuple that already has one in flight.
    #[error("a session already exists for this (source, destination, pgn)")]
    AlreadyInSession,
    /// Payload exceeds what this transport can carry (1785 B for TP,
    /// 117 440 505 B for ETP).
    #[error("payload of {0} bytes exceeds this transport's maximum")]
    PayloadTooLarge(usize),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
/// Back-pressure signaled to an API caller.
pub enum QueueError {
    /// The outbound queue was full for longer than the caller's budget.
    #[error("outbound queue is full")]
    QueueFull,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
/// Synchronous API-misuse errors, never retried.
pub enum InvalidArgument {
    #[error("two control functions on the bus must not share a NAME")]
    DuplicateName,
    #[error("payload is empty")]
    EmptyPayload,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
/// Either `send`'s argument was rejected outright, or it was accepted and
/// then exhausted the queue's push budget under backpressure.
pub enum SendError {
    #[error(transparent)]
    InvalidArgument(#[from] InvalidArgument),
    #[error(transparent)]
    QueueFull(#[from] QueueError),
}
