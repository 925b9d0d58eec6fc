//! One ETP session. Shares its timer budget and abort semantics with TP
//! (`crate::transport::tp::session`), differing only in header layout: a
//! 32-bit total size, a `DPO` burst header carrying a 24-bit packet offset,
//! and an 8-bit sequence number that resets to 1 at the start of every
//! CTS-granted burst.
use std::time::Duration;

use crate::error::SessionError;
use crate::identifier::CanId;
use crate::transport::control_byte;
use crate::transport::frame::CanFrame;
use crate::transport::tp::session::{T1_INTER_DT, T2_CTS_WAIT, T3_EOM_WAIT};
use crate::transport::{AbortReason, ETP_MAX_PAYLOAD, PGN_ETP_CM, PGN_ETP_DT, TP_MAX_PAYLOAD};

const DT_PAYLOAD_BYTES: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub source: u8,
    pub destination: u8,
    pub pgn: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Sender,
    Receiver,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    AwaitingFirstCts { deadline: Duration },
    SendingDpo,
    SendingBurst { granted: u32, sent_in_burst: u32 },
    AwaitingCtsOrEom { deadline: Duration },
    AwaitingDpo { deadline: Duration },
    AwaitingDt { deadline: Duration },
    Done,
    Aborted(AbortReason),
}

#[derive(Debug, Default)]
pub struct TickOutcome {
    pub frames: Vec<CanFrame>,
    pub finished: Option<Result<Vec<u8>, SessionError>>,
}

#[derive(Debug, Default)]
pub struct FrameOutcome {
    pub frames: Vec<CanFrame>,
    pub finished: Option<Result<Vec<u8>, SessionError>>,
}

pub struct EtpSession {
    pub key: SessionKey,
    role: Role,
    total_size: usize,
    total_packets: u32,
    max_packets_per_cts: u32,
    packet_offset: u32,
    payload: Vec<u8>,
    next_sequence: u8,
    received_in_window: u32,
    state: State,
}

fn pgn_bytes(pgn: u32) -> [u8; 3] {
    [(pgn & 0xFF) as u8, ((pgn >> 8) & 0xFF) as u8, ((pgn >> 16) & 0xFF) as u8]
}

fn total_packets_for(total_size: usize) -> u32 {
    total_size.div_ceil(DT_PAYLOAD_BYTES) as u32
}

fn cm_frame(source: u8, destination: u8, control: u8, rest: [u8; 7]) -> CanFrame {
    let mut data = [control, 0, 0, 0, 0, 0, 0, 0];
    data[1..8].copy_from_slice(&rest);
    let id = CanId::builder(PGN_ETP_CM, source)
        .destination(destination)
        .build()
        .expect("ETP.CM identifier is always valid");
    CanFrame { id, data, len: 8 }
}

fn dt_frame(source: u8, destination: u8, sequence: u8, chunk: &[u8]) -> CanFrame {
    let mut data = [0xFFu8; 8];
    data[0] = sequence;
    data[1..1 + chunk.len()].copy_from_slice(chunk);
    let id = CanId::builder(PGN_ETP_DT, source)
        .destination(destination)
        .build()
        .expect("ETP.DT identifier is always valid");
    CanFrame { id, data, len: 8 }
}

fn abort_frame(source: u8, destination: u8, reason: AbortReason, pgn: u32) -> CanFrame {
    let [p0, p1, p2] = pgn_bytes(pgn);
    cm_frame(
        source,
        destination,
        control_byte::ABORT,
        [reason.wire_value(), 0xFF, 0xFF, 0xFF, p0, p1, p2],
    )
}

impl EtpSession {
    /// Open an ETP send. Returns the session plus the initial `ETP.CM_RTS`
    /// frame.
    pub fn open_sender(
        source: u8,
        destination: u8,
        pgn: u32,
        payload: Vec<u8>,
        now: Duration,
    ) -> (Self, CanFrame) {
        assert!(
            payload.len() > TP_MAX_PAYLOAD && payload.len() <= ETP_MAX_PAYLOAD,
            "payload size does not fall in ETP's range"
        );
        let total_size = payload.len();
        let total_packets = total_packets_for(total_size);
        let [p0, p1, p2] = pgn_bytes(pgn);
        let size = total_size as u32;
        let rts = cm_frame(
            source,
            destination,
            control_byte::ETP_RTS,
            [
                (size & 0xFF) as u8,
                ((size >> 8) & 0xFF) as u8,
                ((size >> 16) & 0xFF) as u8,
                ((size >> 24) & 0xFF) as u8,
                p0,
                p1,
                p2,
            ],
        );
        let session = Self {
            key: SessionKey { source, destination, pgn },
            role: Role::Sender,
            total_size,
            total_packets,
            max_packets_per_cts: 0,
            packet_offset: 0,
            payload,
            next_sequence: 1,
            received_in_window: 0,
            state: State::AwaitingFirstCts { deadline: now + T2_CTS_WAIT },
        };
        (session, rts)
    }

    /// Accept an observed `ETP.CM_RTS` as the responder. Returns the session
    /// plus the granting `ETP.CM_CTS` (for the first burst, at offset 0).
    pub fn accept_rts(
        source: u8,
        destination: u8,
        pgn: u32,
        total_size: usize,
        window: u32,
        now: Duration,
    ) -> (Self, CanFrame) {
        let total_packets = total_packets_for(total_size);
        let granted = window.min(total_packets).max(1);
        let [p0, p1, p2] = pgn_bytes(pgn);
        let cts = cm_frame(
            destination,
            source,
            control_byte::ETP_CTS,
            [
                (granted & 0xFF) as u8,
                0,
                0,
                0,
                p0,
                p1,
                p2,
            ],
        );
        let session = Self {
            key: SessionKey { source, destination, pgn },
            role: Role::Receiver,
            total_size,
            total_packets,
            max_packets_per_cts: window.max(1),
            packet_offset: 0,
            payload: vec![0u8; total_size],
            next_sequence: 1,
            received_in_window: 0,
            state: State::AwaitingDpo { deadline: now + T2_CTS_WAIT },
        };
        (session, cts)
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, State::Done | State::Aborted(_))
    }

    pub fn tick(&mut self, now: Duration) -> TickOutcome {
        let mut out = TickOutcome::default();
        match self.state.clone() {
            State::SendingDpo => {
                let remaining = self.total_packets - self.packet_offset;
                let granted = self.received_in_window.max(1).min(remaining);
                let [p0, p1, p2] = pgn_bytes(self.key.pgn);
                out.frames.push(cm_frame(
                    self.key.source,
                    self.key.destination,
                    control_byte::ETP_DPO,
                    [
                        granted as u8,
                        (self.packet_offset & 0xFF) as u8,
                        ((self.packet_offset >> 8) & 0xFF) as u8,
                        ((self.packet_offset >> 16) & 0xFF) as u8,
                        p0,
                        p1,
                        p2,
                    ],
                ));
                self.next_sequence = 1;
                self.state = State::SendingBurst { granted, sent_in_burst: 0 };
            }
            State::SendingBurst { granted, sent_in_burst } if sent_in_burst < granted => {
                let packet_index = self.packet_offset + sent_in_burst;
                let start = packet_index as usize * DT_PAYLOAD_BYTES;
                let end = (start + DT_PAYLOAD_BYTES).min(self.total_size);
                out.frames.push(dt_frame(
                    self.key.source,
                    self.key.destination,
                    self.next_sequence,
                    &self.payload[start..end],
                ));
                let sent_in_burst = sent_in_burst + 1;
                self.next_sequence += 1;
                if packet_index + 1 >= self.total_packets {
                    self.packet_offset = self.total_packets;
                    self.state = State::AwaitingCtsOrEom { deadline: now + T3_EOM_WAIT };
                } else if sent_in_burst >= granted {
                    self.packet_offset += sent_in_burst;
                    self.state = State::AwaitingCtsOrEom { deadline: now + T2_CTS_WAIT };
                } else {
                    self.state = State::SendingBurst { granted, sent_in_burst };
                }
            }
            State::AwaitingFirstCts { deadline }
            | State::AwaitingCtsOrEom { deadline }
            | State::AwaitingDpo { deadline }
            | State::AwaitingDt { deadline }
                if now >= deadline =>
            {
                self.state = State::Aborted(AbortReason::Timeout);
                let (from, to) = match self.role {
                    Role::Sender => (self.key.source, self.key.destination),
                    Role::Receiver => (self.key.destination, self.key.source),
                };
                out.frames.push(abort_frame(from, to, AbortReason::Timeout, self.key.pgn));
                out.finished = Some(Err(SessionError::TimedOut("ETP timer")));
            }
            _ => {}
        }
        out
    }

    pub fn on_cm_frame(&mut self, control: u8, data: &[u8], now: Duration) -> FrameOutcome {
        let mut out = FrameOutcome::default();
        match (control, self.state.clone()) {
            (control_byte::ETP_CTS, State::AwaitingFirstCts { .. })
            | (control_byte::ETP_CTS, State::AwaitingCtsOrEom { .. }) => {
                let granted = data[0] as u32;
                self.received_in_window = granted;
                self.state = State::SendingDpo;
            }
            (control_byte::ETP_EOM_ACK, State::AwaitingCtsOrEom { .. }) => {
                self.state = State::Done;
                out.finished = Some(Ok(std::mem::take(&mut self.payload)));
            }
            (control_byte::ABORT, _) => {
                let reason = AbortReason::from_wire_value(data[0]);
                self.state = State::Aborted(reason);
                out.finished = Some(Err(SessionError::Aborted(reason)));
            }
            _ => {}
        }
        out
    }

    /// Feed an observed `ETP.CM_DPO`: establishes the packet offset and
    /// sequence-number base for the upcoming DT burst.
    pub fn on_dpo_frame(&mut self, data: &[u8], now: Duration) -> FrameOutcome {
        let mut out = FrameOutcome::default();
        if let State::AwaitingDpo { .. } = self.state {
            let granted = data[0] as u32;
            let offset = (data[1] as u32) | ((data[2] as u32) << 8) | ((data[3] as u32) << 16);
            self.packet_offset = offset;
            self.next_sequence = 1;
            self.received_in_window = 0;
            self.state = State::AwaitingDt { deadline: now + T1_INTER_DT };
            let _ = granted;
        }
        out
    }

    pub fn on_dt_frame(&mut self, data: &[u8; 8], now: Duration) -> FrameOutcome {
        let mut out = FrameOutcome::default();
        let sequence = data[0];
        if let State::AwaitingDt { .. } = self.state {
            if sequence != self.next_sequence {
                self.state = State::Aborted(AbortReason::BadSequenceNumber);
                out.finished = Some(Err(SessionError::ProtocolViolation(
                    AbortReason::BadSequenceNumber,
                )));
                out.frames.push(abort_frame(
                    self.key.destination,
                    self.key.source,
                    AbortReason::BadSequenceNumber,
                    self.key.pgn,
                ));
                return out;
            }

            let packet_index = self.packet_offset + self.received_in_window;
            let start = packet_index as usize * DT_PAYLOAD_BYTES;
            let end = (start + DT_PAYLOAD_BYTES).min(self.total_size);
            self.payload[start..end].copy_from_slice(&data[1..1 + (end - start)]);
            self.next_sequence += 1;
            self.received_in_window += 1;

            if packet_index + 1 >= self.total_packets {
                let [p0, p1, p2] = pgn_bytes(self.key.pgn);
                let size = self.total_size as u32;
                out.frames.push(cm_frame(
                    self.key.destination,
                    self.key.source,
                    control_byte::ETP_EOM_ACK,
                    [
                        (size & 0xFF) as u8,
                        ((size >> 8) & 0xFF) as u8,
                        ((size >> 16) & 0xFF) as u8,
                        ((size >> 24) & 0xFF) as u8,
                        p0,
                        p1,
                        p2,
                    ],
                ));
                self.state = State::Done;
                out.finished = Some(Ok(std::mem::take(&mut self.payload)));
            } else if self.received_in_window >= self.max_packets_per_cts {
                let remaining = self.total_packets - packet_index - 1;
                let next_window = self.max_packets_per_cts.min(remaining.max(1));
                self.packet_offset = packet_index + 1;
                self.received_in_window = 0;
                let [p0, p1, p2] = pgn_bytes(self.key.pgn);
                out.frames.push(cm_frame(
                    self.key.destination,
                    self.key.source,
                    control_byte::ETP_CTS,
                    [(next_window & 0xFF) as u8, 0, 0, 0, p0, p1, p2],
                ));
                self.state = State::AwaitingDpo { deadline: now + T2_CTS_WAIT };
            } else {
                self.state = State::AwaitingDt { deadline: now + T1_INTER_DT };
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Scenario S6: a 10,000-byte transfer spanning multiple DPO-delimited
    // bursts.
    #[test]
    fn s6_etp_10_000_byte_exchange_with_dpo_round_trips() {
        let payload: Vec<u8> = (0..10_000u32).map(|b| (b % 251) as u8).collect();
        let now = Duration::ZERO;
        let (mut sender, rts) = EtpSession::open_sender(0x10, 0x20, 0xFEF1, payload.clone(), now);
        assert_eq!(rts.data[0], control_byte::ETP_RTS);
        let total_size =
            u32::from_le_bytes([rts.data[1], rts.data[2], rts.data[3], rts.data[4]]) as usize;
        assert_eq!(total_size, 10_000);

        let window = 16u32;
        let (mut receiver, cts) = EtpSession::accept_rts(0x10, 0x20, 0xFEF1, total_size, window, now);
        assert_eq!(cts.data[0], control_byte::ETP_CTS);
        sender.on_cm_frame(control_byte::ETP_CTS, &cts.data[1..], now);

        let mut assembled = Vec::new();
        let mut guard = 0;
        loop {
            guard += 1;
            assert!(guard < 10_000, "session did not converge");

            let tick_out = sender.tick(now);
            for frame in &tick_out.frames {
                let control = frame.data[0];
                let pgn = frame.id.pgn();
                let response = if pgn == 0x00C800 {
                    if control == control_byte::ETP_DPO {
                        receiver.on_dpo_frame(&frame.data[1..], now)
                    } else {
                        receiver.on_cm_frame(control, &frame.data[1..], now)
                    }
                } else {
                    receiver.on_dt_frame(&frame.data, now)
                };
                for back in response.frames {
                    let back_control = back.data[0];
                    sender.on_cm_frame(back_control, &back.data[1..], now);
                }
                if let Some(Ok(p)) = response.finished {
                    assembled = p;
                }
            }

            if sender.is_finished() || receiver.is_finished() {
                break;
            }
        }

        assert_eq!(assembled, payload);
    }
}
