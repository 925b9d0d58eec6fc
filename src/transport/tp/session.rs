//! One TP session: either the BAM broadcast variant or RTS/CTS addressed
//! variant, from either the sending or the receiving side. Driven entirely
//! by `tick`/`on_frame`; holds no reference to a bus or clock.
use std::time::Duration;

use crate::error::SessionError;
use crate::identifier::{CanId, GLOBAL_ADDRESS};
use crate::transport::control_byte;
use crate::transport::frame::CanFrame;
use crate::transport::{AbortReason, PGN_TP_CM, PGN_TP_DT, TP_MAX_PAYLOAD};

pub const T1_INTER_DT: Duration = Duration::from_millis(750);
pub const T2_CTS_WAIT: Duration = Duration::from_millis(1250);
pub const T3_EOM_WAIT: Duration = Duration::from_millis(1250);
/// Time the opener allows a `CTS(0)` hold to last before the destination's
/// next real `CTS` must arrive (§4.5).
pub const TH_HOLD: Duration = Duration::from_millis(500);
pub const BAM_MIN_DT_INTERVAL: Duration = Duration::from_millis(50);

const DT_PAYLOAD_BYTES: usize = 7;

/// Identifies a session. At most one may exist per tuple at a time (§4.5
/// concurrency rule); `destination` is [`GLOBAL_ADDRESS`] for BAM sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub source: u8,
    pub destination: u8,
    pub pgn: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Sender,
    Receiver,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    AwaitingFirstCts {
        deadline: Duration,
    },
    SendingBurst {
        granted: u8,
        sent_in_burst: u8,
    },
    AwaitingCtsOrEom {
        deadline: Duration,
    },
    SendingBam {
        next_dt_at: Duration,
    },
    AwaitingDt {
        deadline: Duration,
    },
    ReceivingBam {
        deadline: Duration,
    },
    Done,
    Aborted(AbortReason),
}

/// What the caller should do after a `tick`/`on_frame` call.
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

/// A single TP transfer, in progress.
pub struct TpSession {
    pub key: SessionKey,
    role: Role,
    broadcast: bool,
    total_size: usize,
    num_packets: u8,
    max_packets_per_cts: u8,
    payload: Vec<u8>,
    next_sequence: u8,
    received_in_window: u8,
    state: State,
}

fn pgn_bytes(pgn: u32) -> [u8; 3] {
    [(pgn & 0xFF) as u8, ((pgn >> 8) & 0xFF) as u8, ((pgn >> 16) & 0xFF) as u8]
}

fn num_packets_for(total_size: usize) -> u8 {
    total_size.div_ceil(DT_PAYLOAD_BYTES) as u8
}

fn cm_frame(source: u8, destination: u8, control: u8, rest: [u8; 7]) -> CanFrame {
    let mut data = [control, 0, 0, 0, 0, 0, 0, 0];
    data[1..8].copy_from_slice(&rest);
    let id = CanId::builder(PGN_TP_CM, source)
        .destination(destination)
        .build()
        .expect("TP.CM identifier is always valid");
    CanFrame { id, data, len: 8 }
}

fn rts_or_bam_body(control: u8, total_size: usize, num_packets: u8, window: u8, pgn: u32) -> CanFrame {
    let [p0, p1, p2] = pgn_bytes(pgn);
    cm_frame(
        0,
        0,
        control,
        [
            (total_size & 0xFF) as u8,
            ((total_size >> 8) & 0xFF) as u8,
            num_packets,
            window,
            p0,
            p1,
            p2,
        ],
    )
}

fn dt_frame(source: u8, destination: u8, sequence: u8, chunk: &[u8]) -> CanFrame {
    let mut data = [0xFFu8; 8];
    data[0] = sequence;
    data[1..1 + chunk.len()].copy_from_slice(chunk);
    let mut builder = CanId::builder(PGN_TP_DT, source);
    if destination != GLOBAL_ADDRESS {
        builder = builder.destination(destination);
    } else {
        builder = builder.destination(GLOBAL_ADDRESS);
    }
    let id = builder.build().expect("TP.DT identifier is always valid");
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

impl TpSession {
    /// Open a BAM broadcast send. Returns the session plus the initial
    /// `TP.CM_BAM` frame; subsequent DT frames are produced by `tick`.
    pub fn open_bam_sender(source: u8, pgn: u32, payload: Vec<u8>, now: Duration) -> (Self, CanFrame) {
        assert!(payload.len() <= TP_MAX_PAYLOAD, "payload exceeds TP's maximum; use ETP");
        let total_size = payload.len();
        let num_packets = num_packets_for(total_size);
        let bam = rts_or_bam_body(control_byte::TP_BAM, total_size, num_packets, 0xFF, pgn);
        let bam = CanFrame {
            id: CanId::builder(PGN_TP_CM, source)
                .destination(GLOBAL_ADDRESS)
                .build()
                .expect("valid"),
            ..bam
        };
        let session = Self {
            key: SessionKey { source, destination: GLOBAL_ADDRESS, pgn },
            role: Role::Sender,
            broadcast: true,
            total_size,
            num_packets,
            max_packets_per_cts: num_packets,
            payload,
            next_sequence: 1,
            received_in_window: 0,
            state: State::SendingBam { next_dt_at: now + BAM_MIN_DT_INTERVAL },
        };
        (session, bam)
    }

    /// Start reassembling a BAM broadcast after observing its `TP.CM_BAM`.
    pub fn open_bam_receiver(
        source: u8,
        pgn: u32,
        total_size: usize,
        num_packets: u8,
        now: Duration,
    ) -> Self {
        Self {
            key: SessionKey { source, destination: GLOBAL_ADDRESS, pgn },
            role: Role::Receiver,
            broadcast: true,
            total_size,
            num_packets,
            max_packets_per_cts: num_packets,
            payload: vec![0u8; total_size],
            next_sequence: 1,
            received_in_window: 0,
            state: State::ReceivingBam { deadline: now + T1_INTER_DT },
        }
    }

    /// Open an RTS/CTS addressed send. Returns the session plus the initial
    /// `TP.CM_RTS` frame.
    pub fn open_rts_sender(
        source: u8,
        destination: u8,
        pgn: u32,
        payload: Vec<u8>,
        now: Duration,
    ) -> (Self, CanFrame) {
        assert!(payload.len() <= TP_MAX_PAYLOAD, "payload exceeds TP's maximum; use ETP");
        let total_size = payload.len();
        let num_packets = num_packets_for(total_size);
        let rts = rts_or_bam_body(control_byte::TP_RTS, total_size, num_packets, num_packets, pgn);
        let rts = CanFrame {
            id: CanId::builder(PGN_TP_CM, source)
                .destination(destination)
                .build()
                .expect("valid"),
            ..rts
        };
        let session = Self {
            key: SessionKey { source, destination, pgn },
            role: Role::Sender,
            broadcast: false,
            total_size,
            num_packets,
            max_packets_per_cts: 0,
            payload,
            next_sequence: 1,
            received_in_window: 0,
            state: State::AwaitingFirstCts { deadline: now + T2_CTS_WAIT },
        };
        (session, rts)
    }

    /// Accept an observed `TP.CM_RTS` as the responder. Returns the session
    /// plus the granting `TP.CM_CTS` frame.
    pub fn accept_rts(
        source: u8,
        destination: u8,
        pgn: u32,
        total_size: usize,
        num_packets: u8,
        window: u8,
        now: Duration,
    ) -> (Self, CanFrame) {
        let granted = window.min(num_packets).max(1);
        let [p0, p1, p2] = pgn_bytes(pgn);
        let cts = cm_frame(destination, source, control_byte::TP_CTS, [granted, 1, 0xFF, 0xFF, p0, p1, p2]);
        let session = Self {
            key: SessionKey { source, destination, pgn },
            role: Role::Receiver,
            broadcast: false,
            total_size,
            num_packets,
            max_packets_per_cts: window.max(1),
            payload: vec![0u8; total_size],
            next_sequence: 1,
            received_in_window: 0,
            state: State::AwaitingDt { deadline: now + T1_INTER_DT },
        };
        (session, cts)
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, State::Done | State::Aborted(_))
    }

    /// Advance time-driven behavior: BAM pacing, burst transmission, and
    /// timeout detection. Frames to emit (if any) and a terminal result (if
    /// the session just finished) are returned.
    pub fn tick(&mut self, now: Duration) -> TickOutcome {
        let mut out = TickOutcome::default();
        match self.state.clone() {
            State::SendingBam { next_dt_at } if now >= next_dt_at => {
                let start = (self.next_sequence as usize - 1) * DT_PAYLOAD_BYTES;
                let end = (start + DT_PAYLOAD_BYTES).min(self.total_size);
                out.frames.push(dt_frame(
                    self.key.source,
                    GLOBAL_ADDRESS,
                    self.next_sequence,
                    &self.payload[start..end],
                ));
                if self.next_sequence >= self.num_packets {
                    self.state = State::Done;
                    out.finished = Some(Ok(std::mem::take(&mut self.payload)));
                } else {
                    self.next_sequence += 1;
                    self.state = State::SendingBam { next_dt_at: now + BAM_MIN_DT_INTERVAL };
                }
            }
            State::SendingBurst { granted, sent_in_burst } if sent_in_burst < granted => {
                let start = (self.next_sequence as usize - 1) * DT_PAYLOAD_BYTES;
                let end = (start + DT_PAYLOAD_BYTES).min(self.total_size);
                out.frames.push(dt_frame(
                    self.key.source,
                    self.key.destination,
                    self.next_sequence,
                    &self.payload[start..end],
                ));
                let sent_in_burst = sent_in_burst + 1;
                if self.next_sequence >= self.num_packets {
                    self.state = State::AwaitingCtsOrEom { deadline: now + T3_EOM_WAIT };
                } else if sent_in_burst >= granted {
                    self.state = State::AwaitingCtsOrEom { deadline: now + T2_CTS_WAIT };
                } else {
                    self.state = State::SendingBurst { granted, sent_in_burst };
                }
                self.next_sequence += 1;
            }
            State::AwaitingFirstCts { deadline }
            | State::AwaitingCtsOrEom { deadline }
            | State::AwaitingDt { deadline }
            | State::ReceivingBam { deadline }
                if now >= deadline =>
            {
                self.state = State::Aborted(AbortReason::Timeout);
                if !self.broadcast {
                    let (from, to) = match self.role {
                        Role::Sender => (self.key.source, self.key.destination),
                        Role::Receiver => (self.key.destination, self.key.source),
                    };
                    out.frames.push(abort_frame(from, to, AbortReason::Timeout, self.key.pgn));
                }
                out.finished = Some(Err(SessionError::TimedOut("TP timer")));
            }
            _ => {}
        }
        out
    }

    /// Feed an observed `TP.CM` (control) frame addressed to this session.
    pub fn on_cm_frame(&mut self, control: u8, data: &[u8], now: Duration) -> FrameOutcome {
        let mut out = FrameOutcome::default();
        match (control, self.state.clone()) {
            (control_byte::TP_CTS, State::AwaitingFirstCts { .. })
            | (control_byte::TP_CTS, State::AwaitingCtsOrEom { .. }) => {
                let granted = data[1];
                let next_seq = data[2];
                if granted == 0 {
                    // Responder asks us to hold; keep waiting for its next CTS.
                    self.state = State::AwaitingCtsOrEom { deadline: now + TH_HOLD };
                    return out;
                }
                self.next_sequence = next_seq;
                self.state = State::SendingBurst { granted, sent_in_burst: 0 };
            }
            (control_byte::TP_EOM_ACK, State::AwaitingCtsOrEom { .. }) => {
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

    /// Feed an observed `TP.DT` frame addressed to this session.
    pub fn on_dt_frame(&mut self, data: &[u8; 8], now: Duration) -> FrameOutcome {
        let mut out = FrameOutcome::default();
        let sequence = data[0];
        match self.state.clone() {
            State::AwaitingDt { .. } | State::ReceivingBam { .. } => {
                if sequence != self.next_sequence {
                    self.state = State::Aborted(AbortReason::BadSequenceNumber);
                    out.finished = Some(Err(SessionError::ProtocolViolation(
                        AbortReason::BadSequenceNumber,
                    )));
                    if !self.broadcast {
                        out.frames.push(abort_frame(
                            self.key.destination,
                            self.key.source,
                            AbortReason::BadSequenceNumber,
                            self.key.pgn,
                        ));
                    }
                    return out;
                }

                let start = (sequence as usize - 1) * DT_PAYLOAD_BYTES;
                let end = (start + DT_PAYLOAD_BYTES).min(self.total_size);
                self.payload[start..end].copy_from_slice(&data[1..1 + (end - start)]);
                self.next_sequence += 1;
                self.received_in_window += 1;

                if sequence >= self.num_packets {
                    if !self.broadcast {
                        let [p0, p1, p2] = pgn_bytes(self.key.pgn);
                        out.frames.push(cm_frame(
                            self.key.destination,
                            self.key.source,
                            control_byte::TP_EOM_ACK,
                            [
                                (self.total_size & 0xFF) as u8,
                                ((self.total_size >> 8) & 0xFF) as u8,
                                self.num_packets,
                                0xFF,
                                p0,
                                p1,
                                p2,
                            ],
                        ));
                    }
                    self.state = State::Done;
                    out.finished = Some(Ok(std::mem::take(&mut self.payload)));
                } else if !self.broadcast && self.received_in_window >= self.max_packets_per_cts {
                    // Granted window exhausted: issue another CTS.
                    let remaining = self.num_packets - sequence;
                    let next_window = self.max_packets_per_cts.min(remaining.max(1));
                    self.received_in_window = 0;
                    let [p0, p1, p2] = pgn_bytes(self.key.pgn);
                    out.frames.push(cm_frame(
                        self.key.destination,
                        self.key.source,
                        control_byte::TP_CTS,
                        [next_window, sequence + 1, 0xFF, 0xFF, p0, p1, p2],
                    ));
                    self.state = State::AwaitingDt { deadline: now + T1_INTER_DT };
                } else {
                    self.state = State::AwaitingDt { deadline: now + T1_INTER_DT };
                }
            }
            _ => {}
        }
        out
    }

    pub fn total_size(&self) -> usize {
        self.total_size
    }
}
