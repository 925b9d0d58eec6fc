//! The Network Manager (C7): RX classification, TX scheduling, and the tick
//! driver that advances every address-claim and transport session. Grounded
//! on the teacher's `AddressRunner::drive()` — one loop alternating between
//! inbound frames and a command channel — generalized from
//! address-management-only dispatch to full PGN classification and session
//! lifecycle.
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::address_claim::{AddressClaimStateMachine, ClaimFrame, ExternalEvent, State as ClaimState};
use crate::concurrency::{BoundedQueue, ListenerHandle};
use crate::config::NetworkManagerConfig;
use crate::control_function::{CfEvent, ControlFunctionRegistry, NameFilter};
use crate::error::{InvalidArgument, SessionError};
use crate::hal::{CanBus, Clock};
use crate::identifier::{CanId, Priority, GLOBAL_ADDRESS, NULL_ADDRESS};
use crate::name::Name;
use crate::transport::control_byte;
use crate::transport::etp::EtpSession;
use crate::transport::tp::TpSession;
use crate::transport::{
    AbortReason, CanFrame, PGN_ADDRESS_CLAIMED, PGN_ETP_CM, PGN_ETP_DT, PGN_REQUEST, PGN_TP_CM,
    PGN_TP_DT, TP_MAX_PAYLOAD,
};

use super::command::{CfId, Command, CommandSender};
use super::fault::{self, Fault};
use super::message::Message;

/// Per-burst packet grant this responder offers an ETP opener. ETP's RTS, as
/// wired here (see DESIGN.md), carries no proposed window the way TP's does,
/// so the responder picks one unilaterally.
const ETP_CTS_WINDOW: u32 = 16;

struct InternalCfState {
    name: Name,
    claim: AddressClaimStateMachine,
    contention_reported: bool,
}

struct PgnCallback {
    pgn: u32,
    destination_filter: Option<u8>,
    callback: Arc<dyn Fn(&Message) + Send + Sync>,
}

struct QueuedFrame {
    frame: CanFrame,
    attempts: u8,
}

fn cm_inner_pgn(data: &[u8; 8]) -> u32 {
    u32::from_le_bytes([data[5], data[6], data[7], 0])
}

fn build_address_claimed(source: u8, name: Name) -> CanFrame {
    let id = CanId::builder(PGN_ADDRESS_CLAIMED, source)
        .destination(GLOBAL_ADDRESS)
        .build()
        .expect("Address Claimed identifier is always valid");
    CanFrame::new(id, &name.raw().to_le_bytes())
}

fn build_request(source: u8, requested_pgn: u32) -> CanFrame {
    let id = CanId::builder(PGN_REQUEST, source)
        .destination(GLOBAL_ADDRESS)
        .build()
        .expect("Request identifier is always valid");
    let p = requested_pgn.to_le_bytes();
    CanFrame::new(id, &[p[0], p[1], p[2], 0xFF, 0xFF, 0xFF, 0xFF, 0xFF])
}

fn build_abort(cm_pgn: u32, source: u8, destination: u8, reason: AbortReason, inner_pgn: u32) -> CanFrame {
    let id = CanId::builder(cm_pgn, source)
        .destination(destination)
        .build()
        .expect("CM identifier is always valid");
    let p = inner_pgn.to_le_bytes();
    CanFrame::new(id, &[control_byte::ABORT, reason.wire_value(), 0xFF, 0xFF, 0xFF, p[0], p[1], p[2]])
}

/// Owns every piece of mutable core state: the registry, the Internal CFs'
/// address-claim state machines, the TP/ETP session table, and the
/// callback lists. Only this type's methods (driven by the host's RX/tick
/// threads, or by a single cooperative loop via [`Self::pump`]) ever mutate
/// them, matching the single-writer policy in §5.
pub struct NetworkManager<B: CanBus, C: Clock> {
    bus: B,
    clock: C,
    config: NetworkManagerConfig,
    registry: ControlFunctionRegistry,
    internal_cfs: HashMap<CfId, InternalCfState>,
    tp_sessions: Vec<TpSession>,
    etp_sessions: Vec<EtpSession>,
    inbound: Arc<BoundedQueue<CanFrame>>,
    commands: Arc<BoundedQueue<Command>>,
    tx_queue: BoundedQueue<QueuedFrame>,
    retry_buffer: Vec<QueuedFrame>,
    pgn_callbacks: Vec<PgnCallback>,
    global_callbacks: Vec<Arc<dyn Fn(&Message) + Send + Sync>>,
    partner_callbacks: Vec<(NameFilter, Arc<dyn Fn(&Message) + Send + Sync>)>,
    faults: Vec<Fault>,
    evicted_addresses: Arc<Mutex<Vec<u8>>>,
    _eviction_listener: ListenerHandle<CfEvent>,
}

impl<B: CanBus, C: Clock> NetworkManager<B, C> {
    /// Construct a manager and the [`CommandSender`] application threads use
    /// to drive it.
    pub fn new(bus: B, clock: C, config: NetworkManagerConfig) -> (Self, CommandSender) {
        let commands = Arc::new(BoundedQueue::new(config.tx_queue_capacity));
        let sender = CommandSender::new(Arc::clone(&commands));
        let registry = ControlFunctionRegistry::new();

        // §4.3: when the registry evicts an address holder (re-claim by a
        // different NAME, or TTL reap), that address's TP/ETP sessions must
        // be aborted so a re-claiming peer's frames never feed a stale
        // reassembly. The listener only records the address; the actual
        // session-table cleanup happens tick-side, where `tp_sessions`/
        // `etp_sessions` are reachable.
        let evicted_addresses: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        let evicted_for_listener = Arc::clone(&evicted_addresses);
        let eviction_listener = registry.events().add_listener(move |event| {
            if let CfEvent::Evicted { address, .. } = event {
                evicted_for_listener.lock().expect("eviction buffer poisoned").push(*address);
            }
        });

        let manager = Self {
            bus,
            clock,
            tx_queue: BoundedQueue::new(config.tx_queue_capacity),
            inbound: Arc::new(BoundedQueue::new(config.tx_queue_capacity)),
            config,
            registry,
            internal_cfs: HashMap::new(),
            tp_sessions: Vec::new(),
            etp_sessions: Vec::new(),
            commands,
            retry_buffer: Vec::new(),
            pgn_callbacks: Vec::new(),
            global_callbacks: Vec::new(),
            partner_callbacks: Vec::new(),
            faults: Vec::new(),
            evicted_addresses,
            _eviction_listener: eviction_listener,
        };
        (manager, sender)
    }

    /// Handle an independent RX thread would push onto, feeding frames read
    /// from its own HAL handle into this manager's next `tick`.
    pub fn inbound_sender(&self) -> Arc<BoundedQueue<CanFrame>> {
        Arc::clone(&self.inbound)
    }

    pub fn registry(&self) -> &ControlFunctionRegistry {
        &self.registry
    }

    /// Address an Internal CF has claimed, if its Address Claim state
    /// machine has settled into [`ClaimState::AddressClaimed`].
    pub fn claimed_address(&self, id: CfId) -> Option<u8> {
        self.internal_cfs.get(&id).and_then(|cf| cf.claim.claimed_address())
    }

    /// Feed one frame straight into RX classification, using the clock's
    /// current reading. For hosts running the three-thread model with their
    /// own RX queue, prefer pushing onto [`Self::inbound_sender`] instead so
    /// classification happens inside `tick`, alongside the rest of the
    /// single-writer state.
    pub fn on_frame(&mut self, frame: CanFrame) {
        let now = self.clock.now();
        self.dispatch_frame(frame, now);
    }

    /// Cooperative single-thread driver (§5): read every frame currently
    /// buffered by the HAL, classify it, then run one `tick`.
    pub fn pump(&mut self) -> Result<Vec<Fault>, B::Error> {
        let now = self.clock.now();
        while let Some(frame) = self.bus.read_frame()? {
            self.dispatch_frame(frame, now);
        }
        Ok(self.tick())
    }

    /// Drain the inbound queue, the command queue, advance every timer,
    /// reap stale External CFs, and flush the outbound queue to the HAL.
    /// Returns whatever faults surfaced this tick (§7); never panics.
    pub fn tick(&mut self) -> Vec<Fault> {
        let now = self.clock.now();
        self.drain_inbound(now);
        self.drain_commands(now);
        self.tick_address_claims(now);
        self.tick_sessions(now);
        self.registry.reap_stale(now, self.config.external_cf_ttl);
        self.drain_evicted_sessions();
        self.check_contention_faults();
        self.flush_tx();
        std::mem::take(&mut self.faults)
    }

    #[cfg(test)]
    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    #[cfg(test)]
    pub fn clock_mut(&mut self) -> &mut C {
        &mut self.clock
    }

    fn drain_inbound(&mut self, now: Duration) {
        let mut batch = Vec::new();
        self.inbound.drain_into(&mut batch);
        for frame in batch {
            self.dispatch_frame(frame, now);
        }
    }

    fn drain_commands(&mut self, now: Duration) {
        let mut batch = Vec::new();
        self.commands.drain_into(&mut batch);
        for command in batch {
            match command {
                Command::CreateInternalCf { id, name, preferred_address } => {
                    if self.internal_cfs.values().any(|cf| cf.name == name) {
                        self.faults.push(Fault::InvalidArgument(InvalidArgument::DuplicateName));
                    } else {
                        let (lo, hi) = self.config.arbitrary_address_range;
                        self.internal_cfs.insert(
                            id,
                            InternalCfState {
                                name,
                                claim: AddressClaimStateMachine::new(name, preferred_address, now, lo..=hi),
                                contention_reported: false,
                            },
                        );
                    }
                }
                Command::DestroyInternalCf { id } => self.destroy_internal_cf(id),
                Command::Send { id, destination, pgn, priority, payload } => {
                    self.handle_send(id, destination, pgn, priority, payload, now)
                }
                Command::RegisterPgnCallback { pgn, destination_filter, callback } => {
                    self.pgn_callbacks.push(PgnCallback { pgn, destination_filter, callback });
                }
                Command::RegisterGlobalCallback { callback } => self.global_callbacks.push(callback),
                Command::RegisterPartnerCallback { filter, callback } => {
                    self.registry.resolve_partner(filter.clone());
                    self.partner_callbacks.push((filter, callback));
                }
            }
        }
    }

    fn destroy_internal_cf(&mut self, id: CfId) {
        let Some(cf) = self.internal_cfs.remove(&id) else { return };
        if let Some(address) = cf.claim.claimed_address() {
            self.registry.forget(address);
            self.tp_sessions.retain(|s| s.key.source != address && s.key.destination != address);
            self.etp_sessions.retain(|s| s.key.source != address && s.key.destination != address);
        }
    }

    /// Drain addresses the registry evicted this tick (re-claim by a
    /// different NAME, or TTL reap) and abort every TP/ETP session bound to
    /// them, so a peer that re-claims the address never has its frames fed
    /// into a session opened against the previous holder (§4.3).
    fn drain_evicted_sessions(&mut self) {
        let addresses: Vec<u8> = {
            let mut buf = self.evicted_addresses.lock().expect("eviction buffer poisoned");
            std::mem::take(&mut *buf)
        };
        for address in addresses {
            self.abort_sessions_for_address(address);
        }
    }

    fn abort_sessions_for_address(&mut self, address: u8) {
        let mut i = 0;
        while i < self.tp_sessions.len() {
            if self.tp_sessions[i].key.source == address || self.tp_sessions[i].key.destination == address {
                let key = self.tp_sessions.remove(i).key;
                #[cfg(feature = "tracing-log")]
                tracing::warn!(source = key.source, destination = key.destination, pgn = key.pgn, "TP session aborted: peer's address was re-claimed");
                self.faults.push(fault::from_session_error(
                    key.source,
                    key.destination,
                    key.pgn,
                    SessionError::Aborted(AbortReason::Other),
                ));
            } else {
                i += 1;
            }
        }

        let mut i = 0;
        while i < self.etp_sessions.len() {
            if self.etp_sessions[i].key.source == address || self.etp_sessions[i].key.destination == address {
                let key = self.etp_sessions.remove(i).key;
                #[cfg(feature = "tracing-log")]
                tracing::warn!(source = key.source, destination = key.destination, pgn = key.pgn, "ETP session aborted: peer's address was re-claimed");
                self.faults.push(fault::from_session_error(
                    key.source,
                    key.destination,
                    key.pgn,
                    SessionError::Aborted(AbortReason::Other),
                ));
            } else {
                i += 1;
            }
        }
    }

    fn handle_send(
        &mut self,
        id: CfId,
        destination: Option<u8>,
        pgn: u32,
        priority: Priority,
        payload: Vec<u8>,
        now: Duration,
    ) {
        let Some(source) = self.claimed_address(id) else {
            self.faults.push(Fault::UnknownOrUnclaimedControlFunction);
            return;
        };

        if payload.len() <= 8 {
            let mut builder = CanId::builder(pgn, source).priority(priority);
            if let Some(destination) = destination {
                builder = builder.destination(destination);
            }
            match builder.build() {
                Ok(id) => self.queue_tx(CanFrame::new(id, &payload)),
                Err(err) => self.faults.push(Fault::FrameBuildFailed(err)),
            }
            return;
        }

        if !self.has_session_capacity() {
            self.faults.push(Fault::ResourcesExhausted {
                source,
                destination: destination.unwrap_or(GLOBAL_ADDRESS),
                pgn,
            });
            return;
        }

        match destination {
            Some(destination) if payload.len() <= TP_MAX_PAYLOAD => {
                let key = crate::transport::tp::SessionKey { source, destination, pgn };
                if self.tp_sessions.iter().any(|s| s.key == key) {
                    self.faults.push(Fault::ResourcesExhausted { source, destination, pgn });
                    return;
                }
                let (session, rts) = TpSession::open_rts_sender(source, destination, pgn, payload, now);
                self.tp_sessions.push(session);
                self.queue_tx(rts);
            }
            Some(destination) => {
                let key = crate::transport::etp::SessionKey { source, destination, pgn };
                if self.etp_sessions.iter().any(|s| s.key == key) {
                    self.faults.push(Fault::ResourcesExhausted { source, destination, pgn });
                    return;
                }
                let (session, rts) = EtpSession::open_sender(source, destination, pgn, payload, now);
                self.etp_sessions.push(session);
                self.queue_tx(rts);
            }
            None if payload.len() <= TP_MAX_PAYLOAD => {
                let key = crate::transport::tp::SessionKey { source, destination: GLOBAL_ADDRESS, pgn };
                if self.tp_sessions.iter().any(|s| s.key == key) {
                    self.faults.push(Fault::ResourcesExhausted { source, destination: GLOBAL_ADDRESS, pgn });
                    return;
                }
                let (session, bam) = TpSession::open_bam_sender(source, pgn, payload, now);
                self.tp_sessions.push(session);
                self.queue_tx(bam);
            }
            None => {
                // ETP has no broadcast variant (§4.6).
                self.faults.push(Fault::ResourcesExhausted { source, destination: GLOBAL_ADDRESS, pgn });
            }
        }
    }

    fn dispatch_frame(&mut self, frame: CanFrame, now: Duration) {
        let pgn = frame.id.pgn();
        let sa = frame.id.source_address();
        let da = frame.id.destination();
        match pgn {
            PGN_ADDRESS_CLAIMED => self.handle_address_claimed(&frame, sa, now),
            PGN_REQUEST => self.handle_request(&frame, sa, da, now),
            PGN_TP_CM => self.handle_tp_cm(&frame, sa, da, now),
            PGN_TP_DT => self.handle_tp_dt(&frame, sa, da, now),
            PGN_ETP_CM => self.handle_etp_cm(&frame, sa, da, now),
            PGN_ETP_DT => self.handle_etp_dt(&frame, sa, da, now),
            _ => match Message::from_frame(&frame) {
                Ok(message) => self.dispatch(&message),
                Err(err) => self.faults.push(Fault::ExtractionError(err)),
            },
        }
    }

    fn handle_address_claimed(&mut self, frame: &CanFrame, sa: u8, now: Duration) {
        let name = Name::from_raw(u64::from_le_bytes(frame.data));
        if sa != NULL_ADDRESS {
            self.registry.observe_claim(sa, name, now);
        }
        let taken = self.taken_addresses();
        let ids: Vec<CfId> = self.internal_cfs.keys().copied().collect();
        for id in ids {
            let out = {
                let Some(cf) = self.internal_cfs.get_mut(&id) else { continue };
                cf.claim.on_frame(ExternalEvent::AddressClaimed { address: sa, name }, now, |a| taken.contains(&a))
            };
            for claim_frame in out.frames_to_send {
                self.emit_claim_frame(id, claim_frame);
            }
        }
        self.sync_internal_claims(now);
    }

    fn handle_request(&mut self, frame: &CanFrame, sa: u8, da: Option<u8>, now: Duration) {
        let data = frame.data;
        let requested_pgn = u32::from_le_bytes([data[0], data[1], data[2], 0]);
        if requested_pgn != PGN_ADDRESS_CLAIMED {
            self.emit_message(PGN_REQUEST, sa, da, frame.id.priority(), data[0..3].to_vec());
            return;
        }

        let ids: Vec<CfId> = self
            .internal_cfs
            .iter()
            .filter(|(_, cf)| matches!(da, None | Some(GLOBAL_ADDRESS)) || cf.claim.claimed_address() == da)
            .map(|(id, _)| *id)
            .collect();
        let taken = self.taken_addresses();
        for id in ids {
            let out = {
                let Some(cf) = self.internal_cfs.get_mut(&id) else { continue };
                cf.claim.on_frame(ExternalEvent::RequestForAddressClaim, now, |a| taken.contains(&a))
            };
            for claim_frame in out.frames_to_send {
                self.emit_claim_frame(id, claim_frame);
            }
        }
    }

    fn handle_tp_cm(&mut self, frame: &CanFrame, sa: u8, da: Option<u8>, now: Duration) {
        let data = frame.data;
        let control = data[0];
        let pgn = cm_inner_pgn(&data);
        match control {
            control_byte::TP_BAM => {
                let total_size = u16::from_le_bytes([data[1], data[2]]) as usize;
                let num_packets = data[3];
                let key = crate::transport::tp::SessionKey { source: sa, destination: GLOBAL_ADDRESS, pgn };
                if self.tp_sessions.iter().any(|s| s.key == key) {
                    return;
                }
                if !self.has_session_capacity() {
                    self.faults.push(Fault::ResourcesExhausted { source: sa, destination: GLOBAL_ADDRESS, pgn });
                    return;
                }
                #[cfg(feature = "tracing-log")]
                tracing::debug!(source = sa, pgn, total_size, "opening BAM receive session");
                self.tp_sessions.push(TpSession::open_bam_receiver(sa, pgn, total_size, num_packets, now));
            }
            control_byte::TP_RTS => {
                let Some(destination) = da else { return };
                if !self.owns_address(destination) {
                    return;
                }
                let total_size = u16::from_le_bytes([data[1], data[2]]) as usize;
                let num_packets = data[3];
                let window = data[4];
                let key = crate::transport::tp::SessionKey { source: sa, destination, pgn };
                if self.tp_sessions.iter().any(|s| s.key == key) {
                    self.queue_tx(build_abort(PGN_TP_CM, destination, sa, AbortReason::AlreadyInSession, pgn));
                    return;
                }
                if !self.has_session_capacity() {
                    self.queue_tx(build_abort(PGN_TP_CM, destination, sa, AbortReason::OutOfResources, pgn));
                    return;
                }
                #[cfg(feature = "tracing-log")]
                tracing::debug!(source = sa, destination, pgn, total_size, "accepting TP.CM_RTS");
                let (session, cts) = TpSession::accept_rts(sa, destination, pgn, total_size, num_packets, window, now);
                self.tp_sessions.push(session);
                self.queue_tx(cts);
            }
            _ => {
                let Some(idx) = self.find_tp_session(sa, da.unwrap_or(GLOBAL_ADDRESS), Some(pgn)) else { return };
                let outcome = self.tp_sessions[idx].on_cm_frame(control, &data[1..], now);
                let key = self.tp_sessions[idx].key;
                self.queue_frames(outcome.frames);
                if let Some(result) = outcome.finished {
                    self.tp_sessions.remove(idx);
                    self.finish_tp(key, result);
                }
            }
        }
    }

    fn handle_tp_dt(&mut self, frame: &CanFrame, sa: u8, da: Option<u8>, now: Duration) {
        let Some(destination) = da else { return };
        let Some(idx) = self.find_tp_session(sa, destination, None) else { return };
        let outcome = self.tp_sessions[idx].on_dt_frame(&frame.data, now);
        let key = self.tp_sessions[idx].key;
        self.queue_frames(outcome.frames);
        if let Some(result) = outcome.finished {
            self.tp_sessions.remove(idx);
            self.finish_tp(key, result);
        }
    }

    fn handle_etp_cm(&mut self, frame: &CanFrame, sa: u8, da: Option<u8>, now: Duration) {
        let data = frame.data;
        let control = data[0];
        let pgn = cm_inner_pgn(&data);
        match control {
            control_byte::ETP_RTS => {
                let Some(destination) = da else { return };
                if !self.owns_address(destination) {
                    return;
                }
                let total_size = u32::from_le_bytes([data[1], data[2], data[3], data[4]]) as usize;
                let key = crate::transport::etp::SessionKey { source: sa, destination, pgn };
                if self.etp_sessions.iter().any(|s| s.key == key) {
                    self.queue_tx(build_abort(PGN_ETP_CM, destination, sa, AbortReason::AlreadyInSession, pgn));
                    return;
                }
                if !self.has_session_capacity() {
                    self.queue_tx(build_abort(PGN_ETP_CM, destination, sa, AbortReason::OutOfResources, pgn));
                    return;
                }
                let (session, cts) =
                    EtpSession::accept_rts(sa, destination, pgn, total_size, ETP_CTS_WINDOW, now);
                self.etp_sessions.push(session);
                self.queue_tx(cts);
            }
            control_byte::ETP_DPO => {
                let Some(destination) = da else { return };
                let Some(idx) = self.find_etp_session(sa, destination, Some(pgn)) else { return };
                let outcome = self.etp_sessions[idx].on_dpo_frame(&data[1..], now);
                self.queue_frames(outcome.frames);
            }
            _ => {
                let Some(idx) = self.find_etp_session(sa, da.unwrap_or(GLOBAL_ADDRESS), Some(pgn)) else { return };
                let outcome = self.etp_sessions[idx].on_cm_frame(control, &data[1..], now);
                let key = self.etp_sessions[idx].key;
                self.queue_frames(outcome.frames);
                if let Some(result) = outcome.finished {
                    self.etp_sessions.remove(idx);
                    self.finish_etp(key, result);
                }
            }
        }
    }

    fn handle_etp_dt(&mut self, frame: &CanFrame, sa: u8, da: Option<u8>, now: Duration) {
        let Some(destination) = da else { return };
        let Some(idx) = self.find_etp_session(sa, destination, None) else { return };
        let outcome = self.etp_sessions[idx].on_dt_frame(&frame.data, now);
        let key = self.etp_sessions[idx].key;
        self.queue_frames(outcome.frames);
        if let Some(result) = outcome.finished {
            self.etp_sessions.remove(idx);
            self.finish_etp(key, result);
        }
    }

    fn finish_tp(&mut self, key: crate::transport::tp::SessionKey, result: Result<Vec<u8>, SessionError>) {
        match result {
            Ok(payload) => {
                #[cfg(feature = "tracing-log")]
                tracing::debug!(source = key.source, destination = key.destination, pgn = key.pgn, bytes = payload.len(), "TP session closed");
                let destination = (key.destination != GLOBAL_ADDRESS).then_some(key.destination);
                self.emit_message(key.pgn, key.source, destination, Priority::DEFAULT, payload);
            }
            Err(err) => {
                #[cfg(feature = "tracing-log")]
                tracing::warn!(source = key.source, destination = key.destination, pgn = key.pgn, ?err, "TP session aborted");
                self.faults.push(fault::from_session_error(key.source, key.destination, key.pgn, err));
            }
        }
    }

    fn finish_etp(&mut self, key: crate::transport::etp::SessionKey, result: Result<Vec<u8>, SessionError>) {
        match result {
            Ok(payload) => {
                #[cfg(feature = "tracing-log")]
                tracing::debug!(source = key.source, destination = key.destination, pgn = key.pgn, bytes = payload.len(), "ETP session closed");
                self.emit_message(key.pgn, key.source, Some(key.destination), Priority::DEFAULT, payload);
            }
            Err(err) => {
                #[cfg(feature = "tracing-log")]
                tracing::warn!(source = key.source, destination = key.destination, pgn = key.pgn, ?err, "ETP session aborted");
                self.faults.push(fault::from_session_error(key.source, key.destination, key.pgn, err));
            }
        }
    }

    fn find_tp_session(&self, a: u8, b: u8, pgn: Option<u32>) -> Option<usize> {
        self.tp_sessions.iter().position(|s| {
            let addr_match =
                (s.key.source == a && s.key.destination == b) || (s.key.source == b && s.key.destination == a);
            addr_match && pgn.map_or(true, |p| s.key.pgn == p)
        })
    }

    fn find_etp_session(&self, a: u8, b: u8, pgn: Option<u32>) -> Option<usize> {
        self.etp_sessions.iter().position(|s| {
            let addr_match =
                (s.key.source == a && s.key.destination == b) || (s.key.source == b && s.key.destination == a);
            addr_match && pgn.map_or(true, |p| s.key.pgn == p)
        })
    }

    fn tick_address_claims(&mut self, now: Duration) {
        let ids: Vec<CfId> = self.internal_cfs.keys().copied().collect();
        for id in ids {
            let taken = self.taken_addresses();
            let out = {
                let Some(cf) = self.internal_cfs.get_mut(&id) else { continue };
                cf.claim.tick(now, |a| taken.contains(&a))
            };
            for claim_frame in out.frames_to_send {
                self.emit_claim_frame(id, claim_frame);
            }
        }
        self.sync_internal_claims(now);
    }

    fn tick_sessions(&mut self, now: Duration) {
        let mut to_send = Vec::new();
        let mut finished = Vec::new();
        for (i, session) in self.tp_sessions.iter_mut().enumerate() {
            let outcome = session.tick(now);
            to_send.extend(outcome.frames);
            if let Some(result) = outcome.finished {
                finished.push((i, session.key, result));
            }
        }
        self.queue_frames(to_send);
        for (i, key, result) in finished.into_iter().rev() {
            self.tp_sessions.remove(i);
            self.finish_tp(key, result);
        }

        let mut to_send = Vec::new();
        let mut finished = Vec::new();
        for (i, session) in self.etp_sessions.iter_mut().enumerate() {
            let outcome = session.tick(now);
            to_send.extend(outcome.frames);
            if let Some(result) = outcome.finished {
                finished.push((i, session.key, result));
            }
        }
        self.queue_frames(to_send);
        for (i, key, result) in finished.into_iter().rev() {
            self.etp_sessions.remove(i);
            self.finish_etp(key, result);
        }
    }

    fn check_contention_faults(&mut self) {
        for cf in self.internal_cfs.values_mut() {
            if !cf.contention_reported && cf.claim.state() == ClaimState::UnableToClaim {
                cf.contention_reported = true;
                #[cfg(feature = "tracing-log")]
                tracing::warn!(name = %cf.name, "lost address-claim contention with no fallback left");
                self.faults.push(Fault::AddressContentionLost { name: cf.name });
            }
        }
    }

    fn emit_claim_frame(&mut self, id: CfId, claim_frame: ClaimFrame) {
        let source = self.claimed_address(id).unwrap_or(NULL_ADDRESS);
        let frame = match claim_frame {
            ClaimFrame::RequestForAddressClaim => build_request(source, PGN_ADDRESS_CLAIMED),
            ClaimFrame::AddressClaimed { address, name } => {
                #[cfg(feature = "tracing-log")]
                tracing::info!(address, name = %name, "claimed address");
                build_address_claimed(address, name)
            }
            ClaimFrame::CannotClaimAddress { name } => {
                #[cfg(feature = "tracing-log")]
                tracing::warn!(name = %name, "unable to claim an address");
                build_address_claimed(NULL_ADDRESS, name)
            }
        };
        self.queue_tx(frame);
    }

    fn sync_internal_claims(&mut self, now: Duration) {
        let updates: Vec<(u8, Name)> = self
            .internal_cfs
            .values()
            .filter_map(|cf| cf.claim.claimed_address().map(|addr| (addr, cf.name)))
            .filter(|(addr, name)| self.registry.address_of(*name) != Some(*addr))
            .collect();
        for (addr, name) in updates {
            self.registry.register_internal_claim(addr, name, now);
        }
    }

    fn taken_addresses(&self) -> HashSet<u8> {
        let mut set: HashSet<u8> = (0..=255u8).filter(|&a| self.registry.is_claimed(a)).collect();
        for cf in self.internal_cfs.values() {
            if let Some(addr) = cf.claim.claimed_address() {
                set.insert(addr);
            }
        }
        set
    }

    fn owns_address(&self, address: u8) -> bool {
        self.internal_cfs.values().any(|cf| cf.claim.claimed_address() == Some(address))
    }

    fn has_session_capacity(&self) -> bool {
        self.tp_sessions.len() + self.etp_sessions.len() < self.config.max_transport_sessions
    }

    fn queue_tx(&mut self, frame: CanFrame) {
        if self.tx_queue.push(QueuedFrame { frame, attempts: 0 }).is_err() {
            self.faults.push(Fault::QueueFull);
        }
    }

    fn queue_frames(&mut self, frames: Vec<CanFrame>) {
        for frame in frames {
            self.queue_tx(frame);
        }
    }

    fn flush_tx(&mut self) {
        let mut batch = std::mem::take(&mut self.retry_buffer);
        self.tx_queue.drain_into(&mut batch);
        for queued in batch {
            match self.bus.write_frame(&queued.frame) {
                Ok(true) => {}
                Ok(false) | Err(_) => {
                    let attempts = queued.attempts + 1;
                    if attempts >= 3 {
                        #[cfg(feature = "tracing-log")]
                        tracing::warn!(attempts, "dropping frame after repeated HAL write failures");
                        self.faults.push(Fault::TransientBusError { frame: queued.frame });
                    } else {
                        self.retry_buffer.push(QueuedFrame { frame: queued.frame, attempts });
                    }
                }
            }
        }
    }

    fn emit_message(&mut self, pgn: u32, source: u8, destination: Option<u8>, priority: Priority, payload: Vec<u8>) {
        let message = Message { pgn, source_address: source, destination_address: destination, priority, data: payload };
        self.dispatch(&message);
    }

    fn dispatch(&self, message: &Message) {
        for cb in &self.pgn_callbacks {
            if cb.pgn == message.pgn
                && cb.destination_filter.map_or(true, |d| Some(d) == message.destination_address)
            {
                (cb.callback)(message);
            }
        }
        for cb in &self.global_callbacks {
            cb(message);
        }
        if let Some(name) = self.registry.name_of(message.source_address) {
            for (filter, cb) in &self.partner_callbacks {
                if filter.matches(name) {
                    cb(message);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::test_support::{ManualClock, MemoryBus};
    use std::sync::Mutex;

    fn manager_with_memory_bus(config: NetworkManagerConfig) -> (NetworkManager<MemoryBus, ManualClock>, CommandSender) {
        NetworkManager::new(MemoryBus::default(), ManualClock::default(), config)
    }

    #[test]
    fn internal_cf_claims_its_preferred_address_on_an_empty_bus() {
        let (mut mgr, cmds) = manager_with_memory_bus(NetworkManagerConfig::default());
        let name = Name::builder().manufacturer_code(7).build();
        let id = cmds.create_internal_cf(name, 0x1C);

        let mut now = Duration::ZERO;
        for _ in 0..60 {
            now += Duration::from_millis(10);
            mgr.clock_mut().now = now;
            mgr.tick();
        }

        assert_eq!(mgr.claimed_address(id), Some(0x1C));
        assert_eq!(mgr.registry().address_of(name), Some(0x1C));
        assert!(mgr
            .bus_mut()
            .outbound
            .iter()
            .any(|f| f.id.pgn() == PGN_ADDRESS_CLAIMED && f.id.source_address() == 0x1C));
    }

    #[test]
    fn request_after_settling_is_answered_with_the_current_claim() {
        let (mut mgr, cmds) = manager_with_memory_bus(NetworkManagerConfig::default());
        let name = Name::builder().manufacturer_code(9).build();
        let id = cmds.create_internal_cf(name, 0x30);

        let mut now = Duration::ZERO;
        for _ in 0..60 {
            now += Duration::from_millis(10);
            mgr.clock_mut().now = now;
            mgr.tick();
        }
        assert_eq!(mgr.claimed_address(id), Some(0x30));
        mgr.bus_mut().outbound.clear();

        let request_id = CanId::builder(PGN_REQUEST, 0x40).destination(0xFF).build().unwrap();
        let request = CanFrame::new(request_id, &[0x00, 0xEE, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
        mgr.on_frame(request);
        mgr.tick();

        assert!(mgr
            .bus_mut()
            .outbound
            .iter()
            .any(|f| f.id.pgn() == PGN_ADDRESS_CLAIMED && f.id.source_address() == 0x30));
    }

    #[test]
    fn session_capacity_of_zero_rejects_new_transfers() {
        let config = NetworkManagerConfig::builder().max_transport_sessions(0).build();
        let (mut mgr, cmds) = manager_with_memory_bus(config);
        let name = Name::builder().manufacturer_code(11).build();
        let id = cmds.create_internal_cf(name, 0x12);

        let mut now = Duration::ZERO;
        for _ in 0..60 {
            now += Duration::from_millis(10);
            mgr.clock_mut().now = now;
            mgr.tick();
        }

        cmds.send(id, Some(0x20), 0xFEF1, Priority::DEFAULT, vec![0u8; 50]).unwrap();
        let faults = mgr.tick();
        assert!(faults.iter().any(|f| matches!(f, Fault::ResourcesExhausted { .. })));
    }

    // Scenario S4, end to end through two managers: opener's Send command
    // becomes an RTS/CTS session whose reassembled payload reaches the
    // peer's global callback as a single Message.
    #[test]
    fn s4_tp_session_round_trips_through_two_network_managers() {
        let (mut sender_mgr, sender_cmds) = manager_with_memory_bus(NetworkManagerConfig::default());
        let (mut receiver_mgr, receiver_cmds) = manager_with_memory_bus(NetworkManagerConfig::default());

        let sender_name = Name::builder().manufacturer_code(10).build();
        let receiver_name = Name::builder().manufacturer_code(20).build();
        let sender_cf = sender_cmds.create_internal_cf(sender_name, 0x10);
        let receiver_cf = receiver_cmds.create_internal_cf(receiver_name, 0x20);

        let received: Arc<Mutex<Vec<Message>>> = Arc::new(Mutex::new(Vec::new()));
        let received_clone = Arc::clone(&received);
        receiver_cmds.register_global_callback(move |m| received_clone.lock().unwrap().push(m.clone()));

        let payload: Vec<u8> = (0..100u16).map(|b| b as u8).collect();
        let mut now = Duration::ZERO;
        let mut sent = false;
        let mut guard = 0;
        loop {
            guard += 1;
            assert!(guard < 300, "scenario did not converge");
            now += Duration::from_millis(10);
            sender_mgr.clock_mut().now = now;
            receiver_mgr.clock_mut().now = now;

            sender_mgr.pump().unwrap();
            receiver_mgr.pump().unwrap();

            let to_receiver: Vec<_> = sender_mgr.bus_mut().outbound.drain(..).collect();
            receiver_mgr.bus_mut().inbound.extend(to_receiver);
            let to_sender: Vec<_> = receiver_mgr.bus_mut().outbound.drain(..).collect();
            sender_mgr.bus_mut().inbound.extend(to_sender);

            if !sent
                && sender_mgr.claimed_address(sender_cf) == Some(0x10)
                && receiver_mgr.claimed_address(receiver_cf) == Some(0x20)
            {
                sender_cmds
                    .send(sender_cf, Some(0x20), 0x00FEF1, Priority::DEFAULT, payload.clone())
                    .unwrap();
                sent = true;
            }

            if !received.lock().unwrap().is_empty() {
                break;
            }
        }

        let messages = received.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].data, payload);
        assert_eq!(messages[0].source_address, 0x10);
    }
}
