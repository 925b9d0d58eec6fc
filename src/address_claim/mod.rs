//! Address Claim state machine (§4.4): one instance per Internal control
//! function, negotiating a source address against the rest of the bus.
//! Grounded on the teacher's `claim_address`/`AddressClaimIterator` address
//! search order and `is_conflicting_claim` NAME-contention rule, restructured
//! into an explicit state enum driven by `tick`/`on_frame` so tests can
//! observe mid-negotiation state.
use std::ops::RangeInclusive;
use std::time::Duration;

use rand::Rng;

use crate::identifier::NULL_ADDRESS;
use crate::name::Name;

/// Default inclusive bounds of the arbitrary address range (§4.4); the
/// SAE-assigned universal range, and [`crate::config::NetworkManagerConfig`]'s
/// own default. Hosts that need a narrower or wider range configure it via
/// `NetworkManagerConfig::arbitrary_address_range` instead of this constant.
pub const ARBITRARY_ADDRESS_RANGE: std::ops::RangeInclusive<u8> = 128..=247;
pub const DITHER_MAX_MS: u64 = 153;
pub const WAIT_FOR_CLAIM: Duration = Duration::from_millis(250);

/// Current phase of one control function's address negotiation, mirroring
/// the state table in §4.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    None,
    WaitOutOfAddressClaim,
    SendRequestForClaim,
    WaitForClaim,
    AddressClaimed,
    Contention,
    UnableToClaim,
}

/// Iterates the address search order: preferred address first, then the
/// configured arbitrary range, skipping addresses the caller reports as
/// taken.
pub struct AddressSearch {
    preferred: u8,
    offered_preferred: bool,
    next_arbitrary: u8,
    range: RangeInclusive<u8>,
}

impl AddressSearch {
    pub fn new(preferred: u8, range: RangeInclusive<u8>) -> Self {
        Self {
            preferred,
            offered_preferred: false,
            next_arbitrary: *range.start(),
            range,
        }
    }

    /// Yield the next candidate address not in `taken`, or `None` if the
    /// search space (preferred + the configured arbitrary range) is
    /// exhausted.
    pub fn next(&mut self, taken: impl Fn(u8) -> bool) -> Option<u8> {
        if !self.offered_preferred {
            self.offered_preferred = true;
            if !taken(self.preferred) {
                return Some(self.preferred);
            }
        }
        while self.range.contains(&self.next_arbitrary) {
            let candidate = self.next_arbitrary;
            self.next_arbitrary = self.next_arbitrary.saturating_add(1);
            if !taken(candidate) {
                return Some(candidate);
            }
        }
        None
    }
}

/// What the caller should do after `tick`/`on_frame`.
#[derive(Debug, Default)]
pub struct StepOutcome {
    /// Frames to transmit (Request-for-Address-Claim, Address-Claimed, or
    /// Cannot-Claim-Address), in order.
    pub frames_to_send: Vec<ClaimFrame>,
    /// Set once the CF's claimed address has changed (including becoming
    /// [`NULL_ADDRESS`] on [`State::UnableToClaim`]).
    pub address_changed: bool,
}

/// The logical content of a frame this state machine wants transmitted; the
/// Network Manager turns these into wire [`crate::transport::CanFrame`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimFrame {
    RequestForAddressClaim,
    AddressClaimed { address: u8, name: Name },
    CannotClaimAddress { name: Name },
}

/// Observed external events this state machine reacts to.
#[derive(Debug, Clone, Copy)]
pub enum ExternalEvent {
    RequestForAddressClaim,
    AddressClaimed { address: u8, name: Name },
}

pub struct AddressClaimStateMachine {
    name: Name,
    arbitrary_capable: bool,
    preferred_address: u8,
    search: AddressSearch,
    claimed_address: u8,
    state: State,
    dither_deadline: Duration,
    wait_for_claim_deadline: Duration,
}

impl AddressClaimStateMachine {
    pub fn new(name: Name, preferred_address: u8, now: Duration, arbitrary_range: RangeInclusive<u8>) -> Self {
        let dither_ms = rand::thread_rng().gen_range(0..=DITHER_MAX_MS);
        Self {
            name,
            arbitrary_capable: name.is_arbitrary_address_capable(),
            preferred_address,
            search: AddressSearch::new(preferred_address, arbitrary_range),
            claimed_address: NULL_ADDRESS,
            state: State::None,
            dither_deadline: now + Duration::from_millis(dither_ms),
            wait_for_claim_deadline: Duration::ZERO,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn claimed_address(&self) -> Option<u8> {
        (self.state == State::AddressClaimed).then_some(self.claimed_address)
    }

    pub fn is_settled(&self) -> bool {
        matches!(self.state, State::AddressClaimed | State::UnableToClaim)
    }

    /// Advance time. `taken` reports whether a candidate address is already
    /// held by another CF (consulted when searching for an address).
    pub fn tick(&mut self, now: Duration, taken: impl Fn(u8) -> bool) -> StepOutcome {
        let mut out = StepOutcome::default();
        match self.state {
            State::None => {
                self.state = State::WaitOutOfAddressClaim;
            }
            State::WaitOutOfAddressClaim if now >= self.dither_deadline => {
                self.state = State::SendRequestForClaim;
            }
            State::SendRequestForClaim => {
                out.frames_to_send.push(ClaimFrame::RequestForAddressClaim);
                self.wait_for_claim_deadline = now + WAIT_FOR_CLAIM;
                self.state = State::WaitForClaim;
            }
            State::WaitForClaim if now >= self.wait_for_claim_deadline => {
                self.enter_send_preferred(&mut out, &taken);
            }
            _ => {}
        }
        out
    }

    /// Transmit a claim. Arbitrary-capable CFs walk the search order
    /// (preferred, then the configured arbitrary range skipping addresses
    /// `taken` reports as held) so they never knowingly claim an occupied
    /// address. CFs that are not arbitrary-capable always claim their
    /// preferred address outright — they only learn it was occupied if a
    /// rival defends it (see `resolve_contention`).
    fn enter_send_preferred(&mut self, out: &mut StepOutcome, taken: &impl Fn(u8) -> bool) {
        if !self.arbitrary_capable {
            self.claimed_address = self.preferred_address;
            out.frames_to_send.push(ClaimFrame::AddressClaimed {
                address: self.preferred_address,
                name: self.name,
            });
            out.address_changed = true;
            self.state = State::AddressClaimed;
            return;
        }

        match self.search.next(taken) {
            Some(address) => {
                self.claimed_address = address;
                out.frames_to_send.push(ClaimFrame::AddressClaimed {
                    address,
                    name: self.name,
                });
                out.address_changed = true;
                self.state = State::AddressClaimed;
            }
            None => {
                self.claimed_address = NULL_ADDRESS;
                out.frames_to_send.push(ClaimFrame::CannotClaimAddress { name: self.name });
                out.address_changed = true;
                self.state = State::UnableToClaim;
            }
        }
    }

    /// Feed an observed frame relevant to address claiming.
    pub fn on_frame(
        &mut self,
        event: ExternalEvent,
        now: Duration,
        taken: impl Fn(u8) -> bool,
    ) -> StepOutcome {
        let mut out = StepOutcome::default();
        match (self.state, event) {
            (State::UnableToClaim, ExternalEvent::RequestForAddressClaim) => {
                out.frames_to_send.push(ClaimFrame::CannotClaimAddress { name: self.name });
            }
            (State::AddressClaimed, ExternalEvent::RequestForAddressClaim) => {
                out.frames_to_send.push(ClaimFrame::AddressClaimed {
                    address: self.claimed_address,
                    name: self.name,
                });
            }
            (State::AddressClaimed, ExternalEvent::AddressClaimed { address, name })
                if address == self.claimed_address =>
            {
                self.resolve_contention(name, &mut out, now, &taken);
            }
            _ => {}
        }
        out
    }

    /// Another CF claimed the same address we hold. Lower NAME wins (§4.2).
    fn resolve_contention(
        &mut self,
        their_name: Name,
        out: &mut StepOutcome,
        now: Duration,
        taken: &impl Fn(u8) -> bool,
    ) {
        self.state = State::Contention;
        if self.name < their_name {
            out.frames_to_send.push(ClaimFrame::AddressClaimed {
                address: self.claimed_address,
                name: self.name,
            });
            self.state = State::AddressClaimed;
        } else if self.arbitrary_capable {
            self.enter_send_preferred(out, taken);
            let _ = now;
        } else {
            self.claimed_address = NULL_ADDRESS;
            out.frames_to_send.push(ClaimFrame::CannotClaimAddress { name: self.name });
            out.address_changed = true;
            self.state = State::UnableToClaim;
        }
    }
}
