//! The Control Function Registry (C3): the single source of truth mapping
//! addresses and NAMEs to control functions. Mutated only by the Network
//! Manager's tick thread (§5 of the spec), never concurrently.
use std::collections::HashMap;
use std::time::Duration;

use crate::concurrency::EventDispatcher;
use crate::identifier::{GLOBAL_ADDRESS, NULL_ADDRESS};
use crate::name::Name;

use super::partner::NameFilter;

const RESERVED_ARBITRARY_RESTART_ADDRESS: u8 = 0xFD;

/// Events the registry reports through its [`EventDispatcher`].
#[derive(Debug, Clone, Copy)]
pub enum CfEvent {
    /// `name` newly holds `address` (internal claim completion or external
    /// observation).
    Claimed { address: u8, name: Name },
    /// `address` was previously held by `name` and has been evicted because
    /// a different NAME claimed it, or its TTL expired.
    Evicted { address: u8, name: Name },
    /// A partner filter that previously had no match now matches `address`.
    PartnerResolved { address: u8, name: Name },
}

#[derive(Debug, Clone, Copy)]
enum Holder {
    Internal,
    External,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    name: Name,
    holder: Holder,
    last_seen: Duration,
}

/// Maintains `address -> CF`, `NAME -> address`, and partner-filter
/// resolution. Capacity is bounded at 254 external entries (addresses
/// 0x00-0xFD, excluding the reserved NULL/GLOBAL/arbitrary-restart values).
pub struct ControlFunctionRegistry {
    by_address: [Option<Entry>; 256],
    by_name: HashMap<Name, u8>,
    partners: Vec<(NameFilter, Option<u8>)>,
    events: EventDispatcher<CfEvent>,
}

impl Default for ControlFunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlFunctionRegistry {
    pub fn new() -> Self {
        Self {
            by_address: [None; 256],
            by_name: HashMap::new(),
            partners: Vec::new(),
            events: EventDispatcher::new(),
        }
    }

    pub fn events(&self) -> &EventDispatcher<CfEvent> {
        &self.events
    }

    /// Record that `address` now belongs to `name` because it was claimed
    /// locally (an Internal CF finished its Address Claim state machine).
    pub fn register_internal_claim(&mut self, address: u8, name: Name, now: Duration) {
        self.install(address, name, Holder::Internal, now);
    }

    /// Record a claim observed on the bus for an External CF. If `address`
    /// was previously held by a *different* NAME, that holder is evicted
    /// first (its sessions are the Network Manager's responsibility to
    /// abort upon seeing the `Evicted` event).
    pub fn observe_claim(&mut self, address: u8, name: Name, now: Duration) {
        self.install(address, name, Holder::External, now);
    }

    fn install(&mut self, address: u8, name: Name, holder: Holder, now: Duration) {
        if let Some(existing) = self.by_address[address as usize] {
            if existing.name != name {
                #[cfg(feature = "tracing-log")]
                tracing::debug!(address, old_name = %existing.name, new_name = %name, "address re-claimed by a different NAME");
                self.by_name.remove(&existing.name);
                self.events.invoke(&CfEvent::Evicted {
                    address,
                    name: existing.name,
                });
            }
        }

        self.by_address[address as usize] = Some(Entry {
            name,
            holder,
            last_seen: now,
        });
        self.by_name.insert(name, address);
        self.events.invoke(&CfEvent::Claimed { address, name });
        self.reresolve_partners();
    }

    /// Look up the address currently holding `name`, if any.
    pub fn address_of(&self, name: Name) -> Option<u8> {
        self.by_name.get(&name).copied()
    }

    /// Look up the NAME currently claiming `address`.
    pub fn name_of(&self, address: u8) -> Option<Name> {
        self.by_address[address as usize].map(|e| e.name)
    }

    pub fn is_claimed(&self, address: u8) -> bool {
        self.by_address[address as usize].is_some()
    }

    /// Register a partner filter. Returns the address it currently resolves
    /// to, if any External CF already matches.
    pub fn resolve_partner(&mut self, filter: NameFilter) -> Option<u8> {
        let resolved = self.find_match(&filter);
        self.partners.push((filter, resolved));
        resolved
    }

    fn find_match(&self, filter: &NameFilter) -> Option<u8> {
        self.by_address.iter().enumerate().find_map(|(addr, entry)| {
            entry.and_then(|e| {
                matches!(e.holder, Holder::External).then_some(()).and_then(|_| {
                    filter.matches(e.name).then_some(addr as u8)
                })
            })
        })
    }

    /// Re-evaluate every partner filter against the current External set;
    /// fires `PartnerResolved` for filters that newly gained a match.
    fn reresolve_partners(&mut self) {
        let mut newly_resolved = Vec::new();
        for (filter, current) in self.partners.iter_mut() {
            let found = self.by_address.iter().enumerate().find_map(|(addr, entry)| {
                entry.and_then(|e| {
                    matches!(e.holder, Holder::External)
                        .then_some(())
                        .and_then(|_| filter.matches(e.name).then_some((addr as u8, e.name)))
                })
            });
            match (current.is_none(), found) {
                (true, Some((addr, name))) => {
                    *current = Some(addr);
                    newly_resolved.push((addr, name));
                }
                (false, Some((addr, _))) => *current = Some(addr),
                (_, None) => *current = None,
            }
        }
        for (address, name) in newly_resolved {
            self.events
                .invoke(&CfEvent::PartnerResolved { address, name });
        }
    }

    /// Drop `address` from the registry (e.g. the holder stopped defending
    /// it, or an Internal CF was destroyed).
    pub fn forget(&mut self, address: u8) {
        if let Some(entry) = self.by_address[address as usize].take() {
            self.by_name.remove(&entry.name);
            self.events.invoke(&CfEvent::Evicted {
                address,
                name: entry.name,
            });
            self.reresolve_partners();
        }
    }

    /// Evict every External CF whose `last_seen` is older than `ttl`
    /// relative to `now`. Called once per tick (§4.7).
    pub fn reap_stale(&mut self, now: Duration, ttl: Duration) {
        let stale: Vec<u8> = self
            .by_address
            .iter()
            .enumerate()
            .filter_map(|(addr, entry)| {
                entry.and_then(|e| {
                    let is_external = matches!(e.holder, Holder::External);
                    let is_stale = now.saturating_sub(e.last_seen) >= ttl;
                    (is_external && is_stale).then_some(addr as u8)
                })
            })
            .collect();
        for addr in stale {
            #[cfg(feature = "tracing-log")]
            tracing::debug!(address = addr, "reaping stale external control function");
            self.forget(addr);
        }
    }

    /// True when `address` is a reserved value, never assignable to a CF.
    pub fn is_reserved_address(address: u8) -> bool {
        matches!(
            address,
            NULL_ADDRESS | GLOBAL_ADDRESS | RESERVED_ARBITRARY_RESTART_ADDRESS
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_function::partner::NameFieldPredicate;

    fn name(raw: u64) -> Name {
        Name::from_raw(raw)
    }

    #[test]
    fn observe_claim_installs_entry_in_both_indices() {
        let mut reg = ControlFunctionRegistry::new();
        reg.observe_claim(0x1C, name(42), Duration::ZERO);
        assert_eq!(reg.name_of(0x1C), Some(name(42)));
        assert_eq!(reg.address_of(name(42)), Some(0x1C));
    }

    #[test]
    fn observing_a_new_name_on_an_occupied_address_evicts_the_old_holder() {
        let mut reg = ControlFunctionRegistry::new();
        reg.observe_claim(0x1C, name(1), Duration::ZERO);
        reg.observe_claim(0x1C, name(2), Duration::from_millis(1));

        assert_eq!(reg.address_of(name(1)), None);
        assert_eq!(reg.address_of(name(2)), Some(0x1C));
        assert_eq!(reg.name_of(0x1C), Some(name(2)));
    }

    #[test]
    fn reinstalling_the_same_name_on_the_same_address_is_not_an_eviction() {
        let mut reg = ControlFunctionRegistry::new();
        reg.observe_claim(0x1C, name(1), Duration::ZERO);
        reg.observe_claim(0x1C, name(1), Duration::from_secs(1));
        assert_eq!(reg.address_of(name(1)), Some(0x1C));
    }

    #[test]
    fn partner_resolution_fires_once_a_match_appears() {
        let mut reg = ControlFunctionRegistry::new();
        let filter = NameFilter::new().with(NameFieldPredicate::FunctionCode(130));
        assert_eq!(reg.resolve_partner(filter.clone()), None);

        let matching_name = Name::builder().function_code(130).build();
        reg.observe_claim(0x20, matching_name, Duration::ZERO);
        reg.reresolve_partners();
    }

    #[test]
    fn reap_stale_evicts_only_expired_external_entries() {
        let mut reg = ControlFunctionRegistry::new();
        reg.observe_claim(0x10, name(1), Duration::from_secs(0));
        reg.observe_claim(0x11, name(2), Duration::from_secs(29));

        reg.reap_stale(Duration::from_secs(30), Duration::from_secs(30));

        assert_eq!(reg.name_of(0x10), None, "older than TTL must be reaped");
        assert_eq!(reg.name_of(0x11), Some(name(2)), "within TTL must survive");
    }

    #[test]
    fn reserved_addresses_are_identified() {
        assert!(ControlFunctionRegistry::is_reserved_address(0xFE));
        assert!(ControlFunctionRegistry::is_reserved_address(0xFF));
        assert!(ControlFunctionRegistry::is_reserved_address(0xFD));
        assert!(!ControlFunctionRegistry::is_reserved_address(0x1C));
    }
}
