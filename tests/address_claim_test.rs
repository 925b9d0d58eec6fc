//! End-to-end Address Claim behavior: two control functions on a shared bus,
//! driven entirely through `NetworkManager`'s public API.
mod helpers;

use std::time::Duration;

use helpers::{run_until, MockCanBus, SharedClock};
use isobus_core::{Name, NetworkManager, NetworkManagerConfig};

#[test]
fn an_isolated_control_function_claims_its_preferred_address() {
    let (bus, _unused) = MockCanBus::create_pair();
    let clock = SharedClock::default();
    let (mut mgr, cmds) = NetworkManager::new(bus, clock.clone(), NetworkManagerConfig::default());
    let cf = cmds.create_internal_cf(Name::builder().manufacturer_code(1).build(), 0x40);

    for _ in 0..60 {
        clock.advance(Duration::from_millis(10));
        mgr.pump().unwrap();
        if mgr.claimed_address(cf).is_some() {
            break;
        }
    }

    assert_eq!(mgr.claimed_address(cf), Some(0x40));
}

#[test]
fn lower_name_wins_and_keeps_the_contested_address() {
    let (bus_a, bus_b) = MockCanBus::create_pair();
    let clock = SharedClock::default();
    let (mut a, cmds_a) = NetworkManager::new(bus_a, clock.clone(), NetworkManagerConfig::default());
    let (mut b, cmds_b) = NetworkManager::new(bus_b, clock.clone(), NetworkManagerConfig::default());

    // a's NAME sorts lower than b's, so a must win the contest for 0x50.
    let name_a = Name::builder().identity_number(1).manufacturer_code(1).build();
    let name_b = Name::builder().identity_number(1).manufacturer_code(2).build();
    assert!(name_a.raw() < name_b.raw());

    let cf_a = cmds_a.create_internal_cf(name_a, 0x50);
    let cf_b = cmds_b.create_internal_cf(name_b, 0x50);

    run_until(&clock, Duration::from_millis(10), 200, &mut a, &mut b, |a, b| {
        a.claimed_address(cf_a).is_some() && b.claimed_address(cf_b).is_some()
    });

    assert_eq!(a.claimed_address(cf_a), Some(0x50));
    assert_ne!(b.claimed_address(cf_b), Some(0x50));
}

#[test]
fn a_request_for_address_claimed_is_answered_by_every_settled_internal_cf() {
    let (bus_a, bus_b) = MockCanBus::create_pair();
    let clock = SharedClock::default();
    let (mut a, cmds_a) = NetworkManager::new(bus_a, clock.clone(), NetworkManagerConfig::default());
    let (mut b, cmds_b) = NetworkManager::new(bus_b, clock.clone(), NetworkManagerConfig::default());

    let cf_a = cmds_a.create_internal_cf(Name::builder().manufacturer_code(5).build(), 0x22);
    let _ = cmds_b;

    run_until(&clock, Duration::from_millis(10), 100, &mut a, &mut b, |a, _| {
        a.claimed_address(cf_a).is_some()
    });

    assert_eq!(b.registry().address_of(a.registry().name_of(0x22).unwrap()), Some(0x22));
}
