use super::*;

// Scenario S1 from the spec: a concrete field set with known bit positions.
#[test]
fn s1_name_round_trip() {
    let name = Name::builder()
        .arbitrary_address_capable(true)
        .industry_group(1)
        .device_class(0)
        .function_code(138)
        .identity_number(1)
        .ecu_instance(4)
        .function_instance(0)
        .device_class_instance(0)
        .manufacturer_code(69)
        .build();

    let raw = name.raw();
    assert_eq!(raw & 0x1F_FFFF, 1);
    assert_eq!((raw >> 21) & 0x7FF, 69);
    assert_eq!((raw >> 63) & 0x01, 1);

    let decoded = Name::from_raw(raw);
    assert_eq!(decoded, name);
    assert_eq!(decoded.identity_number(), 1);
    assert_eq!(decoded.manufacturer_code(), 69);
    assert_eq!(decoded.ecu_instance(), 4);
    assert_eq!(decoded.function_instance(), 0);
    assert_eq!(decoded.function_code(), 138);
    assert_eq!(decoded.device_class(), 0);
    assert_eq!(decoded.device_class_instance(), 0);
    assert_eq!(decoded.industry_group(), 1);
    assert!(decoded.is_arbitrary_address_capable());
}

#[test]
fn every_field_round_trips_independently() {
    let name = Name::builder()
        .identity_number(0x12345)
        .manufacturer_code(0x2AB)
        .ecu_instance(0x05)
        .function_instance(0x15)
        .function_code(0xAA)
        .device_class(0x33)
        .device_class_instance(0x0C)
        .industry_group(0x04)
        .arbitrary_address_capable(true)
        .build();

    assert_eq!(name.identity_number(), 0x12345);
    assert_eq!(name.manufacturer_code(), 0x2AB);
    assert_eq!(name.ecu_instance(), 0x05);
    assert_eq!(name.function_instance(), 0x15);
    assert_eq!(name.function_code(), 0xAA);
    assert_eq!(name.device_class(), 0x33);
    assert_eq!(name.device_class_instance(), 0x0C);
    assert_eq!(name.industry_group(), 0x04);
    assert!(name.is_arbitrary_address_capable());
}

#[test]
fn total_order_matches_unsigned_wire_comparison() {
    let lower = Name::from_raw(10);
    let higher = Name::from_raw(20);
    assert!(lower < higher);

    // Little-endian wire bytes compare the same way numerically.
    let lower_bytes = lower.raw().to_le_bytes();
    let higher_bytes = higher.raw().to_le_bytes();
    assert!(u64::from_le_bytes(lower_bytes) < u64::from_le_bytes(higher_bytes));
}

#[test]
fn reserved_bit_is_never_set_by_the_builder() {
    let name = Name::builder().function_code(0xFF).device_class(0x7F).build();
    assert_eq!((name.raw() >> 48) & 0x01, 0);
}
