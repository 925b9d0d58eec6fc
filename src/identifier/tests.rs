use super::*;

#[test]
fn round_trip_addressed_message() {
    let id = CanId::builder(0x00EA00, 0x1C)
        .priority(Priority::new(6).unwrap())
        .destination(0xFE)
        .build()
        .unwrap();

    assert_eq!(id.priority().get(), 6);
    assert_eq!(id.pgn(), 0x00EA00);
    assert_eq!(id.destination(), Some(0xFE));
    assert_eq!(id.source_address(), 0x1C);
    assert!(!id.is_pdu2());
}

#[test]
fn round_trip_broadcast_message() {
    let id = CanId::builder(0x00EE00, 0x20)
        .priority(Priority::new(6).unwrap())
        .build()
        .unwrap();

    assert_eq!(id.pgn(), 0x00EE00);
    assert_eq!(id.destination(), None);
    assert!(id.is_pdu2());
}

#[test]
fn pdu2_pgn_folds_group_extension() {
    // PGN 0x00FF40 (PF=0xFF >= 240): group extension 0x40 rides in PS.
    let id = CanId::builder(0x00FF40, 0x05).build().unwrap();
    assert_eq!(id.pgn(), 0x00FF40);
}

#[test]
fn rejects_invalid_priority() {
    assert_eq!(Priority::new(8), Err(CanIdBuildError::InvalidPriority(8)));
}

#[test]
fn rejects_broadcast_with_destination() {
    let err = CanId::builder(0x00EE00, 0x20)
        .destination(0x10)
        .build()
        .unwrap_err();
    assert_eq!(err, CanIdBuildError::InvalidForBroadcast { pgn: 0x00EE00 });
}

#[test]
fn rejects_addressed_without_destination() {
    let err = CanId::builder(0x00EA00, 0x20).build().unwrap_err();
    assert_eq!(err, CanIdBuildError::InvalidForAddressed { pgn: 0x00EA00 });
}

#[test]
fn rejects_oversized_pgn() {
    let err = CanId::builder(0x4_0000, 0x20).build().unwrap_err();
    assert_eq!(err, CanIdBuildError::InvalidPgn(0x4_0000));
}
