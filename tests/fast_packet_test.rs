//! Fast Packet round-trip at the CAN frame boundary: builder output fed
//! straight into the assembler, mimicking a frame crossing an actual bus.
mod helpers;

use helpers::MockCanBus;
use isobus_core::transport::fast_packet::{FastPacketAssembler, FastPacketBuilder, ProcessResult};
use isobus_core::CanBus;

#[test]
fn a_multi_frame_message_survives_a_trip_across_the_bus() {
    let (mut tx_bus, mut rx_bus) = MockCanBus::create_pair();

    let payload: Vec<u8> = (0..120u16).map(|b| b as u8).collect();
    for frame in FastPacketBuilder::new(0x1F014, 0x05, None, &payload).with_sequence_id(2).build() {
        tx_bus.write_frame(&frame.unwrap()).unwrap();
    }

    let mut assembler = FastPacketAssembler::new();
    let mut result = None;
    while let Some(frame) = rx_bus.read_frame().unwrap() {
        result = Some(assembler.process_frame(0x05, &frame.data));
    }

    match result.expect("at least one frame crossed the bus") {
        ProcessResult::MessageComplete(message) => assert_eq!(message.as_slice(), &payload[..]),
        other => panic!("expected the final frame to complete the message, got {other:?}"),
    }
}
