//! `isobus-core` library: hardware-independent primitives and protocol state
//! machines for an SAE J1939 / ISO 11783 (ISOBUS) control function — NAME and
//! CAN identifier encoding, Address Claim, Transport Protocol and Extended
//! Transport Protocol, the Control Function Registry, and the Network
//! Manager that ties them together behind a tick-driven, thread-friendly API.
//!
//! The core never touches a physical bus directly; host applications supply
//! a [`hal::CanBus`] and a [`hal::Clock`] implementation.

/// Packing and unpacking of 29-bit extended CAN identifiers.
pub mod identifier;
/// The 64-bit NAME field and its builder.
pub mod name;
/// Control function bookkeeping: Internal, External, and Partnered CFs, and
/// the registry that tracks all three.
pub mod control_function;
/// The Address Claim state machine (§4.4).
pub mod address_claim;
/// CAN frame representation, the Transport Protocol and Extended Transport
/// Protocol session state machines, and NMEA 2000 Fast Packet.
pub mod transport;
/// The Network Manager: RX classification, TX scheduling, and the tick
/// driver that advances every other component.
pub mod network;
/// Concurrency plumbing: a bounded MPMC queue and an event dispatcher.
pub mod concurrency;
/// Hardware abstraction layer contract (the `CanBus`/`Clock` traits) and, for
/// tests, in-memory doubles for both.
pub mod hal;
/// Runtime configuration for a `NetworkManager` instance.
pub mod config;
/// Domain and low-level errors shared across the crate.
pub mod error;

pub use config::{NetworkManagerConfig, NetworkManagerConfigBuilder};
pub use hal::{CanBus, Clock, SystemClock};
pub use identifier::{CanId, Priority};
pub use name::Name;
pub use network::{CfId, CommandSender, Fault, Message, NetworkManager};
pub use transport::CanFrame;
