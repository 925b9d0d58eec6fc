//! The Network Manager (C7): the single component that owns the Control
//! Function Registry, every Internal CF's Address Claim state machine, and
//! the TP/ETP session table, and drives them all from one tick loop.
mod command;
mod fault;
mod manager;
mod message;

pub use command::{CfId, CommandSender};
pub use fault::Fault;
pub use manager::NetworkManager;
pub use message::Message;
