//! Tracks every control function (CF) known to this node: the ones we own
//! (Internal), the ones observed on the bus (External), and client-declared
//! filters resolved lazily against the External set (Partnered).
pub mod partner;
pub mod registry;

pub use partner::{NameFilter, NameFieldPredicate};
pub use registry::{CfEvent, ControlFunctionRegistry};
