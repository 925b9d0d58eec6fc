//! Concurrency plumbing shared by the rest of the core: a bounded MPMC
//! queue for frames/commands, and a listener dispatcher with RAII-style
//! unsubscription.
pub mod dispatcher;
pub mod queue;

pub use dispatcher::{EventDispatcher, ListenerHandle};
pub use queue::BoundedQueue;
