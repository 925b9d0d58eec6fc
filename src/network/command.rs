//! API surface application threads use to talk to a [`super::NetworkManager`]
//! without touching its tick-owned state directly (§5's single-writer rule).
//! Every operation enqueues a [`Command`], drained by the manager at the
//! start of its next `tick`.
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::concurrency::BoundedQueue;
use crate::control_function::NameFilter;
use crate::error::{InvalidArgument, QueueError, SendError};
use crate::identifier::Priority;
use crate::name::Name;

use super::message::Message;

/// Backpressure budget for [`CommandSender::send`]'s spin-with-yield push,
/// matching §5's "blocks briefly on the TX queue's push" rule.
const SEND_PUSH_BUDGET: Duration = Duration::from_millis(50);

/// Opaque handle to an Internal control function, assigned by the caller at
/// creation time so `create_internal_cf` can return immediately without a
/// reply channel back from the tick thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CfId(pub(crate) u32);

type MessageCallback = Arc<dyn Fn(&Message) + Send + Sync>;

pub(crate) enum Command {
    CreateInternalCf {
        id: CfId,
        name: Name,
        preferred_address: u8,
    },
    DestroyInternalCf {
        id: CfId,
    },
    Send {
        id: CfId,
        destination: Option<u8>,
        pgn: u32,
        priority: Priority,
        payload: Vec<u8>,
    },
    RegisterPgnCallback {
        pgn: u32,
        destination_filter: Option<u8>,
        callback: MessageCallback,
    },
    RegisterGlobalCallback {
        callback: MessageCallback,
    },
    RegisterPartnerCallback {
        filter: NameFilter,
        callback: MessageCallback,
    },
}

/// Cloneable, thread-safe handle application threads use to drive a
/// `NetworkManager`. Every method is non-blocking except [`Self::send`],
/// which may spin briefly under backpressure.
#[derive(Clone)]
pub struct CommandSender {
    queue: Arc<BoundedQueue<Command>>,
    next_cf_id: Arc<AtomicU32>,
}

impl CommandSender {
    pub(crate) fn new(queue: Arc<BoundedQueue<Command>>) -> Self {
        Self {
            queue,
            next_cf_id: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Request a new Internal control function. The returned id is valid to
    /// reference in `send`/`destroy_internal_cf` immediately, even though
    /// the creation itself is only applied at the manager's next tick.
    pub fn create_internal_cf(&self, name: Name, preferred_address: u8) -> CfId {
        let id = CfId(self.next_cf_id.fetch_add(1, Ordering::Relaxed));
        let _ = self.queue.push(Command::CreateInternalCf { id, name, preferred_address });
        id
    }

    /// Destroy an Internal control function, aborting every session it owns
    /// and releasing its claimed address.
    pub fn destroy_internal_cf(&self, id: CfId) {
        let _ = self.queue.push(Command::DestroyInternalCf { id });
    }

    /// Send `payload` from `id`'s control function to `destination` (`None`
    /// for a PDU2 broadcast) under `pgn`. Payloads over 8 bytes are carried
    /// by a TP or ETP session opened once this command is processed.
    pub fn send(
        &self,
        id: CfId,
        destination: Option<u8>,
        pgn: u32,
        priority: Priority,
        payload: Vec<u8>,
    ) -> Result<(), SendError> {
        if payload.is_empty() {
            return Err(SendError::InvalidArgument(InvalidArgument::EmptyPayload));
        }
        self.queue
            .push_spin(Command::Send { id, destination, pgn, priority, payload }, SEND_PUSH_BUDGET)
            .map_err(|_| SendError::QueueFull(QueueError::QueueFull))
    }

    /// Invoke `callback` for every [`Message`] on `pgn` whose destination
    /// matches `destination_filter` (`None` matches any, including
    /// broadcasts).
    pub fn register_pgn_callback(
        &self,
        pgn: u32,
        destination_filter: Option<u8>,
        callback: impl Fn(&Message) + Send + Sync + 'static,
    ) {
        let _ = self.queue.push(Command::RegisterPgnCallback {
            pgn,
            destination_filter,
            callback: Arc::new(callback),
        });
    }

    /// Invoke `callback` for every dispatched [`Message`], regardless of PGN.
    pub fn register_global_callback(&self, callback: impl Fn(&Message) + Send + Sync + 'static) {
        let _ = self.queue.push(Command::RegisterGlobalCallback { callback: Arc::new(callback) });
    }

    /// Invoke `callback` for every [`Message`] whose source control function
    /// matches `filter`.
    pub fn register_partner_callback(
        &self,
        filter: NameFilter,
        callback: impl Fn(&Message) + Send + Sync + 'static,
    ) {
        let _ = self.queue.push(Command::RegisterPartnerCallback { filter, callback: Arc::new(callback) });
    }
}
