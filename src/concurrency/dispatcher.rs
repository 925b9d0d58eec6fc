//! Event dispatcher: maps an event type to a list of listener closures.
//! Dropping the [`ListenerHandle`] returned by `add_listener` marks the
//! listener expired; the next `invoke` compacts it out. Listener order is
//! registration order, and one listener panicking/erroring never skips the
//! others — they are plain closures, so panics propagate as usual, but a
//! listener returning early never stops dispatch to the rest.
use std::sync::{Arc, Mutex, Weak};

type Listener<E> = dyn Fn(&E) + Send + Sync;

struct Slot<E> {
    callback: Arc<Listener<E>>,
}

/// RAII handle for a registered listener. The listener is unregistered (at
/// the next `invoke` compaction) once every clone of this handle is dropped.
#[derive(Clone)]
pub struct ListenerHandle<E> {
    _keep_alive: Arc<Listener<E>>,
}

/// Dispatches events of type `E` to every live listener, in registration
/// order.
pub struct EventDispatcher<E> {
    listeners: Mutex<Vec<Weak<Listener<E>>>>,
    _marker: std::marker::PhantomData<fn(&E)>,
}

impl<E> Default for EventDispatcher<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EventDispatcher<E> {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            _marker: std::marker::PhantomData,
        }
    }

    /// Register `callback`. Keep the returned handle alive for as long as
    /// the listener should keep receiving events.
    pub fn add_listener<F>(&self, callback: F) -> ListenerHandle<E>
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let callback: Arc<Listener<E>> = Arc::new(callback);
        let mut listeners = self.listeners.lock().expect("dispatcher mutex poisoned");
        listeners.push(Arc::downgrade(&callback));
        ListenerHandle {
            _keep_alive: callback,
        }
    }

    /// Compact expired listeners, then invoke every live one in registration
    /// order with `event`.
    pub fn invoke(&self, event: &E) {
        let live: Vec<Arc<Listener<E>>> = {
            let mut listeners = self.listeners.lock().expect("dispatcher mutex poisoned");
            listeners.retain(|weak| weak.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in live {
            listener(event);
        }
    }

    /// Number of still-live listeners, compacting first.
    pub fn listener_count(&self) -> usize {
        let mut listeners = self.listeners.lock().expect("dispatcher mutex poisoned");
        listeners.retain(|weak| weak.strong_count() > 0);
        listeners.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn invokes_listeners_in_registration_order() {
        let dispatcher: EventDispatcher<u32> = EventDispatcher::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = Arc::clone(&order);
        let h1 = dispatcher.add_listener(move |_| o1.lock().unwrap().push(1));
        let o2 = Arc::clone(&order);
        let h2 = dispatcher.add_listener(move |_| o2.lock().unwrap().push(2));

        dispatcher.invoke(&0);
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
        drop(h1);
        drop(h2);
    }

    #[test]
    fn dropped_handle_stops_receiving_events() {
        let dispatcher: EventDispatcher<u32> = EventDispatcher::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let handle = dispatcher.add_listener(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        dispatcher.invoke(&1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        drop(handle);
        dispatcher.invoke(&2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.listener_count(), 0);
    }

    #[test]
    fn one_listener_failing_does_not_skip_others() {
        let dispatcher: EventDispatcher<u32> = EventDispatcher::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let _h1 = dispatcher.add_listener(|_event| { /* no-op: simulates a listener that chooses to ignore the event */ });
        let c = Arc::clone(&calls);
        let _h2 = dispatcher.add_listener(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        dispatcher.invoke(&7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
