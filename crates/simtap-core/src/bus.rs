//! ---
//! simtap_section: "01-telemetry-client"
//! simtap_subsection: "module"
//! simtap_type: "source"
//! simtap_scope: "code"
//! simtap_description: "Event notification bus with snapshot dispatch."
//! simtap_version: "v0.0.0-prealpha"
//! simtap_owner: "tbd"
//! ---
//! Each event kind is a [`Signal`]: a registry of handlers keyed by
//! subscription id. Emission clones the handler list under the lock and
//! dispatches after releasing it, so handlers may subscribe or unsubscribe
//! (themselves or others) while being invoked. Everyone registered when the
//! emission started is called exactly once; later emissions only see the
//! registry as it is then.
//!
//! Dispatch is synchronous on the emitting thread. Consumers that live on
//! another thread or runtime marshal the payload themselves.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::warn;

use crate::catalog::FieldValue;
use crate::transport::RequestId;

/// Event kinds published by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    ReceivedData,
    UnknownRequestId,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Connected => "connected",
            EventKind::Disconnected => "disconnected",
            EventKind::ReceivedData => "received_data",
            EventKind::UnknownRequestId => "unknown_request_id",
        }
    }
}

/// Token returned by `subscribe`; pass it back to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription {
    kind: EventKind,
    id: u64,
}

impl Subscription {
    pub fn kind(&self) -> EventKind {
        self.kind
    }
}

/// One decoded reply, fields in reply-slot order.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSample {
    /// Per-client sequence number of decoded samples, starting at 1.
    pub sequence: u64,
    pub fields: Vec<FieldValue>,
    /// Time since the request this reply answers, when known.
    pub latency: Option<Duration>,
}

impl DataSample {
    /// Value of the first field called `name`.
    pub fn value(&self, name: &str) -> Option<f64> {
        self.fields
            .iter()
            .find(|field| field.name() == name)
            .map(|field| field.value)
    }
}

/// Owned copy of any event, for consumers that funnel everything into one queue.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connected,
    Disconnected,
    ReceivedData(DataSample),
    UnknownRequestId(RequestId),
}

impl ClientEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ClientEvent::Connected => EventKind::Connected,
            ClientEvent::Disconnected => EventKind::Disconnected,
            ClientEvent::ReceivedData(_) => EventKind::ReceivedData,
            ClientEvent::UnknownRequestId(_) => EventKind::UnknownRequestId,
        }
    }
}

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct HandlerRegistry<T: ?Sized> {
    next_id: u64,
    handlers: IndexMap<u64, Handler<T>>,
}

/// Subscriber registry for a single event kind.
pub struct Signal<T> {
    kind: EventKind,
    registry: Arc<Mutex<HandlerRegistry<T>>>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<T> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("kind", &self.kind)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl<T> Signal<T> {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            registry: Arc::new(Mutex::new(HandlerRegistry {
                next_id: 0,
                handlers: IndexMap::new(),
            })),
        }
    }

    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let mut registry = self.registry.lock();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.handlers.insert(id, Arc::new(handler));
        Subscription {
            kind: self.kind,
            id,
        }
    }

    /// Returns `false` if the subscription was unknown or already removed.
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        if subscription.kind != self.kind {
            return false;
        }
        self.registry
            .lock()
            .handlers
            .shift_remove(&subscription.id)
            .is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.lock().handlers.len()
    }

    /// Invoke every handler registered at call time. Returns how many
    /// completed; a panicking handler is logged and skipped.
    pub fn emit(&self, payload: &T) -> usize {
        let snapshot: Vec<(u64, Handler<T>)> = {
            let registry = self.registry.lock();
            registry
                .handlers
                .iter()
                .map(|(id, handler)| (*id, Arc::clone(handler)))
                .collect()
        };

        let mut delivered = 0;
        for (id, handler) in snapshot {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(payload))) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    warn!(
                        event = self.kind.as_str(),
                        subscription = id,
                        "subscriber panicked during dispatch; skipping"
                    );
                }
            }
        }
        delivered
    }
}

/// The four client signals.
#[derive(Debug, Clone)]
pub struct EventBus {
    connected: Signal<()>,
    disconnected: Signal<()>,
    received_data: Signal<DataSample>,
    unknown_request_id: Signal<RequestId>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            connected: Signal::new(EventKind::Connected),
            disconnected: Signal::new(EventKind::Disconnected),
            received_data: Signal::new(EventKind::ReceivedData),
            unknown_request_id: Signal::new(EventKind::UnknownRequestId),
        }
    }

    pub fn on_connected<F>(&self, handler: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.connected.subscribe(move |_| handler())
    }

    pub fn on_disconnected<F>(&self, handler: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.disconnected.subscribe(move |_| handler())
    }

    pub fn on_received_data<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&DataSample) + Send + Sync + 'static,
    {
        self.received_data.subscribe(handler)
    }

    pub fn on_unknown_request_id<F>(&self, handler: F) -> Subscription
    where
        F: Fn(RequestId) + Send + Sync + 'static,
    {
        self.unknown_request_id.subscribe(move |id| handler(*id))
    }

    /// Subscribe one handler to every kind, receiving owned [`ClientEvent`]s.
    pub fn subscribe_all<F>(&self, handler: F) -> [Subscription; 4]
    where
        F: Fn(ClientEvent) + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        let on_connected = Arc::clone(&handler);
        let on_disconnected = Arc::clone(&handler);
        let on_data = Arc::clone(&handler);
        let on_unknown = handler;
        [
            self.on_connected(move || on_connected(ClientEvent::Connected)),
            self.on_disconnected(move || on_disconnected(ClientEvent::Disconnected)),
            self.on_received_data(move |sample| on_data(ClientEvent::ReceivedData(sample.clone()))),
            self.on_unknown_request_id(move |id| on_unknown(ClientEvent::UnknownRequestId(id))),
        ]
    }

    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        match subscription.kind {
            EventKind::Connected => self.connected.unsubscribe(subscription),
            EventKind::Disconnected => self.disconnected.unsubscribe(subscription),
            EventKind::ReceivedData => self.received_data.unsubscribe(subscription),
            EventKind::UnknownRequestId => self.unknown_request_id.unsubscribe(subscription),
        }
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        match kind {
            EventKind::Connected => self.connected.subscriber_count(),
            EventKind::Disconnected => self.disconnected.subscriber_count(),
            EventKind::ReceivedData => self.received_data.subscriber_count(),
            EventKind::UnknownRequestId => self.unknown_request_id.subscriber_count(),
        }
    }

    pub(crate) fn emit_connected(&self) -> usize {
        self.connected.emit(&())
    }

    pub(crate) fn emit_disconnected(&self) -> usize {
        self.disconnected.emit(&())
    }

    pub(crate) fn emit_received_data(&self, sample: &DataSample) -> usize {
        self.received_data.emit(sample)
    }

    pub(crate) fn emit_unknown_request_id(&self, id: RequestId) -> usize {
        self.unknown_request_id.emit(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn emits_to_every_subscriber() {
        let signal: Signal<u32> = Signal::new(EventKind::UnknownRequestId);
        let total = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let total = Arc::clone(&total);
            signal.subscribe(move |value| {
                total.fetch_add(*value as usize, Ordering::SeqCst);
            });
        }
        assert_eq!(signal.emit(&2), 3);
        assert_eq!(total.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn self_unsubscribe_during_dispatch_is_safe() {
        let signal: Signal<()> = Signal::new(EventKind::Connected);
        let first_calls = Arc::new(AtomicUsize::new(0));
        let second_calls = Arc::new(AtomicUsize::new(0));

        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let subscription = {
            let handle = signal.clone();
            let slot = Arc::clone(&slot);
            let first_calls = Arc::clone(&first_calls);
            signal.subscribe(move |_| {
                first_calls.fetch_add(1, Ordering::SeqCst);
                if let Some(me) = slot.lock().take() {
                    assert!(handle.unsubscribe(me));
                }
            })
        };
        *slot.lock() = Some(subscription);
        {
            let second_calls = Arc::clone(&second_calls);
            signal.subscribe(move |_| {
                second_calls.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert_eq!(signal.emit(&()), 2);
        assert_eq!(signal.emit(&()), 1);
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn subscribers_removed_by_others_still_get_the_current_emission() {
        let signal: Signal<()> = Signal::new(EventKind::Disconnected);
        let victim_calls = Arc::new(AtomicUsize::new(0));
        let victim_slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        {
            let signal_handle = signal.clone();
            let victim_slot = Arc::clone(&victim_slot);
            signal.subscribe(move |_| {
                if let Some(victim) = victim_slot.lock().take() {
                    signal_handle.unsubscribe(victim);
                }
            });
        }
        let victim = {
            let victim_calls = Arc::clone(&victim_calls);
            signal.subscribe(move |_| {
                victim_calls.fetch_add(1, Ordering::SeqCst);
            })
        };
        *victim_slot.lock() = Some(victim);

        signal.emit(&());
        signal.emit(&());
        assert_eq!(victim_calls.load(Ordering::SeqCst), 1);
        assert_eq!(signal.subscriber_count(), 1);
    }

    #[test]
    fn panicking_subscriber_does_not_stop_dispatch() {
        let signal: Signal<()> = Signal::new(EventKind::ReceivedData);
        let calls = Arc::new(AtomicUsize::new(0));
        signal.subscribe(|_| panic!("presentation layer gone"));
        {
            let calls = Arc::clone(&calls);
            signal.subscribe(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(signal.emit(&()), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subscription_of_another_kind_is_ignored() {
        let bus = EventBus::new();
        let connected = bus.on_connected(|| {});
        assert!(!bus.disconnected.unsubscribe(connected));
        assert!(bus.unsubscribe(connected));
        assert!(!bus.unsubscribe(connected));
        assert_eq!(bus.subscriber_count(EventKind::Connected), 0);
    }

    #[test]
    fn subscribe_all_funnels_every_kind() {
        let bus = EventBus::new();
        let seen: Arc<Mutex<Vec<EventKind>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe_all(move |event| sink.lock().push(event.kind()));

        bus.emit_connected();
        bus.emit_unknown_request_id(RequestId(9));
        bus.emit_received_data(&DataSample {
            sequence: 1,
            fields: Vec::new(),
            latency: None,
        });
        bus.emit_disconnected();

        assert_eq!(
            *seen.lock(),
            vec![
                EventKind::Connected,
                EventKind::UnknownRequestId,
                EventKind::ReceivedData,
                EventKind::Disconnected
            ]
        );
    }
}
