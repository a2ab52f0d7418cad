//! Change notification for metadata providers.
use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

//------------ MetadataEvent -------------------------------------------------

/// Tells observers that the metadata of a provider has changed.
#[derive(Clone, Debug)]
pub struct MetadataEvent {
    provider: String,
    time: DateTime<Utc>,
}

impl MetadataEvent {
    pub fn new(provider: &str) -> Self {
        MetadataEvent {
            provider: provider.to_string(),
            time: Utc::now(),
        }
    }

    /// The name of the provider that emitted the event.
    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }
}

//------------ MetadataObserver ----------------------------------------------

/// This trait defines a listener for metadata change events.
///
/// Observers are called after the new metadata was installed. An observer
/// may subscribe or unsubscribe observers, including itself, while it is
/// being called.
pub trait MetadataObserver: Send + Sync + 'static {
    fn on_event(&self, event: &MetadataEvent);
}

//------------ SubscriptionId ------------------------------------------------

/// Identifies a subscription so that it can be cancelled.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "subscription-{}", self.0)
    }
}

//------------ Observable ----------------------------------------------------

/// A provider that emits [`MetadataEvent`]s.
pub trait Observable {
    fn subscribe(&self, observer: Arc<dyn MetadataObserver>) -> SubscriptionId;

    /// Cancels a subscription. Returns whether it existed.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;
}

//------------ ObserverList --------------------------------------------------

/// The registered observers of a provider.
///
/// Notification iterates over a snapshot taken under the lock and calls
/// the observers without holding it.
#[derive(Default)]
pub struct ObserverList {
    next_id: AtomicU64,
    observers: Mutex<Vec<(SubscriptionId, Arc<dyn MetadataObserver>)>>,
}

impl ObserverList {
    pub fn subscribe(&self, observer: Arc<dyn MetadataObserver>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers.lock().push((id, observer));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = self.observers.lock();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    pub fn len(&self) -> usize {
        self.observers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn notify(&self, event: &MetadataEvent) {
        let snapshot: Vec<Arc<dyn MetadataObserver>> = self
            .observers
            .lock()
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect();

        for observer in snapshot {
            observer.on_event(event);
        }
    }
}

//------------ EventCounter --------------------------------------------------

/// Example observer that simply counts all events
#[derive(Default)]
pub struct EventCounter {
    total: AtomicUsize,
}

impl EventCounter {
    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

impl MetadataObserver for EventCounter {
    fn on_event(&self, _event: &MetadataEvent) {
        self.total.fetch_add(1, Ordering::SeqCst);
    }
}

//------------ Tests ---------------------------------------------------------
