//! The state store: latest payload per module, plus change notification.
//!
//! Producers (module workers, on any thread) call [`StateStore::update`]. Consumers register interest through a
//! [`Consumer`], which owns the callbacks and runs them on its own thread when it dispatches. The store itself
//! never invokes a callback, it only queues a [`Notification`] onto the subscriber's [`NotificationSink`],
//! so a slow render loop never blocks a producer.
//!
//! Each key has its own slot lock. Setting the value and queueing the notifications for it happen under that
//! lock, so for a single key readers see updates in the same order subscribers get notified of them.
//! Updates to different keys only share the map lookup.
//!
//! Subscribing to a key that already has a value queues a snapshot notification for the new subscriber.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use barstate_shared_util::ModuleKey;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

pub mod consumer;
#[cfg(test)]
mod test;

pub use consumer::Consumer;

/// Identifies a single registration of interest in a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
#[display("subscription#{}", _0)]
pub struct SubscriptionId(u64);

/// A change of a key, on its way to the consumer loop of one subscriber.
#[derive(Debug, Clone)]
pub struct Notification {
    pub id: SubscriptionId,
    pub key: ModuleKey,
    pub payload: Arc<Value>,
    alive: Arc<AtomicBool>,
}

impl Notification {
    /// False once the subscription has been removed. Such notifications must not reach their callback anymore.
    pub fn is_live(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

/// The sending half of a consumer loop's notification queue.
#[derive(Debug, Clone)]
pub struct NotificationSink(UnboundedSender<Notification>);

pub fn notification_channel() -> (NotificationSink, UnboundedReceiver<Notification>) {
    let (send, recv) = tokio::sync::mpsc::unbounded_channel();
    (NotificationSink(send), recv)
}

impl NotificationSink {
    fn send(&self, notification: Notification) -> bool {
        self.0.send(notification).is_ok()
    }
}

#[derive(Debug)]
struct Subscriber {
    id: SubscriptionId,
    sink: NotificationSink,
    alive: Arc<AtomicBool>,
}

impl Subscriber {
    fn notify(&self, key: &ModuleKey, payload: &Arc<Value>) -> bool {
        self.sink.send(Notification { id: self.id, key: key.clone(), payload: payload.clone(), alive: self.alive.clone() })
    }
}

#[derive(Debug, Default)]
struct Slot {
    value: Option<Arc<Value>>,
    subscribers: Vec<Subscriber>,
}

#[derive(Debug)]
pub struct StateStore {
    slots: DashMap<ModuleKey, Arc<Mutex<Slot>>>,
    subscriptions: DashMap<SubscriptionId, (ModuleKey, Arc<AtomicBool>)>,
    next_id: AtomicU64,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

fn lock(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    // Nothing user-provided runs under a slot lock, so a poisoned slot still holds consistent data.
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

impl StateStore {
    pub fn new() -> Self {
        Self { slots: DashMap::new(), subscriptions: DashMap::new(), next_id: AtomicU64::new(1) }
    }

    fn slot(&self, key: &ModuleKey) -> Option<Arc<Mutex<Slot>>> {
        self.slots.get(key).map(|slot| slot.value().clone())
    }

    fn slot_or_insert(&self, key: &ModuleKey) -> Arc<Mutex<Slot>> {
        match self.slot(key) {
            Some(slot) => slot,
            None => self.slots.entry(key.clone()).or_default().value().clone(),
        }
    }

    /// Replace the payload of `key` and queue a notification for every current subscriber of it.
    /// `Value::Null` is a valid payload, meaning "show nothing".
    pub fn update(&self, key: &ModuleKey, payload: Value) {
        let slot = self.slot_or_insert(key);
        let payload = Arc::new(payload);
        let mut dead = Vec::new();
        {
            let mut slot = lock(&slot);
            slot.value = Some(payload.clone());
            for subscriber in &slot.subscribers {
                if !subscriber.notify(key, &payload) {
                    dead.push(subscriber.id);
                }
            }
        }

        for id in dead {
            log::debug!("Consumer of {} for {} is gone, dropping the subscription", id, key);
            self.unsubscribe(id);
        }
    }

    /// The current payload of `key`, or `None` if nothing was ever published for it.
    pub fn get(&self, key: &ModuleKey) -> Option<Arc<Value>> {
        self.slot(key).and_then(|slot| lock(&slot).value.clone())
    }

    /// Register interest in `key`. Notifications are queued onto `sink`, starting with a snapshot of the
    /// current value if there is one.
    pub fn subscribe(&self, key: &ModuleKey, sink: &NotificationSink) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let alive = Arc::new(AtomicBool::new(true));
        self.subscriptions.insert(id, (key.clone(), alive.clone()));

        let subscriber = Subscriber { id, sink: sink.clone(), alive };
        let slot = self.slot_or_insert(key);
        let mut slot = lock(&slot);
        if let Some(current) = &slot.value {
            subscriber.notify(key, current);
        }
        slot.subscribers.push(subscriber);
        log::trace!("{} registered for {}", id, key);
        id
    }

    /// Remove a subscription. No callback for it begins after this returns. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let Some((_, (key, alive))) = self.subscriptions.remove(&id) else {
            return;
        };
        alive.store(false, Ordering::SeqCst);
        if let Some(slot) = self.slot(&key) {
            lock(&slot).subscribers.retain(|subscriber| subscriber.id != id);
        }
        log::trace!("{} for {} removed", id, key);
    }

    pub fn subscriber_count(&self, key: &ModuleKey) -> usize {
        self.slot(key).map(|slot| lock(&slot).subscribers.len()).unwrap_or(0)
    }

    /// Number of keys that currently hold a payload.
    pub fn len(&self) -> usize {
        self.keys().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys that currently hold a payload.
    pub fn keys(&self) -> Vec<ModuleKey> {
        self.snapshot().into_keys().collect()
    }

    /// A copy of every published payload.
    pub fn snapshot(&self) -> BTreeMap<ModuleKey, Arc<Value>> {
        let slots: Vec<_> = self.slots.iter().map(|entry| (entry.key().clone(), entry.value().clone())).collect();
        slots.into_iter().filter_map(|(key, slot)| lock(&slot).value.clone().map(|value| (key, value))).collect()
    }
}
