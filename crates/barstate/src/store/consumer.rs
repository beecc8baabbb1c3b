use std::{
    collections::HashMap,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
};

use anyhow::Result;
use barstate_shared_util::ModuleKey;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

use super::{notification_channel, Notification, NotificationSink, StateStore, SubscriptionId};

pub type Callback = Box<dyn Fn(&ModuleKey, &Value) -> Result<()>>;

/// The render-side end of the store. Lives on one thread (usually the GUI main loop) and runs the callbacks
/// of its subscriptions there, no matter which thread published the update.
///
/// Callbacks don't need to be `Send`, they never leave the consumer.
pub struct Consumer {
    store: Arc<StateStore>,
    sink: NotificationSink,
    recv: UnboundedReceiver<Notification>,
    callbacks: HashMap<SubscriptionId, Callback>,
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer").field("subscriptions", &self.callbacks.keys().collect::<Vec<_>>()).finish()
    }
}

impl Consumer {
    pub fn new(store: Arc<StateStore>) -> Self {
        let (sink, recv) = notification_channel();
        Self { store, sink, recv, callbacks: HashMap::new() }
    }

    /// Call `callback` on this consumer's thread for the current value of `key` (if any) and every later update.
    /// Keep the returned id and pass it to [`Consumer::unsubscribe`] when the render surface goes away.
    pub fn subscribe<F>(&mut self, key: &ModuleKey, callback: F) -> SubscriptionId
    where
        F: Fn(&ModuleKey, &Value) -> Result<()> + 'static,
    {
        let id = self.store.subscribe(key, &self.sink);
        self.callbacks.insert(id, Box::new(callback));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        self.store.unsubscribe(id);
        self.callbacks.remove(&id);
    }

    pub fn subscription_count(&self) -> usize {
        self.callbacks.len()
    }

    /// Run callbacks for every notification queued so far, returning how many callbacks were invoked.
    /// Meant to be hooked into an idle/timeout source of a foreign main loop.
    pub fn dispatch_pending(&mut self) -> usize {
        let mut delivered = 0;
        while let Ok(notification) = self.recv.try_recv() {
            if self.deliver(notification) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Wait for the next notification and dispatch it. Cancel-safe, so it can be used as a `select!` branch
    /// next to other event sources of the render loop.
    pub async fn dispatch_next(&mut self) -> bool {
        match self.recv.recv().await {
            Some(notification) => self.deliver(notification),
            None => false,
        }
    }

    /// Dispatch notifications as they arrive, until `cancel` fires.
    pub async fn run(&mut self, cancel: CancellationToken) {
        crate::loop_select_cancellable! { cancel,
            _ = self.dispatch_next() => {}
        }
        log::debug!("Consumer loop stopped");
    }

    fn deliver(&mut self, notification: Notification) -> bool {
        if !notification.is_live() {
            return false;
        }
        let Some(callback) = self.callbacks.get(&notification.id) else {
            return false;
        };

        match catch_unwind(AssertUnwindSafe(|| callback(&notification.key, &notification.payload))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                log::error!("Callback {} for {} failed: {:?}", notification.id, notification.key, err);
            }
            Err(panic) => {
                log::error!(
                    "Callback {} for {} panicked: {}",
                    notification.id,
                    notification.key,
                    crate::util::panic_message(panic.as_ref())
                );
            }
        }
        true
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        for id in self.callbacks.keys() {
            self.store.unsubscribe(*id);
        }
    }
}
