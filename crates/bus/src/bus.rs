//! The notification bus mechanism.
//!
//! Dispatch is synchronous on the publisher's stack, over a snapshot of the
//! current registrations taken before the first handler runs, so a handler
//! that subscribes or unsubscribes mid-dispatch never affects the dispatch
//! already in flight. Handler failures are logged and swallowed; delivery is
//! at-most-once per publish call.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::warn;

use crate::error::BusError;

/// Subscribing under this name receives every event, after the named
/// subscribers have run.
pub const WILDCARD: &str = "*";

/// Default bound on the introspection history ring.
pub const DEFAULT_HISTORY_CAPACITY: usize = 200;

/// A single published notification. Ephemeral; retained only in the bounded
/// history ring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub event: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SubscribeOptions {
    /// Auto-unsubscribe after the first invocation.
    pub once: bool,
    /// Higher priority runs first; equal priorities keep registration order.
    pub priority: i32,
}

impl SubscribeOptions {
    pub fn once() -> Self {
        Self {
            once: true,
            priority: 0,
        }
    }

    pub fn priority(priority: i32) -> Self {
        Self {
            once: false,
            priority,
        }
    }
}

type Handler = dyn Fn(&Notification) -> anyhow::Result<()> + Send + Sync;

#[derive(Clone)]
struct Registration {
    id: u64,
    priority: i32,
    once: bool,
    handler: Arc<Handler>,
}

#[derive(Default)]
struct Registry {
    by_event: HashMap<String, Vec<Registration>>,
}

impl Registry {
    fn insert(&mut self, event: &str, registration: Registration) {
        let entries = self.by_event.entry(event.to_string()).or_default();
        entries.push(registration);
        // Stable sort: equal priorities stay in registration order.
        entries.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    fn remove(&mut self, event: &str, id: u64) {
        if let Some(entries) = self.by_event.get_mut(event) {
            entries.retain(|r| r.id != id);
            if entries.is_empty() {
                self.by_event.remove(event);
            }
        }
    }

    fn snapshot(&self, event: &str) -> Vec<Registration> {
        self.by_event.get(event).cloned().unwrap_or_default()
    }

    fn count(&self, event: &str) -> usize {
        self.by_event.get(event).map_or(0, Vec::len)
    }
}

struct BusInner {
    registry: Mutex<Registry>,
    history: Mutex<VecDeque<Notification>>,
    history_capacity: usize,
    next_id: AtomicU64,
}

/// Cheaply cloneable handle; clones share subscribers and history.
#[derive(Clone)]
pub struct NotificationBus {
    inner: Arc<BusInner>,
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::with_history_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    pub fn with_history_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                registry: Mutex::new(Registry::default()),
                history: Mutex::new(VecDeque::new()),
                history_capacity: capacity.max(1),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register `handler` for future publishes of `event` (or every event
    /// under [`WILDCARD`]). The returned token removes exactly this
    /// registration; dropping it without calling leaves the registration
    /// live.
    pub fn subscribe<F>(&self, event: &str, options: SubscribeOptions, handler: F) -> Subscription
    where
        F: Fn(&Notification) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let registration = Registration {
            id,
            priority: options.priority,
            once: options.once,
            handler: Arc::new(handler),
        };
        self.inner
            .registry
            .lock()
            .expect("bus registry lock poisoned")
            .insert(event, registration);
        Subscription {
            inner: self.inner.clone(),
            event: event.to_string(),
            id,
            removed: AtomicBool::new(false),
        }
    }

    /// Synchronously dispatch to every current subscriber of `event` in
    /// descending priority order, then to wildcard subscribers. A handler
    /// error never reaches the publisher or the remaining handlers.
    pub fn publish(&self, event: &str, payload: Value) {
        let notification = Notification {
            event: event.to_string(),
            payload,
            timestamp: Utc::now(),
        };
        self.record(&notification);

        let (named, wildcard) = {
            let registry = self
                .inner
                .registry
                .lock()
                .expect("bus registry lock poisoned");
            let named = registry.snapshot(event);
            let wildcard = if event == WILDCARD {
                Vec::new()
            } else {
                registry.snapshot(WILDCARD)
            };
            (named, wildcard)
        };

        self.dispatch(event, &named, &notification);
        self.dispatch(WILDCARD, &wildcard, &notification);
    }

    /// Dispatch on the next runtime tick so the caller's stack unwinds
    /// first. The publish happens even if the returned handle is dropped;
    /// awaiting the handle resolves once dispatch completed.
    pub fn publish_deferred(&self, event: &str, payload: Value) -> tokio::task::JoinHandle<()> {
        let bus = self.clone();
        let event = event.to_string();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            bus.publish(&event, payload);
        })
    }

    /// Resolve with the payload of the next `event` publish, or fail with
    /// [`BusError::WaitTimeout`]. The one-shot registration is removed on
    /// timeout.
    pub async fn wait_for(&self, event: &str, timeout: Duration) -> Result<Value, BusError> {
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let subscription = self.subscribe(event, SubscribeOptions::once(), move |notification| {
            if let Some(tx) = tx.lock().expect("wait_for sender lock poisoned").take() {
                let _ = tx.send(notification.payload.clone());
            }
            Ok(())
        });

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(_)) => Err(BusError::WaitCancelled {
                event: event.to_string(),
            }),
            Err(_) => {
                subscription.unsubscribe();
                Err(BusError::WaitTimeout {
                    event: event.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Drop subscribers for one event, or every subscriber when `None`.
    pub fn unsubscribe_all(&self, event: Option<&str>) {
        let mut registry = self
            .inner
            .registry
            .lock()
            .expect("bus registry lock poisoned");
        match event {
            Some(event) => {
                registry.by_event.remove(event);
            }
            None => registry.by_event.clear(),
        }
    }

    /// Snapshot of the history ring, oldest first.
    pub fn history(&self) -> Vec<Notification> {
        self.inner
            .history
            .lock()
            .expect("bus history lock poisoned")
            .iter()
            .cloned()
            .collect()
    }

    /// Live registrations for `event` (wildcard subscribers not included).
    pub fn subscriber_count(&self, event: &str) -> usize {
        self.inner
            .registry
            .lock()
            .expect("bus registry lock poisoned")
            .count(event)
    }

    fn dispatch(&self, slot: &str, registrations: &[Registration], notification: &Notification) {
        for registration in registrations {
            if registration.once {
                // Remove before invoking so a re-entrant publish cannot
                // fire a once-handler twice.
                self.inner
                    .registry
                    .lock()
                    .expect("bus registry lock poisoned")
                    .remove(slot, registration.id);
            }
            if let Err(error) = (registration.handler)(notification) {
                warn!(event = %notification.event, error = %error, "notification handler failed");
            }
        }
    }

    fn record(&self, notification: &Notification) {
        let mut history = self
            .inner
            .history
            .lock()
            .expect("bus history lock poisoned");
        history.push_back(notification.clone());
        while history.len() > self.inner.history_capacity {
            history.pop_front();
        }
    }
}

/// Unsubscribe token returned by [`NotificationBus::subscribe`]. Calling
/// [`unsubscribe`](Subscription::unsubscribe) twice is a no-op.
pub struct Subscription {
    inner: Arc<BusInner>,
    event: String,
    id: u64,
    removed: AtomicBool,
}

impl Subscription {
    pub fn unsubscribe(&self) {
        if self.removed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner
            .registry
            .lock()
            .expect("bus registry lock poisoned")
            .remove(&self.event, self.id);
    }
}
