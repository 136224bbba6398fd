//! Typed pub/sub fan-out of inbound messages.
//!
//! Each [`ConnectionManager`](crate::ConnectionManager) owns one
//! [`Dispatcher`]; consumers get a cheap clone of the handle and register
//! either callbacks or channels:
//!
//! ```rust
//! use circle_link::{Dispatcher, Message};
//! use serde_json::json;
//!
//! let dispatcher = Dispatcher::new();
//! let handle = dispatcher.subscribe("meeting_updated", |msg: &Message| {
//!     println!("meeting changed: {}", msg.payload());
//! });
//!
//! dispatcher.dispatch(&Message::new("meeting_updated", json!({ "id": 3 })));
//! handle.unsubscribe();
//! ```
//!
//! Delivery order for one message: subscribers of its kind in registration
//! order, then subscribe-to-all subscribers in registration order. Reserved
//! handshake kinds are never delivered.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, mpsc};

use crate::error::CircleLinkError;
use crate::models::{ConnectivityNotice, Message};

/// Capacity of the connectivity notice broadcast channel.
const NOTICE_CHANNEL_CAPACITY: usize = 64;

/// Callback invoked for each delivered message.
pub type MessageHandler = Arc<dyn Fn(&Message) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Target {
    Kind(String),
    All,
}

struct Entry {
    id: u64,
    active: Arc<AtomicBool>,
    handler: MessageHandler,
}

#[derive(Default)]
struct Registry {
    by_kind: HashMap<String, Vec<Entry>>,
    global: Vec<Entry>,
}

impl Registry {
    fn remove(&mut self, target: &Target, id: u64) -> bool {
        let list = match target {
            Target::Kind(kind) => match self.by_kind.get_mut(kind) {
                Some(list) => list,
                None => return false,
            },
            Target::All => &mut self.global,
        };
        let before = list.len();
        list.retain(|e| e.id != id);
        let removed = list.len() != before;
        if let Target::Kind(kind) = target {
            if self.by_kind.get(kind).is_some_and(Vec::is_empty) {
                self.by_kind.remove(kind);
            }
        }
        removed
    }
}

struct DispatcherInner {
    registry: RwLock<Registry>,
    next_id: AtomicU64,
    notices: broadcast::Sender<ConnectivityNotice>,
}

/// Outcome of dispatching one message.
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// Handlers that ran to completion.
    pub delivered: usize,
    /// One [`CircleLinkError::HandlerError`] per handler that panicked.
    pub errors: Vec<CircleLinkError>,
}

/// Handle to the subscriber registry. Cloning shares the registry.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.inner.registry.read();
        f.debug_struct("Dispatcher")
            .field("kinds", &registry.by_kind.len())
            .field("global", &registry.global.len())
            .finish()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(DispatcherInner {
                registry: RwLock::new(Registry::default()),
                next_id: AtomicU64::new(1),
                notices,
            }),
        }
    }

    /// Register `handler` for messages of `kind`.
    pub fn subscribe(
        &self,
        kind: impl Into<String>,
        handler: impl Fn(&Message) + Send + Sync + 'static,
    ) -> SubscriptionHandle {
        self.register(Target::Kind(kind.into()), Arc::new(handler))
    }

    /// Register `handler` for every non-reserved message.
    pub fn subscribe_to_all(
        &self,
        handler: impl Fn(&Message) + Send + Sync + 'static,
    ) -> SubscriptionHandle {
        self.register(Target::All, Arc::new(handler))
    }

    /// Channel form of [`subscribe`](Self::subscribe).
    pub fn subscribe_channel(
        &self,
        kind: impl Into<String>,
    ) -> (SubscriptionHandle, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self.subscribe(kind, move |msg: &Message| {
            let _ = tx.send(msg.clone());
        });
        (handle, rx)
    }

    /// Channel form of [`subscribe_to_all`](Self::subscribe_to_all).
    pub fn subscribe_all_channel(&self) -> (SubscriptionHandle, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self.subscribe_to_all(move |msg: &Message| {
            let _ = tx.send(msg.clone());
        });
        (handle, rx)
    }

    /// Receiver for connectivity notices published by the connection core.
    pub fn notices(&self) -> broadcast::Receiver<ConnectivityNotice> {
        self.inner.notices.subscribe()
    }

    /// Number of live subscriptions for `kind` (excluding global ones).
    pub fn subscriber_count(&self, kind: &str) -> usize {
        self.inner.registry.read().by_kind.get(kind).map_or(0, Vec::len)
    }

    /// Number of live subscribe-to-all subscriptions.
    pub fn global_subscriber_count(&self) -> usize {
        self.inner.registry.read().global.len()
    }

    /// Deliver `message` to its kind subscribers, then global subscribers.
    ///
    /// The registry is snapshotted before any handler runs, so handlers may
    /// subscribe or unsubscribe freely. A handler unsubscribed after the
    /// snapshot is skipped.
    pub fn dispatch(&self, message: &Message) -> DispatchReport {
        let mut report = DispatchReport::default();
        if message.is_reserved() {
            log::debug!(
                "[circle-link] Not dispatching reserved message '{}'",
                message.kind()
            );
            return report;
        }

        let snapshot: Vec<(Arc<AtomicBool>, MessageHandler)> = {
            let registry = self.inner.registry.read();
            registry
                .by_kind
                .get(message.kind())
                .into_iter()
                .flatten()
                .chain(registry.global.iter())
                .map(|e| (e.active.clone(), e.handler.clone()))
                .collect()
        };

        for (active, handler) in snapshot {
            if !active.load(Ordering::Acquire) {
                continue;
            }
            match catch_unwind(AssertUnwindSafe(|| handler(message))) {
                Ok(()) => report.delivered += 1,
                Err(panic) => {
                    let detail = panic_message(panic.as_ref());
                    log::warn!(
                        "[circle-link] Subscriber for '{}' panicked: {}",
                        message.kind(),
                        detail
                    );
                    report.errors.push(CircleLinkError::HandlerError {
                        kind: message.kind().to_string(),
                        message: detail,
                    });
                },
            }
        }

        report
    }

    pub(crate) fn publish_notice(&self, notice: ConnectivityNotice) {
        // No receivers is fine: notices are best-effort.
        let _ = self.inner.notices.send(notice);
    }

    fn register(&self, target: Target, handler: MessageHandler) -> SubscriptionHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));
        let entry = Entry {
            id,
            active: active.clone(),
            handler,
        };

        {
            let mut registry = self.inner.registry.write();
            match &target {
                Target::Kind(kind) => registry.by_kind.entry(kind.clone()).or_default().push(entry),
                Target::All => registry.global.push(entry),
            }
        }

        SubscriptionHandle {
            id,
            target,
            active,
            registry: Arc::downgrade(&self.inner),
            detached: false,
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Unsubscribe token returned by every `subscribe*` call.
///
/// Removes exactly the entry it was created for, either explicitly through
/// [`unsubscribe`](Self::unsubscribe) or when dropped. Call
/// [`detach`](Self::detach) to keep the subscription for the lifetime of
/// the dispatcher.
#[must_use = "dropping a SubscriptionHandle unsubscribes immediately; call detach() to keep it"]
pub struct SubscriptionHandle {
    id: u64,
    target: Target,
    active: Arc<AtomicBool>,
    registry: Weak<DispatcherInner>,
    detached: bool,
}

impl SubscriptionHandle {
    /// Registration id, unique within its dispatcher.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Kind this handle listens to, `None` for subscribe-to-all.
    pub fn kind(&self) -> Option<&str> {
        match &self.target {
            Target::Kind(kind) => Some(kind),
            Target::All => None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Remove this subscription. Other subscriptions for the same kind stay.
    pub fn unsubscribe(mut self) {
        self.remove();
    }

    /// Keep the subscription registered after this handle is dropped.
    pub fn detach(mut self) {
        self.detached = true;
    }

    fn remove(&mut self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(inner) = self.registry.upgrade() {
            inner.registry.write().remove(&self.target, self.id);
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if !self.detached {
            self.remove();
        }
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("active", &self.is_active())
            .finish()
    }
}
