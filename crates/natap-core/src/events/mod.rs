//! Network notifications and the dispatcher that routes them.
//!
//! A single [`EventDispatcher`] maps each [`EventKind`] to the handlers
//! registered for it. Handlers are closures, so whatever context they need
//! (typically a weak reference to the controller) is bound when they
//! subscribe; there is no process-wide instance to look up.

use crate::error::PlatformError;
use crate::platform::{EventSource, Ipv4Info};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Hardware address of a station on the downlink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddr(pub [u8; 6]);

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

/// Discriminant used to key subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    UplinkAddressAcquired,
    ClientConnected,
    ClientDisconnected,
}

/// A notification from the network stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetEvent {
    /// The uplink interface obtained an address.
    UplinkAddressAcquired { info: Ipv4Info },
    /// A station associated with the access point.
    ClientConnected { mac: MacAddr, aid: u16 },
    /// A station left the access point.
    ClientDisconnected { mac: MacAddr, aid: u16, reason: u16 },
}

impl NetEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            NetEvent::UplinkAddressAcquired { .. } => EventKind::UplinkAddressAcquired,
            NetEvent::ClientConnected { .. } => EventKind::ClientConnected,
            NetEvent::ClientDisconnected { .. } => EventKind::ClientDisconnected,
        }
    }
}

/// Type alias for subscription callback ID.
pub type SubscriptionId = u64;

/// Callback invoked for every event of the subscribed kind.
pub type EventHandler = Box<dyn Fn(&NetEvent) + Send + Sync>;

type SharedHandler = Arc<dyn Fn(&NetEvent) + Send + Sync>;

/// Routes events to handlers by kind.
///
/// Safe to share between the thread that subscribes and the thread that
/// delivers notifications. Handlers run outside the internal lock, so a
/// handler may itself subscribe or unsubscribe.
pub struct EventDispatcher {
    subscriptions: RwLock<HashMap<EventKind, Vec<(SubscriptionId, SharedHandler)>>>,
    next_sub_id: AtomicU64,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            next_sub_id: AtomicU64::new(1),
        }
    }

    /// Subscribe to a kind. Returns a subscription ID for unsubscribing.
    pub fn subscribe(&self, kind: EventKind, handler: EventHandler) -> SubscriptionId {
        let id = self.next_sub_id.fetch_add(1, Ordering::Relaxed);
        self.subscriptions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(kind)
            .or_default()
            .push((id, Arc::from(handler)));
        id
    }

    /// Unsubscribe by subscription ID. Returns true if found.
    pub fn unsubscribe(&self, sub_id: SubscriptionId) -> bool {
        let mut subs = self.subscriptions.write().unwrap_or_else(|e| e.into_inner());
        for handlers in subs.values_mut() {
            let before = handlers.len();
            handlers.retain(|(id, _)| *id != sub_id);
            if handlers.len() < before {
                return true;
            }
        }
        false
    }

    /// Deliver `event` to every handler subscribed to its kind, in
    /// subscription order. Returns how many handlers ran.
    pub fn dispatch(&self, event: &NetEvent) -> usize {
        let handlers: Vec<SharedHandler> = {
            let subs = self.subscriptions.read().unwrap_or_else(|e| e.into_inner());
            match subs.get(&event.kind()) {
                Some(list) => list.iter().map(|(_, h)| h.clone()).collect(),
                None => return 0,
            }
        };
        for handler in &handlers {
            handler(event);
        }
        handlers.len()
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subscriptions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&kind)
            .map(|s| s.len())
            .unwrap_or(0)
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSource for EventDispatcher {
    fn subscribe(
        &self,
        kind: EventKind,
        handler: EventHandler,
    ) -> Result<SubscriptionId, PlatformError> {
        Ok(EventDispatcher::subscribe(self, kind, handler))
    }
}
