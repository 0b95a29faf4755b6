//! Subscriber fan-out.
//!
//! Every registered [`InterfaceUser`] sees every event exactly once, delivered
//! synchronously from whatever call produced it. There is no queue in between.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::types::{DelegatedPrefix, PrefixKey};

/// What happened to a delegated prefix at commit time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PrefixEvent {
    /// Live after the commit. Sent on every commit, changed or not.
    Announced(DelegatedPrefix),
    /// Gone, either omitted from the new set or expired.
    Withdrawn(PrefixKey),
}

/// Observer of interface state. All callbacks default to doing nothing.
pub trait InterfaceUser: Send + Sync {
    fn on_enabled(&self, _ifname: &str, _enabled: bool) {}

    fn on_external_data(&self, _ifname: &str, _dhcpv6_data: &[u8]) {}

    fn on_prefix(&self, _ifname: &str, _event: &PrefixEvent) {}
}

#[derive(Default)]
pub struct Users {
    users: Vec<Arc<dyn InterfaceUser>>,
}

// Compare data pointers only; vtable pointers of the same object may differ.
fn same_user(a: &Arc<dyn InterfaceUser>, b: &Arc<dyn InterfaceUser>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

impl Users {
    /// Returns false when the user was already registered.
    pub fn register(&mut self, user: Arc<dyn InterfaceUser>) -> bool {
        if self.users.iter().any(|u| same_user(u, &user)) {
            return false;
        }
        self.users.push(user);
        true
    }

    /// Returns false when the user was not registered.
    pub fn unregister(&mut self, user: &Arc<dyn InterfaceUser>) -> bool {
        let before = self.users.len();
        self.users.retain(|u| !same_user(u, user));
        self.users.len() < before
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn notify_enabled(&self, ifname: &str, enabled: bool) {
        debug!(ifname, enabled, users = self.users.len(), "Notifying interface state");
        for user in &self.users {
            user.on_enabled(ifname, enabled);
        }
    }

    pub fn notify_external_data(&self, ifname: &str, dhcpv6_data: &[u8]) {
        for user in &self.users {
            user.on_external_data(ifname, dhcpv6_data);
        }
    }

    pub fn notify_prefix(&self, ifname: &str, event: &PrefixEvent) {
        for user in &self.users {
            user.on_prefix(ifname, event);
        }
    }
}

/// Interface event as seen by async consumers of [`EventBusUser`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum IfaceEvent {
    Enabled { ifname: String, enabled: bool },
    ExternalData { ifname: String, dhcpv6_data: Vec<u8> },
    Prefix { ifname: String, event: PrefixEvent },
}

impl IfaceEvent {
    pub fn ifname(&self) -> &str {
        match self {
            IfaceEvent::Enabled { ifname, .. }
            | IfaceEvent::ExternalData { ifname, .. }
            | IfaceEvent::Prefix { ifname, .. } => ifname,
        }
    }
}

/// Subscriber that republishes every event on a broadcast channel.
pub struct EventBusUser {
    tx: broadcast::Sender<IfaceEvent>,
}

impl EventBusUser {
    pub fn new(capacity: usize) -> Self {
        Self {
            tx: broadcast::channel(capacity).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IfaceEvent> {
        self.tx.subscribe()
    }

    fn publish(&self, event: IfaceEvent) {
        // No receivers is fine; events are not buffered for late subscribers.
        let _ = self.tx.send(event);
    }
}

impl InterfaceUser for EventBusUser {
    fn on_enabled(&self, ifname: &str, enabled: bool) {
        self.publish(IfaceEvent::Enabled {
            ifname: ifname.to_string(),
            enabled,
        });
    }

    fn on_external_data(&self, ifname: &str, dhcpv6_data: &[u8]) {
        self.publish(IfaceEvent::ExternalData {
            ifname: ifname.to_string(),
            dhcpv6_data: dhcpv6_data.to_vec(),
        });
    }

    fn on_prefix(&self, ifname: &str, event: &PrefixEvent) {
        self.publish(IfaceEvent::Prefix {
            ifname: ifname.to_string(),
            event: event.clone(),
        });
    }
}
