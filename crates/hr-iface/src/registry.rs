//! Interface registry: owns every [`Interface`], keyed by name.
//!
//! The uplink transactions, border discovery and prefix ledger operate on the
//! interfaces held here; their entry points live next to their logic in
//! `uplink.rs` and `border.rs`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ipnet::Ipv6Net;
use tracing::{info, warn};

use crate::border::{BorderDiscovery, BorderJudge, UplinkJudge};
use crate::config::IfaceConfig;
use crate::error::{IfaceError, IfaceResult};
use crate::platform::{Platform, PlatformHandle};
use crate::timer::Timer;
use crate::types::{Classification, DelegatedPrefix, IfaceFlags};
use crate::uplink::{Ipv4Uplink, Ipv6Uplink, UplinkConfig, UplinkState};
use crate::users::{InterfaceUser, Users};

#[derive(Debug)]
pub struct Interface {
    pub(crate) name: String,
    pub(crate) flags: IfaceFlags,
    pub(crate) platform: Option<PlatformHandle>,
    pub(crate) carrier: bool,
    pub(crate) classification: Classification,
    pub(crate) discovery: BorderDiscovery,
    pub(crate) ipv4: UplinkState<Ipv4Uplink>,
    pub(crate) ipv6: UplinkState<Ipv6Uplink>,
    pub(crate) ever_enabled: bool,
}

impl Interface {
    fn new(name: &str, flags: IfaceFlags, platform: Option<PlatformHandle>) -> Self {
        Self {
            name: name.to_string(),
            flags,
            platform,
            carrier: false,
            classification: Classification::Unknown,
            discovery: BorderDiscovery::Idle,
            ipv4: UplinkState::default(),
            ipv6: UplinkState::default(),
            ever_enabled: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flags(&self) -> IfaceFlags {
        self.flags
    }

    /// Managed interfaces hold a platform handle and get their configuration applied.
    pub fn is_managed(&self) -> bool {
        self.platform.is_some()
    }

    pub fn platform_handle(&self) -> Option<&PlatformHandle> {
        self.platform.as_ref()
    }

    pub fn carrier(&self) -> bool {
        self.carrier
    }

    pub fn classification(&self) -> Classification {
        self.classification
    }

    pub fn discovery(&self) -> BorderDiscovery {
        self.discovery
    }

    pub fn ipv4_uplink(&self) -> &UplinkState<Ipv4Uplink> {
        &self.ipv4
    }

    pub fn ipv6_uplink(&self) -> &UplinkState<Ipv6Uplink> {
        &self.ipv6
    }

    /// Committed delegated prefixes, in insertion order.
    pub fn delegated_prefixes(&self) -> &[DelegatedPrefix] {
        &self.ipv6.committed().delegated
    }

    pub fn dhcpv6_payload(&self) -> &[u8] {
        &self.ipv6.committed().settings.dhcp_data
    }

    /// Whether any committed configuration exists on either family.
    pub fn has_uplink(&self) -> bool {
        !self.ipv4.committed().is_empty() || !self.ipv6.committed().is_empty()
    }

    /// Whether an `enabled = true` event was ever sent for this interface.
    pub fn was_enabled(&self) -> bool {
        self.ever_enabled
    }

    pub(crate) fn report_enabled(&mut self, users: &Users, enabled: bool) {
        self.ever_enabled |= enabled;
        users.notify_enabled(&self.name, enabled);
    }
}

pub struct InterfaceRegistry<P, T> {
    pub(crate) interfaces: HashMap<String, Interface>,
    pub(crate) platform: P,
    pub(crate) timer: T,
    pub(crate) users: Users,
    pub(crate) judge: Box<dyn BorderJudge>,
    pub(crate) discovery_delay: Duration,
}

impl<P: Platform, T: Timer> InterfaceRegistry<P, T> {
    pub fn new(platform: P, timer: T, config: &IfaceConfig) -> Self {
        Self {
            interfaces: HashMap::new(),
            platform,
            timer,
            users: Users::default(),
            judge: Box::new(UplinkJudge),
            discovery_delay: config.discovery_delay(),
        }
    }

    /// Replace the predicate deciding between internal and external.
    pub fn with_judge(mut self, judge: impl BorderJudge + 'static) -> Self {
        self.judge = Box::new(judge);
        self
    }

    /// Return the interface called `name`, creating it on first use.
    ///
    /// A non-empty `handle` makes the interface managed and allocates its
    /// platform handle. Once the name exists, `handle` and `flags` are ignored.
    pub fn create_or_get(
        &mut self,
        name: &str,
        handle: Option<&str>,
        flags: IfaceFlags,
    ) -> IfaceResult<&Interface> {
        if !self.interfaces.contains_key(name) {
            let platform = match handle.filter(|h| !h.is_empty()) {
                Some(handle) => Some(self.platform.allocate(name, handle).map_err(|source| {
                    warn!(ifname = name, "Platform allocation failed: {}", source);
                    IfaceError::Allocation {
                        ifname: name.to_string(),
                        source,
                    }
                })?),
                None => None,
            };
            info!(ifname = name, managed = platform.is_some(), "Interface created");
            self.interfaces
                .insert(name.to_string(), Interface::new(name, flags, platform));
        }
        self.get(name)
            .ok_or_else(|| IfaceError::NotFound(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Option<&Interface> {
        self.interfaces.get(name)
    }

    /// Tear an interface down: final disable event, platform cleanup, gone.
    ///
    /// Delegated prefixes are purged in bulk without per-prefix events.
    pub fn remove(&mut self, name: &str) -> IfaceResult<()> {
        let mut iface = self
            .interfaces
            .remove(name)
            .ok_or_else(|| IfaceError::NotFound(name.to_string()))?;
        if iface.ever_enabled {
            self.users.notify_enabled(name, false);
        }

        if let Some(token) = iface.platform.take() {
            let mut prefixes: Vec<Ipv6Net> = Vec::new();
            for entry in iface.delegated_prefixes() {
                if !prefixes.contains(&entry.prefix) {
                    prefixes.push(entry.prefix);
                }
            }
            for prefix in &prefixes {
                let filter = self.platform.apply_prefix_filter(&token, prefix, false);
                let route = self.platform.apply_prefix_route(prefix, false);
                if let Err(e) = filter.and(route) {
                    warn!(ifname = name, %prefix, "Prefix teardown failed: {}", e);
                }
            }
            self.platform.release(token);
        }
        if matches!(iface.discovery, BorderDiscovery::Pending { .. }) {
            self.rearm_timer();
        }
        info!(ifname = name, "Interface removed");
        Ok(())
    }

    /// Returns false when the user was already registered.
    pub fn register_user(&mut self, user: Arc<dyn InterfaceUser>) -> bool {
        self.users.register(user)
    }

    /// Returns false when the user was not registered.
    pub fn unregister_user(&mut self, user: &Arc<dyn InterfaceUser>) -> bool {
        self.users.unregister(user)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.interfaces.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn timer(&self) -> &T {
        &self.timer
    }

    #[cfg(test)]
    pub(crate) fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    #[cfg(test)]
    pub(crate) fn timer_mut(&mut self) -> &mut T {
        &mut self.timer
    }

    pub(crate) fn iface_mut(&mut self, name: &str) -> IfaceResult<&mut Interface> {
        self.interfaces
            .get_mut(name)
            .ok_or_else(|| IfaceError::NotFound(name.to_string()))
    }
}
