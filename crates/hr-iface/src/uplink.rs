//! Update/set/commit transactions on the uplink configuration of an interface.
//!
//! Each family runs its own transaction: `update` opens an empty pending copy,
//! `set`/`add` fill it, and `commit` replaces the committed configuration
//! wholesale. Stale platform state is removed before new state is installed,
//! and any change is reported to subscribers as a disable before `commit`
//! returns. A change also restarts border discovery on managed interfaces,
//! which is the only path that re-enables them.

use std::fmt;

use ipnet::{IpNet, Ipv6Net};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{IfaceError, IfaceResult, PlatformError, PlatformResult};
use crate::platform::{Platform, PlatformHandle};
use crate::prefix;
use crate::registry::{Interface, InterfaceRegistry};
use crate::timer::Timer;
use crate::types::{DelegatedPrefix, Family, Millis, Route, UplinkSettings};
use crate::users::{PrefixEvent, Users};

pub trait UplinkConfig: Clone + Default + PartialEq + fmt::Debug {
    const FAMILY: Family;

    fn settings(&self) -> &UplinkSettings;

    fn is_empty(&self) -> bool;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ipv4Uplink {
    pub settings: UplinkSettings,
}

impl UplinkConfig for Ipv4Uplink {
    const FAMILY: Family = Family::Ipv4;

    fn settings(&self) -> &UplinkSettings {
        &self.settings
    }

    fn is_empty(&self) -> bool {
        self.settings.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ipv6Uplink {
    pub settings: UplinkSettings,
    pub delegated: Vec<DelegatedPrefix>,
}

impl UplinkConfig for Ipv6Uplink {
    const FAMILY: Family = Family::Ipv6;

    fn settings(&self) -> &UplinkSettings {
        &self.settings
    }

    fn is_empty(&self) -> bool {
        self.settings.is_empty() && self.delegated.is_empty()
    }
}

/// Committed configuration of one family plus the transaction in flight.
#[derive(Debug, Default)]
pub struct UplinkState<C> {
    committed: C,
    pending: Option<C>,
}

impl<C: UplinkConfig> UplinkState<C> {
    pub fn committed(&self) -> &C {
        &self.committed
    }

    pub fn pending(&self) -> Option<&C> {
        self.pending.as_ref()
    }

    pub fn in_transaction(&self) -> bool {
        self.pending.is_some()
    }

    fn begin(&mut self, ifname: &str) {
        if self.pending.is_some() {
            debug!(ifname, family = %C::FAMILY, "Restarting open uplink transaction");
        }
        self.pending = Some(C::default());
    }

    fn pending_mut(&mut self, ifname: &str) -> IfaceResult<&mut C> {
        self.pending.as_mut().ok_or_else(|| no_transaction(ifname, C::FAMILY))
    }

    fn take_pending(&mut self, ifname: &str) -> IfaceResult<C> {
        self.pending.take().ok_or_else(|| no_transaction(ifname, C::FAMILY))
    }

    fn install(&mut self, next: C) -> C {
        std::mem::replace(&mut self.committed, next)
    }
}

fn no_transaction(ifname: &str, family: Family) -> IfaceError {
    warn!(ifname, %family, "Uplink call outside of a transaction");
    IfaceError::NoTransaction {
        ifname: ifname.to_string(),
        family,
    }
}

/// Result of a commit that went through.
///
/// Platform failures do not undo the commit: the committed state records
/// what was intended and the failures are returned here.
#[derive(Debug, Default)]
pub struct CommitOutcome {
    pub changed: bool,
    pub platform_errors: Vec<PlatformError>,
}

impl CommitOutcome {
    pub fn is_degraded(&self) -> bool {
        !self.platform_errors.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Delta<T> {
    pub removed: Vec<T>,
    pub added: Vec<T>,
}

/// Symmetric difference of two lists, keeping list order.
pub(crate) fn delta<T: PartialEq + Clone>(old: &[T], new: &[T]) -> Delta<T> {
    let mut removed: Vec<T> = Vec::new();
    for item in old {
        if !new.contains(item) && !removed.contains(item) {
            removed.push(item.clone());
        }
    }
    let mut added: Vec<T> = Vec::new();
    for item in new {
        if !old.contains(item) && !added.contains(item) {
            added.push(item.clone());
        }
    }
    Delta { removed, added }
}

struct SettingsDelta {
    addresses: Delta<IpNet>,
    routes: Delta<Route>,
    dhcp_changed: bool,
}

impl SettingsDelta {
    fn between(old: &UplinkSettings, new: &UplinkSettings) -> Self {
        Self {
            addresses: delta(&old.addresses, &new.addresses),
            routes: delta(&old.routes, &new.routes),
            dhcp_changed: old.dhcp_data != new.dhcp_data,
        }
    }

    fn remove_stale<P: Platform>(&self, platform: &mut P, token: &PlatformHandle, errors: &mut Vec<PlatformError>) {
        if !self.routes.removed.is_empty() {
            note(errors, token, "routes", platform.apply_routes(token, &[], &self.routes.removed));
        }
        if !self.addresses.removed.is_empty() {
            note(errors, token, "addresses", platform.apply_addresses(token, &[], &self.addresses.removed));
        }
    }

    fn install_fresh<P: Platform>(&self, platform: &mut P, token: &PlatformHandle, errors: &mut Vec<PlatformError>) {
        // Addresses first so routes through them have a source.
        if !self.addresses.added.is_empty() {
            note(errors, token, "addresses", platform.apply_addresses(token, &self.addresses.added, &[]));
        }
        if !self.routes.added.is_empty() {
            note(errors, token, "routes", platform.apply_routes(token, &self.routes.added, &[]));
        }
    }
}

fn note(errors: &mut Vec<PlatformError>, token: &PlatformHandle, op: &str, result: PlatformResult<()>) {
    if let Err(e) = result {
        warn!(ifname = token.ifname(), op, "Platform call failed: {}", e);
        errors.push(e);
    }
}

fn check_family(ifname: &str, family: Family, settings: &UplinkSettings) -> IfaceResult<()> {
    match settings.foreign_item(family) {
        Some(item) => {
            warn!(ifname, %family, item, "Rejecting foreign uplink item");
            Err(IfaceError::FamilyMismatch {
                ifname: ifname.to_string(),
                family,
                item,
            })
        }
        None => Ok(()),
    }
}

/// Common tail of both commits: ownership flip and the pessimistic disable.
fn settle<P: Platform>(
    iface: &mut Interface,
    platform: &mut P,
    users: &Users,
    family: Family,
    had_uplink: bool,
    outcome: &mut CommitOutcome,
) {
    let has_uplink = iface.has_uplink();
    if had_uplink != has_uplink {
        if let Some(token) = &iface.platform {
            note(&mut outcome.platform_errors, token, "owner", platform.set_owner(token, has_uplink));
        }
    }
    if outcome.changed {
        info!(
            ifname = %iface.name,
            %family,
            has_uplink,
            degraded = outcome.is_degraded(),
            "Uplink reconfigured"
        );
        iface.report_enabled(users, false);
    } else {
        debug!(ifname = %iface.name, %family, "Uplink commit without changes");
    }
}

impl<P: Platform, T: Timer> InterfaceRegistry<P, T> {
    pub fn update_ipv4_uplink(&mut self, ifname: &str) -> IfaceResult<()> {
        self.iface_mut(ifname)?.ipv4.begin(ifname);
        Ok(())
    }

    /// Replace the pending IPv4 configuration.
    pub fn set_ipv4_uplink(&mut self, ifname: &str, settings: UplinkSettings) -> IfaceResult<()> {
        let pending = self.iface_mut(ifname)?.ipv4.pending_mut(ifname)?;
        check_family(ifname, Family::Ipv4, &settings)?;
        pending.settings = settings;
        Ok(())
    }

    pub fn commit_ipv4_uplink(&mut self, ifname: &str) -> IfaceResult<CommitOutcome> {
        let iface = self
            .interfaces
            .get_mut(ifname)
            .ok_or_else(|| IfaceError::NotFound(ifname.to_string()))?;
        let next = iface.ipv4.take_pending(ifname)?;
        let had_uplink = iface.has_uplink();
        let mut outcome = CommitOutcome {
            changed: iface.ipv4.committed() != &next,
            platform_errors: Vec::new(),
        };

        if let Some(token) = &iface.platform {
            let errors = &mut outcome.platform_errors;
            let delta = SettingsDelta::between(&iface.ipv4.committed().settings, &next.settings);
            delta.remove_stale(&mut self.platform, token, errors);
            delta.install_fresh(&mut self.platform, token, errors);
            if delta.dhcp_changed {
                let result = self.platform.apply_dhcpv6_payload(
                    token,
                    &iface.ipv6.committed().settings.dhcp_data,
                    &next.settings.dhcp_data,
                );
                note(errors, token, "dhcp payload", result);
            }
        }

        iface.ipv4.install(next);
        settle(iface, &mut self.platform, &self.users, Family::Ipv4, had_uplink, &mut outcome);
        if outcome.changed {
            self.discover_border(ifname)?;
        }
        Ok(outcome)
    }

    pub fn update_ipv6_uplink(&mut self, ifname: &str) -> IfaceResult<()> {
        self.iface_mut(ifname)?.ipv6.begin(ifname);
        Ok(())
    }

    /// Replace the pending IPv6 addresses, routes and DHCPv6 payload.
    /// Delegated prefixes added to this transaction are kept.
    pub fn set_ipv6_uplink(&mut self, ifname: &str, settings: UplinkSettings) -> IfaceResult<()> {
        let pending = self.iface_mut(ifname)?.ipv6.pending_mut(ifname)?;
        check_family(ifname, Family::Ipv6, &settings)?;
        pending.settings = settings;
        Ok(())
    }

    /// Append a delegated prefix to the pending IPv6 set. Duplicate keys are
    /// resolved at commit, the last one winning.
    pub fn add_delegated(
        &mut self,
        ifname: &str,
        prefix: Ipv6Net,
        excluded: Option<Ipv6Net>,
        valid_until: Millis,
        preferred_until: Millis,
        dhcpv6_data: Vec<u8>,
    ) -> IfaceResult<()> {
        let pending = self.iface_mut(ifname)?.ipv6.pending_mut(ifname)?;
        pending.delegated.push(DelegatedPrefix {
            prefix,
            excluded,
            valid_until,
            preferred_until,
            dhcpv6_data,
        });
        Ok(())
    }

    pub fn commit_ipv6_uplink(&mut self, ifname: &str) -> IfaceResult<CommitOutcome> {
        let now = self.timer.now();
        let iface = self
            .interfaces
            .get_mut(ifname)
            .ok_or_else(|| IfaceError::NotFound(ifname.to_string()))?;
        let pending = iface.ipv6.take_pending(ifname)?;
        let plan = prefix::plan(&iface.ipv6.committed().delegated, &pending.delegated, now);
        let next = Ipv6Uplink {
            settings: pending.settings,
            delegated: plan.live.clone(),
        };
        let had_uplink = iface.has_uplink();
        let mut outcome = CommitOutcome {
            changed: iface.ipv6.committed() != &next,
            platform_errors: Vec::new(),
        };

        if let Some(token) = &iface.platform {
            let errors = &mut outcome.platform_errors;
            let delta = SettingsDelta::between(&iface.ipv6.committed().settings, &next.settings);
            delta.remove_stale(&mut self.platform, token, errors);
            for prefix in &plan.filters_off {
                note(errors, token, "prefix filter", self.platform.apply_prefix_filter(token, prefix, false));
                note(errors, token, "prefix route", self.platform.apply_prefix_route(prefix, false));
            }
            delta.install_fresh(&mut self.platform, token, errors);
            for prefix in &plan.filters_on {
                note(errors, token, "prefix filter", self.platform.apply_prefix_filter(token, prefix, true));
                note(errors, token, "prefix route", self.platform.apply_prefix_route(prefix, true));
            }
            if delta.dhcp_changed {
                let result = self.platform.apply_dhcpv6_payload(
                    token,
                    &next.settings.dhcp_data,
                    &iface.ipv4.committed().settings.dhcp_data,
                );
                note(errors, token, "dhcp payload", result);
            }
        }

        iface.ipv6.install(next);
        settle(iface, &mut self.platform, &self.users, Family::Ipv6, had_uplink, &mut outcome);

        for key in plan.withdrawn {
            info!(ifname, prefix = %key, "Delegated prefix withdrawn");
            self.users.notify_prefix(ifname, &PrefixEvent::Withdrawn(key));
        }
        for entry in plan.live {
            self.users.notify_prefix(ifname, &PrefixEvent::Announced(entry));
        }
        if !iface.dhcpv6_payload().is_empty() {
            self.users.notify_external_data(ifname, iface.dhcpv6_payload());
        }
        if outcome.changed {
            self.discover_border(ifname)?;
        }
        Ok(outcome)
    }
}
