//! Border discovery: timer-driven decision whether an interface is an
//! external uplink.
//!
//! A trigger moves the interface to `Pending` with a deadline. The registry
//! keeps the single shared timer armed for the earliest deadline; when it
//! fires, every due interface is classified and subscribers hear the result.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::IfaceResult;
use crate::platform::Platform;
use crate::registry::{Interface, InterfaceRegistry};
use crate::timer::Timer;
use crate::types::{Classification, Millis};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BorderDiscovery {
    #[default]
    Idle,
    Pending {
        deadline: Millis,
    },
    Resolved {
        classification: Classification,
    },
}

impl BorderDiscovery {
    fn deadline(self) -> Option<Millis> {
        match self {
            BorderDiscovery::Pending { deadline } => Some(deadline),
            _ => None,
        }
    }
}

/// Decides the classification of an interface once its discovery is due.
pub trait BorderJudge: Send + Sync {
    fn classify(&self, iface: &Interface) -> Classification;
}

/// External as soon as anything upstream has been committed.
#[derive(Debug, Default, Clone, Copy)]
pub struct UplinkJudge;

impl BorderJudge for UplinkJudge {
    fn classify(&self, iface: &Interface) -> Classification {
        if iface.has_uplink() {
            Classification::External
        } else {
            Classification::Internal
        }
    }
}

impl<F> BorderJudge for F
where
    F: Fn(&Interface) -> Classification + Send + Sync,
{
    fn classify(&self, iface: &Interface) -> Classification {
        self(iface)
    }
}

impl<P: Platform, T: Timer> InterfaceRegistry<P, T> {
    /// Schedule border discovery, restarting any discovery already pending.
    ///
    /// Returns `Ok(false)` for unmanaged interfaces, which are never probed.
    pub fn discover_border(&mut self, ifname: &str) -> IfaceResult<bool> {
        let deadline = self.timer.now().saturating_add(delay_millis(self.discovery_delay));
        let iface = self.iface_mut(ifname)?;
        if !iface.is_managed() {
            debug!(ifname, "Skipping border discovery on unmanaged interface");
            return Ok(false);
        }
        if iface.discovery.deadline().is_some() {
            debug!(ifname, "Restarting pending border discovery");
        }
        iface.discovery = BorderDiscovery::Pending { deadline };
        debug!(ifname, deadline, "Border discovery scheduled");
        self.rearm_timer();
        Ok(true)
    }

    /// Record the carrier state. Returns true when a rising edge scheduled
    /// border discovery.
    pub fn set_carrier(&mut self, ifname: &str, carrier: bool) -> IfaceResult<bool> {
        let iface = self.iface_mut(ifname)?;
        let rising = carrier && !iface.carrier;
        if iface.carrier != carrier {
            info!(ifname, carrier, "Carrier changed");
        }
        iface.carrier = carrier;
        if rising && iface.is_managed() {
            return self.discover_border(ifname);
        }
        Ok(false)
    }

    /// Timer callback: resolve every interface whose discovery is due, then
    /// re-arm for the next deadline. Returns the number resolved.
    pub fn run_timeout(&mut self) -> usize {
        let now = self.timer.now();
        let mut due: Vec<(Millis, String)> = self
            .interfaces
            .values()
            .filter_map(|iface| iface.discovery.deadline().map(|d| (d, iface.name.clone())))
            .filter(|(deadline, _)| *deadline <= now)
            .collect();
        due.sort();

        for (_, ifname) in &due {
            self.resolve_border(ifname);
        }
        self.rearm_timer();
        due.len()
    }

    fn resolve_border(&mut self, ifname: &str) {
        let Some(iface) = self.interfaces.get_mut(ifname) else {
            return;
        };
        let classification = iface
            .flags
            .forced()
            .unwrap_or_else(|| self.judge.classify(iface));
        iface.classification = classification;
        iface.discovery = BorderDiscovery::Resolved { classification };

        if let Some(token) = &iface.platform {
            let internal = classification == Classification::Internal;
            if let Err(e) = self.platform.set_internal(token, internal) {
                warn!(ifname, "Platform call failed: {}", e);
            }
        }

        let enabled = classification == Classification::External && iface.has_uplink();
        info!(ifname, ?classification, enabled, "Border discovery resolved");
        iface.report_enabled(&self.users, enabled);
    }

    /// Arm the shared timer for the earliest pending deadline, or cancel it.
    pub(crate) fn rearm_timer(&mut self) {
        let next = self
            .interfaces
            .values()
            .filter_map(|iface| iface.discovery.deadline())
            .min();
        match next {
            Some(deadline) => {
                let now = self.timer.now();
                let wait = u64::try_from(deadline.saturating_sub(now)).unwrap_or(0);
                self.timer.schedule(Duration::from_millis(wait));
            }
            None => self.timer.cancel(),
        }
    }
}

fn delay_millis(delay: Duration) -> Millis {
    Millis::try_from(delay.as_millis()).unwrap_or(Millis::MAX)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::test_support::{PlatformCall, Recorded, RecordingUser, TestRegistry, registry, run_loop};
    use crate::types::{IfaceFlags, UplinkSettings};

    fn with_user() -> (TestRegistry, Arc<RecordingUser>) {
        let mut reg = registry();
        let user = Arc::new(RecordingUser::default());
        reg.register_user(user.clone());
        (reg, user)
    }

    fn give_uplink(reg: &mut TestRegistry, name: &str) {
        reg.update_ipv4_uplink(name).unwrap();
        reg.set_ipv4_uplink(
            name,
            UplinkSettings::default().with_address("192.0.2.1/24".parse().unwrap()),
        )
        .unwrap();
        let _ = reg.commit_ipv4_uplink(name).unwrap();
    }

    #[test]
    fn test_discovery_is_asynchronous() {
        let (mut reg, user) = with_user();
        reg.create_or_get("eth0", Some("eth0"), IfaceFlags::default()).unwrap();
        give_uplink(&mut reg, "eth0");
        user.take();

        assert!(reg.discover_border("eth0").unwrap());
        assert!(user.take().is_empty());
        let start = reg.timer().now;
        assert_eq!(
            reg.get("eth0").unwrap().discovery(),
            BorderDiscovery::Pending { deadline: start + 2000 }
        );
        assert_eq!(reg.timer().deadline, Some(start + 2000));

        assert!(run_loop(&mut reg));
        assert_eq!(user.take(), vec![Recorded::Enabled("eth0".into(), true)]);
        let iface = reg.get("eth0").unwrap();
        assert_eq!(iface.classification(), Classification::External);
        assert!(iface.was_enabled());
        assert_eq!(reg.timer().deadline, None);
    }

    #[test]
    fn test_without_uplink_resolves_disabled() {
        let (mut reg, user) = with_user();
        reg.create_or_get("eth0", Some("eth0"), IfaceFlags::default()).unwrap();
        reg.discover_border("eth0").unwrap();
        run_loop(&mut reg);

        assert_eq!(user.take(), vec![Recorded::Enabled("eth0".into(), false)]);
        assert_eq!(reg.get("eth0").unwrap().classification(), Classification::Internal);
        assert!(reg.platform_mut().take().contains(&PlatformCall::Internal(true)));
    }

    #[test]
    fn test_retrigger_restarts_instead_of_stacking() {
        let (mut reg, user) = with_user();
        reg.create_or_get("eth0", Some("eth0"), IfaceFlags::default()).unwrap();
        reg.discover_border("eth0").unwrap();
        reg.timer_mut().now += 1500;
        reg.discover_border("eth0").unwrap();
        assert_eq!(reg.timer().schedules, 2);

        // The first deadline passes without resolving anything.
        reg.timer_mut().now += 600;
        assert_eq!(reg.run_timeout(), 0);
        assert!(user.take().is_empty());

        assert!(run_loop(&mut reg));
        assert_eq!(user.take().len(), 1);
        assert!(!run_loop(&mut reg));
    }

    #[test]
    fn test_single_timer_serves_all_interfaces() {
        let (mut reg, user) = with_user();
        reg.create_or_get("eth0", Some("eth0"), IfaceFlags::default()).unwrap();
        reg.create_or_get("eth1", Some("eth1"), IfaceFlags::default()).unwrap();

        reg.discover_border("eth0").unwrap();
        let first = reg.timer().deadline.unwrap();
        reg.timer_mut().now += 500;
        reg.discover_border("eth1").unwrap();
        // Still armed for the earlier of the two.
        assert_eq!(reg.timer().deadline, Some(first));

        assert!(run_loop(&mut reg));
        assert_eq!(user.take(), vec![Recorded::Enabled("eth0".into(), false)]);
        assert_eq!(reg.timer().deadline, Some(first + 500));

        assert!(run_loop(&mut reg));
        assert_eq!(user.take(), vec![Recorded::Enabled("eth1".into(), false)]);
    }

    #[test]
    fn test_rising_carrier_triggers_discovery() {
        let (mut reg, _user) = with_user();
        reg.create_or_get("eth0", Some("eth0"), IfaceFlags::default()).unwrap();

        assert!(reg.set_carrier("eth0", true).unwrap());
        assert!(reg.get("eth0").unwrap().carrier());
        assert!(matches!(
            reg.get("eth0").unwrap().discovery(),
            BorderDiscovery::Pending { .. }
        ));

        // Staying up or going down only records the value.
        assert!(!reg.set_carrier("eth0", true).unwrap());
        assert!(!reg.set_carrier("eth0", false).unwrap());
        assert!(!reg.get("eth0").unwrap().carrier());
        assert_eq!(reg.timer().schedules, 1);
        assert!(reg.timer().deadline.is_some());
    }

    #[test]
    fn test_forced_flags_override_judge() {
        let (mut reg, user) = with_user();
        let both = IfaceFlags { internal: true, external: true };
        reg.create_or_get("lan", Some("lan"), both).unwrap();
        give_uplink(&mut reg, "lan");
        user.take();

        reg.discover_border("lan").unwrap();
        run_loop(&mut reg);
        assert_eq!(reg.get("lan").unwrap().classification(), Classification::Internal);
        assert_eq!(user.take(), vec![Recorded::Enabled("lan".into(), false)]);
    }

    #[test]
    fn test_custom_judge() {
        let mut reg = registry().with_judge(|iface: &Interface| {
            if iface.name().starts_with("wan") {
                Classification::External
            } else {
                Classification::Internal
            }
        });
        reg.create_or_get("wan0", Some("wan0"), IfaceFlags::default()).unwrap();
        reg.create_or_get("lan0", Some("lan0"), IfaceFlags::default()).unwrap();
        reg.discover_border("wan0").unwrap();
        reg.discover_border("lan0").unwrap();
        assert_eq!(reg.run_timeout(), 0);
        reg.timer_mut().now += 2000;
        assert_eq!(reg.run_timeout(), 2);

        assert_eq!(reg.get("wan0").unwrap().classification(), Classification::External);
        assert_eq!(reg.get("lan0").unwrap().classification(), Classification::Internal);
        // External but nothing committed: still not enabled.
        assert!(!reg.get("wan0").unwrap().was_enabled());
    }

    #[test]
    fn test_commit_notification_precedes_discovery_result() {
        let (mut reg, user) = with_user();
        reg.create_or_get("eth0", Some("eth0"), IfaceFlags::default()).unwrap();
        reg.discover_border("eth0").unwrap();
        give_uplink(&mut reg, "eth0");
        run_loop(&mut reg);

        assert_eq!(
            user.take(),
            vec![
                Recorded::Enabled("eth0".into(), false),
                Recorded::Enabled("eth0".into(), true),
            ]
        );
    }
}
