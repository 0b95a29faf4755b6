pub mod border;
pub mod config;
pub mod error;
pub mod platform;
mod prefix;
pub mod registry;
pub mod store;
pub mod timer;
pub mod types;
pub mod uplink;
pub mod users;

#[cfg(test)]
mod test_support;

pub use border::{BorderDiscovery, BorderJudge, UplinkJudge};
pub use config::{IfaceConfig, InterfaceEntry};
pub use error::{IfaceError, IfaceResult, PlatformError, PlatformResult};
pub use platform::{IpCommandPlatform, IpWorker, Platform, PlatformHandle};
pub use registry::{Interface, InterfaceRegistry};
pub use store::{PrefixStore, StoredPrefix};
pub use timer::{Timer, TimerWatch, TokioTimer, run_timer_loop};
pub use types::{
    Classification, DelegatedPrefix, Family, IfaceFlags, Millis, PrefixKey, Route, TIME_MAX,
    UplinkSettings,
};
pub use uplink::{CommitOutcome, Ipv4Uplink, Ipv6Uplink, UplinkState};
pub use users::{EventBusUser, IfaceEvent, InterfaceUser, PrefixEvent};

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::test_support::{Recorded, RecordingUser, registry, run_loop};

    #[test]
    fn test_eth0_lifecycle() {
        let mut reg = registry();
        let user = Arc::new(RecordingUser::default());
        reg.register_user(user.clone());

        reg.create_or_get("eth0", Some("eth0"), IfaceFlags::default()).unwrap();
        reg.update_ipv4_uplink("eth0").unwrap();
        reg.set_ipv4_uplink(
            "eth0",
            UplinkSettings::default().with_address("192.0.2.10/24".parse().unwrap()),
        )
        .unwrap();
        let _ = reg.commit_ipv4_uplink("eth0").unwrap();
        assert_eq!(user.take(), vec![Recorded::Enabled("eth0".into(), false)]);

        reg.set_carrier("eth0", true).unwrap();
        reg.discover_border("eth0").unwrap();
        assert!(user.take().is_empty());
        assert!(run_loop(&mut reg));
        assert_eq!(user.take(), vec![Recorded::Enabled("eth0".into(), true)]);

        let now = reg.timer().now;
        let prefix = "2001:db8::/56".parse().unwrap();
        reg.update_ipv6_uplink("eth0").unwrap();
        reg.add_delegated("eth0", prefix, None, now + 3600, 0, b"test".to_vec())
            .unwrap();
        let _ = reg.commit_ipv6_uplink("eth0").unwrap();
        let announced: Vec<DelegatedPrefix> = user
            .take()
            .into_iter()
            .filter_map(|e| match e {
                Recorded::Prefix(name, PrefixEvent::Announced(p)) if name == "eth0" => Some(p),
                _ => None,
            })
            .collect();
        assert_eq!(announced.len(), 1);
        assert_eq!(announced[0].prefix, prefix);
        assert_eq!(announced[0].dhcpv6_data.len(), 4);

        reg.update_ipv6_uplink("eth0").unwrap();
        let _ = reg.commit_ipv6_uplink("eth0").unwrap();
        let withdrawn: Vec<PrefixKey> = user
            .take()
            .into_iter()
            .filter_map(|e| match e {
                Recorded::Prefix(_, PrefixEvent::Withdrawn(key)) => Some(key),
                _ => None,
            })
            .collect();
        assert_eq!(withdrawn, vec![PrefixKey { prefix, excluded: None }]);

        reg.remove("eth0").unwrap();
        assert_eq!(user.take(), vec![Recorded::Enabled("eth0".into(), false)]);
        assert!(reg.get("eth0").is_none());
    }

    #[test]
    fn test_event_bus_sees_commit_events() {
        let mut reg = registry();
        let bus = Arc::new(EventBusUser::new(16));
        let mut rx = bus.subscribe();
        reg.register_user(bus.clone());

        reg.create_or_get("wan", Some("eth1"), IfaceFlags::default()).unwrap();
        reg.update_ipv4_uplink("wan").unwrap();
        reg.set_ipv4_uplink(
            "wan",
            UplinkSettings::default().with_address("198.51.100.2/24".parse().unwrap()),
        )
        .unwrap();
        let _ = reg.commit_ipv4_uplink("wan").unwrap();

        assert_eq!(
            rx.try_recv().unwrap(),
            IfaceEvent::Enabled {
                ifname: "wan".to_string(),
                enabled: false
            }
        );
        assert!(rx.try_recv().is_err());
    }
}
