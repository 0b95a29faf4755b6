//! Test doubles for the collaborators of the registry.

use std::sync::Mutex;
use std::time::Duration;

use ipnet::{IpNet, Ipv6Net};

use crate::config::IfaceConfig;
use crate::error::{PlatformError, PlatformResult};
use crate::platform::{Platform, PlatformHandle};
use crate::registry::InterfaceRegistry;
use crate::timer::Timer;
use crate::types::{Millis, Route};
use crate::users::{InterfaceUser, PrefixEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    Enabled(String, bool),
    ExternalData(String, Vec<u8>),
    Prefix(String, PrefixEvent),
}

#[derive(Default)]
pub struct RecordingUser {
    events: Mutex<Vec<Recorded>>,
}

impl RecordingUser {
    pub fn take(&self) -> Vec<Recorded> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }

    fn push(&self, event: Recorded) {
        self.events.lock().unwrap().push(event);
    }
}

impl InterfaceUser for RecordingUser {
    fn on_enabled(&self, ifname: &str, enabled: bool) {
        self.push(Recorded::Enabled(ifname.to_string(), enabled));
    }

    fn on_external_data(&self, ifname: &str, dhcpv6_data: &[u8]) {
        self.push(Recorded::ExternalData(ifname.to_string(), dhcpv6_data.to_vec()));
    }

    fn on_prefix(&self, ifname: &str, event: &PrefixEvent) {
        self.push(Recorded::Prefix(ifname.to_string(), event.clone()));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformCall {
    Allocate(String, String),
    Release(String),
    Addresses { add: Vec<IpNet>, remove: Vec<IpNet> },
    Routes { add: Vec<Route>, remove: Vec<Route> },
    PrefixFilter(Ipv6Net, bool),
    PrefixRoute(Ipv6Net, bool),
    Dhcpv6Payload(Vec<u8>, Vec<u8>),
    Internal(bool),
    Owner(bool),
}

#[derive(Default)]
pub struct RecordingPlatform {
    pub calls: Vec<PlatformCall>,
    pub fail_allocate: bool,
    pub fail_addresses: bool,
    pub fail_prefix_filter: bool,
}

impl RecordingPlatform {
    pub fn take(&mut self) -> Vec<PlatformCall> {
        std::mem::take(&mut self.calls)
    }
}

impl Platform for RecordingPlatform {
    fn allocate(&mut self, ifname: &str, handle: &str) -> PlatformResult<PlatformHandle> {
        if self.fail_allocate {
            return Err(PlatformError::Exhausted(ifname.to_string()));
        }
        self.calls
            .push(PlatformCall::Allocate(ifname.to_string(), handle.to_string()));
        Ok(PlatformHandle::new(ifname, handle))
    }

    fn release(&mut self, token: PlatformHandle) {
        self.calls.push(PlatformCall::Release(token.ifname().to_string()));
    }

    fn apply_addresses(
        &mut self,
        token: &PlatformHandle,
        add: &[IpNet],
        remove: &[IpNet],
    ) -> PlatformResult<()> {
        self.calls.push(PlatformCall::Addresses {
            add: add.to_vec(),
            remove: remove.to_vec(),
        });
        if self.fail_addresses {
            return Err(PlatformError::Rejected {
                op: "addresses",
                ifname: token.ifname().to_string(),
                reason: "injected".to_string(),
            });
        }
        Ok(())
    }

    fn apply_routes(
        &mut self,
        _token: &PlatformHandle,
        add: &[Route],
        remove: &[Route],
    ) -> PlatformResult<()> {
        self.calls.push(PlatformCall::Routes {
            add: add.to_vec(),
            remove: remove.to_vec(),
        });
        Ok(())
    }

    fn apply_prefix_filter(
        &mut self,
        token: &PlatformHandle,
        prefix: &Ipv6Net,
        enable: bool,
    ) -> PlatformResult<()> {
        self.calls.push(PlatformCall::PrefixFilter(*prefix, enable));
        if self.fail_prefix_filter {
            return Err(PlatformError::Rejected {
                op: "prefix filter",
                ifname: token.ifname().to_string(),
                reason: "injected".to_string(),
            });
        }
        Ok(())
    }

    fn apply_prefix_route(&mut self, prefix: &Ipv6Net, enable: bool) -> PlatformResult<()> {
        self.calls.push(PlatformCall::PrefixRoute(*prefix, enable));
        Ok(())
    }

    fn apply_dhcpv6_payload(
        &mut self,
        _token: &PlatformHandle,
        dhcpv6_data: &[u8],
        dhcp_data: &[u8],
    ) -> PlatformResult<()> {
        self.calls.push(PlatformCall::Dhcpv6Payload(
            dhcpv6_data.to_vec(),
            dhcp_data.to_vec(),
        ));
        Ok(())
    }

    fn set_internal(&mut self, _token: &PlatformHandle, internal: bool) -> PlatformResult<()> {
        self.calls.push(PlatformCall::Internal(internal));
        Ok(())
    }

    fn set_owner(&mut self, _token: &PlatformHandle, owner: bool) -> PlatformResult<()> {
        self.calls.push(PlatformCall::Owner(owner));
        Ok(())
    }
}

/// Hand-cranked clock and timer, in the spirit of a fake event loop.
pub struct ManualTimer {
    pub now: Millis,
    pub deadline: Option<Millis>,
    pub schedules: usize,
}

impl Default for ManualTimer {
    fn default() -> Self {
        Self {
            now: 1_000_000,
            deadline: None,
            schedules: 0,
        }
    }
}

impl Timer for ManualTimer {
    fn schedule(&mut self, delay: Duration) {
        let delay = Millis::try_from(delay.as_millis()).unwrap_or(Millis::MAX);
        self.deadline = Some(self.now.saturating_add(delay));
        self.schedules += 1;
    }

    fn cancel(&mut self) {
        self.deadline = None;
    }

    fn now(&self) -> Millis {
        self.now
    }
}

pub type TestRegistry = InterfaceRegistry<RecordingPlatform, ManualTimer>;

pub fn registry() -> TestRegistry {
    InterfaceRegistry::new(
        RecordingPlatform::default(),
        ManualTimer::default(),
        &IfaceConfig::default(),
    )
}

/// Jump the clock to the armed deadline and run the timeout, like one turn of
/// the event loop. Returns false when nothing was armed.
pub fn run_loop(registry: &mut TestRegistry) -> bool {
    let Some(deadline) = registry.timer().deadline else {
        return false;
    };
    registry.timer_mut().now = deadline;
    registry.timer_mut().deadline = None;
    registry.run_timeout();
    true
}
