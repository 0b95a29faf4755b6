//! Contract towards the code that programs the operating system.
//!
//! Calls are fire-and-forget: an adapter reports immediate failures through
//! [`PlatformError`] and logs everything that fails later on its own.

pub mod ip;

use ipnet::{IpNet, Ipv6Net};

use crate::error::PlatformResult;
use crate::types::Route;

pub use ip::{IpCommandPlatform, IpWorker};

/// Ownership token for one managed interface, handed out by [`Platform::allocate`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlatformHandle {
    ifname: String,
    device: String,
}

impl PlatformHandle {
    pub fn new(ifname: impl Into<String>, device: impl Into<String>) -> Self {
        Self {
            ifname: ifname.into(),
            device: device.into(),
        }
    }

    pub fn ifname(&self) -> &str {
        &self.ifname
    }

    /// OS-level device the handle was allocated for.
    pub fn device(&self) -> &str {
        &self.device
    }
}

pub trait Platform: Send {
    fn allocate(&mut self, ifname: &str, handle: &str) -> PlatformResult<PlatformHandle>;

    fn release(&mut self, token: PlatformHandle);

    /// Removals in `remove` are applied before the additions in `add`.
    fn apply_addresses(
        &mut self,
        token: &PlatformHandle,
        add: &[IpNet],
        remove: &[IpNet],
    ) -> PlatformResult<()>;

    /// Removals in `remove` are applied before the additions in `add`.
    fn apply_routes(
        &mut self,
        token: &PlatformHandle,
        add: &[Route],
        remove: &[Route],
    ) -> PlatformResult<()>;

    fn apply_prefix_filter(
        &mut self,
        token: &PlatformHandle,
        prefix: &Ipv6Net,
        enable: bool,
    ) -> PlatformResult<()>;

    fn apply_prefix_route(&mut self, prefix: &Ipv6Net, enable: bool) -> PlatformResult<()>;

    fn apply_dhcpv6_payload(
        &mut self,
        token: &PlatformHandle,
        dhcpv6_data: &[u8],
        dhcp_data: &[u8],
    ) -> PlatformResult<()>;

    fn set_internal(&mut self, token: &PlatformHandle, internal: bool) -> PlatformResult<()>;

    fn set_owner(&mut self, token: &PlatformHandle, owner: bool) -> PlatformResult<()>;
}
