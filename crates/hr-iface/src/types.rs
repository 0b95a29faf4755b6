//! Configuration items carried by uplink transactions.

use std::fmt;
use std::net::IpAddr;

use ipnet::{IpNet, Ipv6Net};
use serde::{Deserialize, Serialize};

/// Monotonic milliseconds. Lifetimes and the discovery timer share this clock.
pub type Millis = i64;

/// Lifetime that never runs out.
pub const TIME_MAX: Millis = Millis::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    Ipv4,
    Ipv6,
}

impl Family {
    pub fn matches(self, addr: &IpAddr) -> bool {
        matches!(
            (self, addr),
            (Family::Ipv4, IpAddr::V4(_)) | (Family::Ipv6, IpAddr::V6(_))
        )
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Family::Ipv4 => f.write_str("ipv4"),
            Family::Ipv6 => f.write_str("ipv6"),
        }
    }
}

/// Result of border discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    #[default]
    Unknown,
    Internal,
    External,
}

/// Creation flags. A set flag pins the discovery result instead of asking the judge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IfaceFlags {
    #[serde(default)]
    pub internal: bool,
    #[serde(default)]
    pub external: bool,
}

impl IfaceFlags {
    pub fn forced(&self) -> Option<Classification> {
        if self.internal {
            Some(Classification::Internal)
        } else if self.external {
            Some(Classification::External)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Route {
    pub target: IpNet,
    #[serde(default)]
    pub via: Option<IpAddr>,
    #[serde(default)]
    pub metric: u32,
}

impl Route {
    pub fn new(target: IpNet, via: Option<IpAddr>) -> Self {
        Self { target, via, metric: 0 }
    }

    fn family_matches(&self, family: Family) -> bool {
        family.matches(&self.target.addr()) && self.via.is_none_or(|via| family.matches(&via))
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.target)?;
        if let Some(via) = self.via {
            write!(f, " via {}", via)?;
        }
        if self.metric != 0 {
            write!(f, " metric {}", self.metric)?;
        }
        Ok(())
    }
}

/// Addresses, routes and the DHCP option blob of one address family.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UplinkSettings {
    #[serde(default)]
    pub addresses: Vec<IpNet>,
    #[serde(default)]
    pub routes: Vec<Route>,
    #[serde(default)]
    pub dhcp_data: Vec<u8>,
}

impl UplinkSettings {
    pub fn with_address(mut self, addr: IpNet) -> Self {
        self.addresses.push(addr);
        self
    }

    pub fn with_route(mut self, route: Route) -> Self {
        self.routes.push(route);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty() && self.routes.is_empty() && self.dhcp_data.is_empty()
    }

    /// First item that does not belong to `family`, rendered for error reporting.
    pub(crate) fn foreign_item(&self, family: Family) -> Option<String> {
        if let Some(addr) = self.addresses.iter().find(|a| !family.matches(&a.addr())) {
            return Some(addr.to_string());
        }
        self.routes
            .iter()
            .find(|r| !r.family_matches(family))
            .map(Route::to_string)
    }
}

/// Identity of a delegated prefix inside the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrefixKey {
    pub prefix: Ipv6Net,
    pub excluded: Option<Ipv6Net>,
}

impl fmt::Display for PrefixKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.excluded {
            Some(excluded) => write!(f, "{} (excluding {})", self.prefix, excluded),
            None => write!(f, "{}", self.prefix),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegatedPrefix {
    pub prefix: Ipv6Net,
    #[serde(default)]
    pub excluded: Option<Ipv6Net>,
    pub valid_until: Millis,
    pub preferred_until: Millis,
    #[serde(default)]
    pub dhcpv6_data: Vec<u8>,
}

impl DelegatedPrefix {
    pub fn key(&self) -> PrefixKey {
        PrefixKey {
            prefix: self.prefix,
            excluded: self.excluded,
        }
    }

    /// Live means strictly valid at `now`; expiring exactly now counts as gone.
    pub fn is_live(&self, now: Millis) -> bool {
        self.valid_until > now
    }
}
