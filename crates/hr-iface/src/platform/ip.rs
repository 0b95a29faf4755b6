//! Platform adapter driving iproute2.
//!
//! Calls only queue work on a channel; [`IpWorker`] runs the `ip` commands in
//! order on the runtime and logs whatever fails. Per-device state that has no
//! kernel counterpart (internal/owner marks, DHCP payloads) is written as JSON
//! under the state directory for the DHCP servers to pick up.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::PathBuf;

use ipnet::{IpNet, Ipv6Net};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::{PlatformError, PlatformResult};
use crate::platform::{Platform, PlatformHandle};
use crate::types::Route;

// Linux IFNAMSIZ minus the terminating NUL.
const MAX_DEVICE_LEN: usize = 15;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Job {
    Ip { args: Vec<String> },
    WriteState { path: PathBuf, contents: String },
    RemoveState { path: PathBuf },
}

#[derive(Debug, Clone, Default, Serialize)]
struct DeviceState {
    device: String,
    internal: bool,
    owner: bool,
    dhcpv6_data: String,
    dhcp_data: String,
}

pub struct IpCommandPlatform {
    tx: mpsc::UnboundedSender<Job>,
    state_dir: PathBuf,
    devices: HashMap<String, DeviceState>,
}

/// Executes the jobs queued by an [`IpCommandPlatform`].
pub struct IpWorker {
    rx: mpsc::UnboundedReceiver<Job>,
}

impl IpCommandPlatform {
    pub fn new(state_dir: impl Into<PathBuf>) -> (Self, IpWorker) {
        let (tx, rx) = mpsc::unbounded_channel();
        let platform = Self {
            tx,
            state_dir: state_dir.into(),
            devices: HashMap::new(),
        };
        (platform, IpWorker { rx })
    }

    fn submit(&self, job: Job) -> PlatformResult<()> {
        self.tx.send(job).map_err(|_| PlatformError::WorkerGone)
    }

    fn ip(&self, args: Vec<String>) -> PlatformResult<()> {
        self.submit(Job::Ip { args })
    }

    fn state_path(&self, ifname: &str) -> PathBuf {
        self.state_dir.join(format!("{}.json", ifname))
    }

    fn persist(&self, ifname: &str) -> PlatformResult<()> {
        let Some(state) = self.devices.get(ifname) else {
            return Ok(());
        };
        let contents = serde_json::to_string_pretty(state).map_err(|e| PlatformError::Rejected {
            op: "persist",
            ifname: ifname.to_string(),
            reason: e.to_string(),
        })?;
        self.submit(Job::WriteState {
            path: self.state_path(ifname),
            contents,
        })
    }

    fn device_mut(&mut self, token: &PlatformHandle) -> PlatformResult<&mut DeviceState> {
        self.devices
            .get_mut(token.ifname())
            .ok_or_else(|| PlatformError::Rejected {
                op: "lookup",
                ifname: token.ifname().to_string(),
                reason: "handle was released".to_string(),
            })
    }
}

impl Platform for IpCommandPlatform {
    fn allocate(&mut self, ifname: &str, handle: &str) -> PlatformResult<PlatformHandle> {
        if handle.is_empty()
            || handle.len() > MAX_DEVICE_LEN
            || handle.contains(|c: char| c == '/' || c.is_whitespace())
        {
            return Err(PlatformError::Rejected {
                op: "allocate",
                ifname: ifname.to_string(),
                reason: format!("invalid device name {:?}", handle),
            });
        }

        self.ip(args(["link", "set", "dev", handle, "up"]))?;
        self.devices.insert(
            ifname.to_string(),
            DeviceState {
                device: handle.to_string(),
                ..Default::default()
            },
        );
        self.persist(ifname)?;
        info!(ifname, device = handle, "Platform handle allocated");
        Ok(PlatformHandle::new(ifname, handle))
    }

    fn release(&mut self, token: PlatformHandle) {
        if self.devices.remove(token.ifname()).is_none() {
            warn!(ifname = token.ifname(), "Releasing unknown platform handle");
            return;
        }
        if self
            .submit(Job::RemoveState {
                path: self.state_path(token.ifname()),
            })
            .is_err()
        {
            warn!(ifname = token.ifname(), "ip worker gone, state file left behind");
        }
        info!(ifname = token.ifname(), "Platform handle released");
    }

    fn apply_addresses(
        &mut self,
        token: &PlatformHandle,
        add: &[IpNet],
        remove: &[IpNet],
    ) -> PlatformResult<()> {
        for addr in remove {
            self.ip(addr_args("del", addr, token.device()))?;
        }
        for addr in add {
            self.ip(addr_args("add", addr, token.device()))?;
        }
        Ok(())
    }

    fn apply_routes(
        &mut self,
        token: &PlatformHandle,
        add: &[Route],
        remove: &[Route],
    ) -> PlatformResult<()> {
        for route in remove {
            self.ip(route_args("del", route, token.device()))?;
        }
        for route in add {
            self.ip(route_args("add", route, token.device()))?;
        }
        Ok(())
    }

    fn apply_prefix_filter(
        &mut self,
        token: &PlatformHandle,
        prefix: &Ipv6Net,
        enable: bool,
    ) -> PlatformResult<()> {
        let verb = if enable { "add" } else { "del" };
        let prefix = prefix.to_string();
        self.ip(args([
            "-6",
            "rule",
            verb,
            "from",
            prefix.as_str(),
            "iif",
            token.device(),
            "prohibit",
        ]))
    }

    fn apply_prefix_route(&mut self, prefix: &Ipv6Net, enable: bool) -> PlatformResult<()> {
        let verb = if enable { "add" } else { "del" };
        let prefix = prefix.to_string();
        self.ip(args(["-6", "route", verb, "unreachable", prefix.as_str()]))
    }

    fn apply_dhcpv6_payload(
        &mut self,
        token: &PlatformHandle,
        dhcpv6_data: &[u8],
        dhcp_data: &[u8],
    ) -> PlatformResult<()> {
        let state = self.device_mut(token)?;
        state.dhcpv6_data = hex::encode(dhcpv6_data);
        state.dhcp_data = hex::encode(dhcp_data);
        self.persist(token.ifname())
    }

    fn set_internal(&mut self, token: &PlatformHandle, internal: bool) -> PlatformResult<()> {
        self.device_mut(token)?.internal = internal;
        self.persist(token.ifname())
    }

    fn set_owner(&mut self, token: &PlatformHandle, owner: bool) -> PlatformResult<()> {
        self.device_mut(token)?.owner = owner;
        self.persist(token.ifname())
    }
}

impl IpWorker {
    /// Run until every [`IpCommandPlatform`] sender is dropped.
    pub async fn run(mut self) {
        info!("ip command worker started");
        while let Some(job) = self.rx.recv().await {
            execute(job).await;
        }
        info!("ip command worker stopped");
    }
}

async fn execute(job: Job) {
    match job {
        Job::Ip { args } => {
            let cmd = args.join(" ");
            let output = tokio::process::Command::new("ip").args(&args).output().await;
            match output {
                Ok(o) if o.status.success() => debug!(cmd = %cmd, "ip command applied"),
                Ok(o) => {
                    let stderr = String::from_utf8_lossy(&o.stderr);
                    // Adding what exists or deleting what is gone leaves the kernel where we want it.
                    if stderr.contains("File exists")
                        || stderr.contains("Cannot assign")
                        || stderr.contains("No such process")
                    {
                        debug!(cmd = %cmd, "ip command was a no-op: {}", stderr.trim());
                    } else {
                        warn!(cmd = %cmd, "ip command failed: {}", stderr.trim());
                    }
                }
                Err(e) => error!("Failed to run ip command: {}", e),
            }
        }
        Job::WriteState { path, contents } => {
            if let Some(dir) = path.parent() {
                if let Err(e) = tokio::fs::create_dir_all(dir).await {
                    error!("Failed to create state dir {}: {}", dir.display(), e);
                    return;
                }
            }
            let tmp = path.with_extension("json.tmp");
            if let Err(e) = tokio::fs::write(&tmp, &contents).await {
                error!("Failed to write {}: {}", tmp.display(), e);
                return;
            }
            if let Err(e) = tokio::fs::rename(&tmp, &path).await {
                error!("Failed to rename state to {}: {}", path.display(), e);
            }
        }
        Job::RemoveState { path } => match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
        },
    }
}

fn args<const N: usize>(parts: [&str; N]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn family_flag(addr: IpAddr) -> &'static str {
    match addr {
        IpAddr::V4(_) => "-4",
        IpAddr::V6(_) => "-6",
    }
}

fn addr_args(verb: &str, addr: &IpNet, device: &str) -> Vec<String> {
    let addr_str = addr.to_string();
    args([family_flag(addr.addr()), "addr", verb, addr_str.as_str(), "dev", device])
}

fn route_args(verb: &str, route: &Route, device: &str) -> Vec<String> {
    let mut out = args([family_flag(route.target.addr()), "route", verb]);
    out.push(route.target.to_string());
    if let Some(via) = route.via {
        out.push("via".to_string());
        out.push(via.to_string());
    }
    out.push("dev".to_string());
    out.push(device.to_string());
    if route.metric != 0 {
        out.push("metric".to_string());
        out.push(route.metric.to_string());
    }
    out
}
