//! LAN address discovery and listener binding.
//!
//! - Phone-facing servers bind all interfaces so the LAN can reach them.
//! - The control server binds loopback only.

use crate::common::StartError;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, UdpSocket};

/// Interface name prefixes of container bridges, hypervisors and VPN tunnels.
/// Addresses on these are rarely reachable from a phone on the same Wi-Fi.
const VIRTUAL_PREFIXES: &[&str] = &[
    "docker", "veth", "br-", "virbr", "vmnet", "vboxnet", "tun", "tap", "utun", "zt",
    "tailscale", "wg", "llw", "awdl", "cni", "flannel", "lxc", "lxd",
];

/// Address exposure policy for the listening socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BindScope {
    Loopback,
    #[default]
    AllInterfaces,
}

pub fn bind_addr(scope: BindScope, port: u16) -> SocketAddr {
    match scope {
        BindScope::Loopback => SocketAddr::from(([127, 0, 0, 1], port)),
        BindScope::AllInterfaces => SocketAddr::from(([0, 0, 0, 0], port)),
    }
}

/// Source of the address advertised in the pairing URL.
pub trait AddressResolver: Send + Sync {
    fn resolve(&self) -> Result<Ipv4Addr, StartError>;
}

/// Enumerates the machine's interfaces.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl AddressResolver for SystemResolver {
    fn resolve(&self) -> Result<Ipv4Addr, StartError> {
        resolve_address()
    }
}

/// Always answers with a preset address; `None` behaves like a machine
/// without any usable network.
#[derive(Debug, Clone, Copy)]
pub struct FixedResolver(pub Option<Ipv4Addr>);

impl AddressResolver for FixedResolver {
    fn resolve(&self) -> Result<Ipv4Addr, StartError> {
        self.0.ok_or(StartError::NoNetwork)
    }
}

/// Picks the IPv4 address a phone on the same network should use.
pub fn resolve_address() -> Result<Ipv4Addr, StartError> {
    let interfaces = if_addrs::get_if_addrs().map_err(|e| {
        tracing::warn!(error = %e, "Failed to enumerate network interfaces");
        StartError::NoNetwork
    })?;

    let candidates: Vec<(String, Ipv4Addr)> = interfaces
        .into_iter()
        .filter(|iface| !iface.is_loopback())
        .filter_map(|iface| match iface.ip() {
            IpAddr::V4(ip) => Some((iface.name, ip)),
            IpAddr::V6(_) => None,
        })
        .filter(|(name, ip)| is_usable(name, *ip))
        .collect();

    tracing::debug!(?candidates, "LAN address candidates");

    select_address(&candidates, routed_address()).ok_or(StartError::NoNetwork)
}

fn is_usable(name: &str, ip: Ipv4Addr) -> bool {
    !ip.is_loopback()
        && !ip.is_link_local()
        && !ip.is_unspecified()
        && !ip.is_multicast()
        && !ip.is_broadcast()
        && !is_virtual_interface(name)
}

pub(crate) fn is_virtual_interface(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    VIRTUAL_PREFIXES
        .iter()
        .any(|prefix| lower.starts_with(prefix))
}

/// Preference: the default-route address, then a private address, then anything.
pub(crate) fn select_address(
    candidates: &[(String, Ipv4Addr)],
    routed: Option<Ipv4Addr>,
) -> Option<Ipv4Addr> {
    if let Some(routed) = routed {
        if candidates.iter().any(|(_, ip)| *ip == routed) {
            return Some(routed);
        }
    }

    candidates
        .iter()
        .map(|(_, ip)| *ip)
        .find(Ipv4Addr::is_private)
        .or_else(|| candidates.first().map(|(_, ip)| *ip))
}

/// Address the OS would route outbound traffic from. Connecting a UDP
/// socket sends no packets.
fn routed_address() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(ip) if !ip.is_unspecified() => Some(ip),
        _ => None,
    }
}

/// Binds a non-blocking listener.
///
/// Port 0 takes whatever the OS hands out. A fixed port that is already in
/// use is retried on the next `retries` ports before giving up.
pub fn bind_listener(scope: BindScope, port: u16, retries: u16) -> Result<TcpListener, StartError> {
    let max_attempts = if port == 0 { 1 } else { u32::from(retries) + 1 };
    let mut attempts = 0;

    for offset in 0..max_attempts {
        // Retries stop at the top of the port range.
        let Some(candidate) = u16::try_from(offset)
            .ok()
            .and_then(|offset| port.checked_add(offset))
        else {
            break;
        };
        attempts += 1;
        let addr = bind_addr(scope, candidate);

        match TcpListener::bind(addr) {
            Ok(listener) => {
                listener
                    .set_nonblocking(true)
                    .map_err(StartError::Bind)?;
                if offset > 0 {
                    tracing::info!(requested = port, bound = candidate, "Preferred port busy, using fallback");
                }
                return Ok(listener);
            }
            Err(e) if e.kind() == ErrorKind::AddrInUse => {
                tracing::debug!(port = candidate, "Port already in use");
            }
            Err(e) => return Err(StartError::Bind(e)),
        }
    }

    Err(StartError::PortUnavailable { port, attempts })
}
