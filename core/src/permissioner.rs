//! Decides permission requests against an IP egress policy.
//!
//! The only requests ever granted automatically are `net` requests whose
//! every candidate address passes every enabled policy. Everything else is
//! an error, which callers convert into a denial.

use std::fmt;
use std::io;
use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::net::Ipv6Addr;
use std::net::ToSocketAddrs;

use thiserror::Error;

use crate::hostport::HostPort;
use crate::permission::PermissionDescriptor;
use crate::permission::PermissionName;

/// One IP-classification policy; enabling it denies matching addresses.
/// A closed set so enablement configuration and denial reporting operate on
/// the same categories.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IpPolicy {
    Loopback,
    Private,
    Multicast,
    Unspecified,
    GlobalUnicast,
    LinkLocalUnicast,
    LinkLocalMulticast,
    InterfaceLocalMulticast,
}

impl IpPolicy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Loopback => "loopback",
            Self::Private => "private",
            Self::Multicast => "multicast",
            Self::Unspecified => "unspecified",
            Self::GlobalUnicast => "global unicast",
            Self::LinkLocalUnicast => "link local unicast",
            Self::LinkLocalMulticast => "link local multicast",
            Self::InterfaceLocalMulticast => "interface local multicast",
        }
    }

    /// True when `ip` falls in this policy's range.
    pub fn violates(self, ip: IpAddr) -> bool {
        match self {
            Self::Loopback => ip.is_loopback(),
            Self::Private => is_private(ip),
            Self::Multicast => ip.is_multicast(),
            Self::Unspecified => ip.is_unspecified(),
            Self::GlobalUnicast => is_global_unicast(ip),
            Self::LinkLocalUnicast => is_link_local_unicast(ip),
            Self::LinkLocalMulticast => is_link_local_multicast(ip),
            Self::InterfaceLocalMulticast => is_interface_local_multicast(ip),
        }
    }
}

impl fmt::Display for IpPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn is_private(ip: IpAddr) -> bool {
    match ip {
        // RFC 1918.
        IpAddr::V4(ip) => ip.is_private(),
        // Unique-local, RFC 4193.
        IpAddr::V6(ip) => ip.is_unique_local(),
    }
}

fn is_link_local_unicast(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(ip) => ip.is_link_local(),
        IpAddr::V6(ip) => ip.is_unicast_link_local(),
    }
}

fn is_link_local_multicast(ip: IpAddr) -> bool {
    match ip {
        // 224.0.0.0/24.
        IpAddr::V4(ip) => ip.octets()[..3] == [224, 0, 0],
        IpAddr::V6(ip) => multicast_scope(ip) == Some(0x2),
    }
}

fn is_interface_local_multicast(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(_) => false,
        IpAddr::V6(ip) => multicast_scope(ip) == Some(0x1),
    }
}

fn multicast_scope(ip: Ipv6Addr) -> Option<u16> {
    if ip.is_multicast() {
        Some(ip.segments()[0] & 0x000f)
    } else {
        None
    }
}

/// Anything routable: not unspecified, loopback, multicast, link-local
/// unicast, or the IPv4 broadcast address.
fn is_global_unicast(ip: IpAddr) -> bool {
    let broadcast = matches!(ip, IpAddr::V4(v4) if v4 == Ipv4Addr::BROADCAST);
    !broadcast
        && !ip.is_unspecified()
        && !ip.is_loopback()
        && !ip.is_multicast()
        && !is_link_local_unicast(ip)
}

#[derive(Debug, Error)]
pub enum PermissionError {
    /// The request is not a network request; only those can be granted here.
    #[error("permission `{actual}` cannot be granted by the network policy")]
    NameUnmatched { actual: PermissionName },
    /// An unscoped network request would cover every host.
    #[error("network permission without host is disallowed")]
    AllHost,
    #[error("failed to resolve `{host}`: {source}")]
    Resolve { host: String, source: io::Error },
    #[error("`{host}` resolved to no addresses")]
    NoAddresses { host: String },
    /// An enabled policy matched one of the candidate addresses.
    #[error("{policy}: {ip}")]
    Policy { policy: IpPolicy, ip: IpAddr },
}

/// Decides one permission request. Implementations may block (DNS); the
/// mediation loop calls this from a blocking task, and the runtime emits at
/// most one outstanding prompt at a time, so blocking here cannot reorder
/// responses.
pub trait Permissioner: Send + Sync {
    fn request_permission(&self, descriptor: &PermissionDescriptor) -> Result<(), PermissionError>;
}

/// Permissioner denying any candidate address matched by an enabled policy.
///
/// Names that resolve to several addresses are only allowed when every
/// address passes every policy, so a half-internal name cannot smuggle a
/// request past the policy set.
#[derive(Clone, Debug, Default)]
pub struct IpPolicyPermissioner {
    disallow: Vec<IpPolicy>,
}

impl IpPolicyPermissioner {
    pub fn disallow(policies: impl Into<Vec<IpPolicy>>) -> Self {
        Self {
            disallow: policies.into(),
        }
    }

    fn candidates(&self, host: &HostPort) -> Result<Vec<IpAddr>, PermissionError> {
        if let Some(literal) = host.literal_addr() {
            return Ok(vec![literal]);
        }

        let addrs = (host.host.as_str(), 0u16)
            .to_socket_addrs()
            .map_err(|source| PermissionError::Resolve {
                host: host.host.clone(),
                source,
            })?;
        let ips: Vec<IpAddr> = addrs.map(|addr| addr.ip().to_canonical()).collect();
        if ips.is_empty() {
            return Err(PermissionError::NoAddresses {
                host: host.host.clone(),
            });
        }
        Ok(ips)
    }
}

impl Permissioner for IpPolicyPermissioner {
    fn request_permission(&self, descriptor: &PermissionDescriptor) -> Result<(), PermissionError> {
        if descriptor.name != PermissionName::Net {
            return Err(PermissionError::NameUnmatched {
                actual: descriptor.name,
            });
        }
        let host = descriptor.host.as_ref().ok_or(PermissionError::AllHost)?;

        for ip in self.candidates(host)? {
            for policy in &self.disallow {
                if policy.violates(ip) {
                    return Err(PermissionError::Policy {
                        policy: *policy,
                        ip,
                    });
                }
            }
        }
        Ok(())
    }
}
