use std::fmt;

use serde::Serialize;

use crate::hostport::HostPort;

/// The closed set of capabilities the runtime can request interactively.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionName {
    Run,
    Read,
    Write,
    Net,
    Env,
    Sys,
    Ffi,
    Hrtime,
}

impl PermissionName {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Run => "run",
            Self::Read => "read",
            Self::Write => "write",
            Self::Net => "net",
            Self::Env => "env",
            Self::Sys => "sys",
            Self::Ffi => "ffi",
            Self::Hrtime => "hrtime",
        }
    }
}

impl fmt::Display for PermissionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operating-system info categories a `sys` request can be scoped to.
/// `All` is the empty-target wildcard.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum SysKind {
    #[serde(rename = "")]
    All,
    #[serde(rename = "loadavg")]
    Loadavg,
    #[serde(rename = "hostname")]
    Hostname,
    #[serde(rename = "systemMemoryInfo")]
    SystemMemoryInfo,
    #[serde(rename = "networkInterfaces")]
    NetworkInterfaces,
    #[serde(rename = "osRelease")]
    OsRelease,
    #[serde(rename = "uid")]
    Uid,
    #[serde(rename = "gid")]
    Gid,
}

impl SysKind {
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "" => Some(Self::All),
            "loadavg" => Some(Self::Loadavg),
            "hostname" => Some(Self::Hostname),
            "systemMemoryInfo" => Some(Self::SystemMemoryInfo),
            "networkInterfaces" => Some(Self::NetworkInterfaces),
            "osRelease" => Some(Self::OsRelease),
            "uid" => Some(Self::Uid),
            "gid" => Some(Self::Gid),
            _ => None,
        }
    }
}

/// One structured capability request. Exactly one of the optional fields is
/// meaningful, selected by `name`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PermissionDescriptor {
    pub name: PermissionName,
    /// run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// read, write, ffi
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// net; `None` means "any host"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<HostPort>,
    /// env
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variable: Option<String>,
    /// sys
    #[serde(skip_serializing_if = "sys_kind_is_all")]
    pub kind: Option<SysKind>,
}

fn sys_kind_is_all(kind: &Option<SysKind>) -> bool {
    matches!(kind, None | Some(SysKind::All))
}

impl PermissionDescriptor {
    fn bare(name: PermissionName) -> Self {
        Self {
            name,
            command: None,
            path: None,
            host: None,
            variable: None,
            kind: None,
        }
    }

    pub fn hrtime() -> Self {
        Self::bare(PermissionName::Hrtime)
    }

    pub fn net(host: Option<HostPort>) -> Self {
        Self {
            host,
            ..Self::bare(PermissionName::Net)
        }
    }

    /// Builds a descriptor from the raw kind and target text of a prompt.
    /// Returns `None` when the kind is unknown or the target does not parse
    /// for that kind; a miss is a signal, not an error.
    pub fn from_parts(name: &str, target: &str) -> Option<Self> {
        match name {
            "run" => Some(Self {
                command: non_empty(target),
                ..Self::bare(PermissionName::Run)
            }),
            "read" => Some(Self {
                path: non_empty(target),
                ..Self::bare(PermissionName::Read)
            }),
            "write" => Some(Self {
                path: non_empty(target),
                ..Self::bare(PermissionName::Write)
            }),
            // Older runtimes spell it "network".
            "net" | "network" => {
                let host = HostPort::parse(target).ok()?;
                Some(Self::net(host))
            }
            "env" => Some(Self {
                variable: non_empty(target),
                ..Self::bare(PermissionName::Env)
            }),
            "sys" => {
                let kind = SysKind::parse(target)?;
                Some(Self {
                    kind: Some(kind),
                    ..Self::bare(PermissionName::Sys)
                })
            }
            "ffi" => Some(Self {
                path: non_empty(target),
                ..Self::bare(PermissionName::Ffi)
            }),
            "hrtime" => Some(Self::hrtime()),
            _ => None,
        }
    }
}

fn non_empty(target: &str) -> Option<String> {
    if target.is_empty() {
        None
    } else {
        Some(target.to_string())
    }
}
