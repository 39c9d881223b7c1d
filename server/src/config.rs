use std::net::SocketAddr;
use std::path::PathBuf;

use clap::ArgAction;
use clap::Parser;

use warden_core::IpPolicy;

/// Everything the server reads from its environment, with flags as an
/// override for local runs.
#[derive(Debug, Parser)]
#[command(name = "warden-server", about = "Runs untrusted scripts behind an IP egress policy")]
pub struct Config {
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8090")]
    pub listen_addr: SocketAddr,

    /// The script that imports the target and wires its input and output
    /// to files.
    #[arg(long, env = "BOOTSTRAP_SCRIPT", default_value = "./bootstrap/runner.ts")]
    pub bootstrap_script: PathBuf,

    /// Concurrent runs beyond this wait for a slot.
    #[arg(long, env = "MAX_CONCURRENCY", default_value_t = 4)]
    pub max_concurrency: usize,

    #[arg(long, env = "RUN_TIMEOUT_SECONDS", default_value_t = 60)]
    pub run_timeout_seconds: u64,

    // Boolean policy toggles take an explicit value so `false` can be set
    // from the environment: DISALLOW_LOOPBACK=false.
    #[arg(long, env = "DISALLOW_GLOBAL_UNICAST", action = ArgAction::Set, default_value_t = false)]
    pub disallow_global_unicast: bool,

    #[arg(long, env = "DISALLOW_INTERFACE_LOCAL_MULTICAST", action = ArgAction::Set, default_value_t = true)]
    pub disallow_interface_local_multicast: bool,

    #[arg(long, env = "DISALLOW_LINK_LOCAL_UNICAST", action = ArgAction::Set, default_value_t = true)]
    pub disallow_link_local_unicast: bool,

    #[arg(long, env = "DISALLOW_LINK_LOCAL_MULTICAST", action = ArgAction::Set, default_value_t = true)]
    pub disallow_link_local_multicast: bool,

    #[arg(long, env = "DISALLOW_LOOPBACK", action = ArgAction::Set, default_value_t = true)]
    pub disallow_loopback: bool,

    #[arg(long, env = "DISALLOW_MULTICAST", action = ArgAction::Set, default_value_t = true)]
    pub disallow_multicast: bool,

    #[arg(long, env = "DISALLOW_PRIVATE", action = ArgAction::Set, default_value_t = true)]
    pub disallow_private: bool,

    #[arg(long, env = "DISALLOW_UNSPECIFIED", action = ArgAction::Set, default_value_t = true)]
    pub disallow_unspecified: bool,
}

impl Config {
    /// The enabled policies, in a fixed order so denial reporting is
    /// deterministic for a given configuration.
    pub fn ip_policies(&self) -> Vec<IpPolicy> {
        let toggles = [
            (self.disallow_global_unicast, IpPolicy::GlobalUnicast),
            (
                self.disallow_interface_local_multicast,
                IpPolicy::InterfaceLocalMulticast,
            ),
            (self.disallow_link_local_unicast, IpPolicy::LinkLocalUnicast),
            (
                self.disallow_link_local_multicast,
                IpPolicy::LinkLocalMulticast,
            ),
            (self.disallow_loopback, IpPolicy::Loopback),
            (self.disallow_multicast, IpPolicy::Multicast),
            (self.disallow_private, IpPolicy::Private),
            (self.disallow_unspecified, IpPolicy::Unspecified),
        ];
        toggles
            .into_iter()
            .filter(|(enabled, _)| *enabled)
            .map(|(_, policy)| policy)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_disallow_everything_but_global_unicast() {
        let config = Config::try_parse_from(["warden-server"]).unwrap();
        assert_eq!(
            vec![
                IpPolicy::InterfaceLocalMulticast,
                IpPolicy::LinkLocalUnicast,
                IpPolicy::LinkLocalMulticast,
                IpPolicy::Loopback,
                IpPolicy::Multicast,
                IpPolicy::Private,
                IpPolicy::Unspecified,
            ],
            config.ip_policies()
        );
        assert_eq!(4, config.max_concurrency);
        assert_eq!(60, config.run_timeout_seconds);
    }

    #[test]
    fn toggles_accept_explicit_values() {
        let config = Config::try_parse_from([
            "warden-server",
            "--disallow-loopback",
            "false",
            "--disallow-global-unicast",
            "true",
        ])
        .unwrap();
        let policies = config.ip_policies();
        assert!(policies.contains(&IpPolicy::GlobalUnicast));
        assert!(!policies.contains(&IpPolicy::Loopback));
    }
}
