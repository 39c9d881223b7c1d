use std::fmt;
use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::net::Ipv6Addr;
use std::str::FromStr;

use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;
use serde::de::Error as _;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
#[error("invalid host or host:port: `{input}`")]
pub struct HostPortParseError {
    input: String,
}

/// An authority-style `host`, `host:port`, `[ipv6]` or `[ipv6]:port`.
///
/// When the host text is an IP literal the matching address field is set and
/// `host` holds its canonical rendering; a resolvable name sets neither.
/// At most one of `ipv4`/`ipv6` is ever set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostPort {
    pub host: String,
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
    pub port: Option<String>,
}

impl HostPort {
    /// Parses an authority string. The empty string means "any host" and
    /// parses to `None`, which is distinct from a parse error.
    pub fn parse(input: &str) -> Result<Option<Self>, HostPortParseError> {
        if input.is_empty() {
            return Ok(None);
        }

        let err = || HostPortParseError {
            input: input.to_string(),
        };

        // Lean on URL authority parsing so the bracket/colon ambiguity of
        // IPv6 literals is resolved exactly as it is in URLs. The scheme has
        // no default port, so an explicit port is always reported back.
        let url = Url::parse(&format!("warden://{input}")).map_err(|_| err())?;
        let port = url.port().map(|port| port.to_string());

        let (host, ipv4, ipv6) = match url.host().ok_or_else(err)? {
            url::Host::Ipv6(addr) => match addr.to_ipv4_mapped() {
                Some(v4) => (v4.to_string(), Some(v4), None),
                None => (addr.to_string(), None, Some(addr)),
            },
            url::Host::Ipv4(addr) => (addr.to_string(), Some(addr), None),
            url::Host::Domain(name) => match name.parse::<IpAddr>() {
                Ok(IpAddr::V4(v4)) => (v4.to_string(), Some(v4), None),
                Ok(IpAddr::V6(v6)) => match v6.to_ipv4_mapped() {
                    Some(v4) => (v4.to_string(), Some(v4), None),
                    None => (v6.to_string(), None, Some(v6)),
                },
                Err(_) => (name.to_string(), None, None),
            },
        };

        Ok(Some(Self {
            host,
            ipv4,
            ipv6,
            port,
        }))
    }

    /// The single candidate address when the host is an IP literal.
    pub fn literal_addr(&self) -> Option<IpAddr> {
        self.ipv4
            .map(IpAddr::V4)
            .or_else(|| self.ipv6.map(IpAddr::V6))
    }
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ipv6 {
            Some(addr) => write!(f, "[{addr}]")?,
            None => f.write_str(&self.host)?,
        }
        if let Some(port) = &self.port {
            write!(f, ":{port}")?;
        }
        Ok(())
    }
}

impl FromStr for HostPort {
    type Err = HostPortParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)?.ok_or_else(|| HostPortParseError {
            input: s.to_string(),
        })
    }
}

impl Serialize for HostPort {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for HostPort {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    use pretty_assertions::assert_eq;

    fn hostport(host: &str, port: Option<&str>) -> HostPort {
        let ip = host.parse::<IpAddr>().ok();
        HostPort {
            host: host.to_string(),
            ipv4: match ip {
                Some(IpAddr::V4(addr)) => Some(addr),
                _ => None,
            },
            ipv6: match ip {
                Some(IpAddr::V6(addr)) => Some(addr),
                _ => None,
            },
            port: port.map(str::to_string),
        }
    }

    #[test]
    fn empty_input_means_any_host() {
        assert_eq!(None, HostPort::parse("").unwrap());
    }

    #[test]
    fn parses_names_and_literals_with_and_without_ports() {
        let cases = [
            ("localhost", hostport("localhost", None)),
            ("localhost:80", hostport("localhost", Some("80"))),
            ("127.0.0.1", hostport("127.0.0.1", None)),
            ("127.0.0.1:80", hostport("127.0.0.1", Some("80"))),
            ("[::1]", hostport("::1", None)),
            ("[::1]:80", hostport("::1", Some("80"))),
        ];
        for (input, expected) in cases {
            assert_eq!(Some(expected), HostPort::parse(input).unwrap(), "{input}");
        }
    }

    #[test]
    fn v4_mapped_v6_literal_populates_the_ipv4_field() {
        let parsed = HostPort::parse("[::ffff:10.0.0.1]").unwrap().unwrap();
        assert_eq!(Some("10.0.0.1".parse().unwrap()), parsed.ipv4);
        assert_eq!(None, parsed.ipv6);
        assert_eq!("10.0.0.1", parsed.host);
    }

    #[test]
    fn format_then_parse_is_identity() {
        for input in ["localhost", "localhost:80", "127.0.0.1:8080", "[::1]:80", "[::ffff:10.0.0.1]", "[2001:db8::1]"] {
            let parsed = HostPort::parse(input).unwrap().unwrap();
            let reparsed = HostPort::parse(&parsed.to_string()).unwrap().unwrap();
            assert_eq!(parsed, reparsed, "{input}");
        }
    }

    #[test]
    fn garbage_is_a_parse_error() {
        assert!(HostPort::parse("[::1").is_err());
        assert!(HostPort::parse("host:port:extra").is_err());
    }

    #[test]
    fn serializes_as_the_formatted_authority() {
        let parsed = HostPort::parse("[::1]:80").unwrap().unwrap();
        assert_eq!(
            serde_json::json!("[::1]:80"),
            serde_json::to_value(&parsed).unwrap()
        );
    }
}
