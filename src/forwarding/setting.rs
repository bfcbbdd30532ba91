//! Tunnel endpoint settings

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::TunnelError;

/// Socket family of one tunnel end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Tcp,
    Unix,
}

impl FromStr for Network {
    type Err = TunnelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Network::Tcp),
            "unix" => Ok(Network::Unix),
            other => Err(TunnelError::UnsupportedNetwork(other.to_string())),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Tcp => write!(f, "tcp"),
            Network::Unix => write!(f, "unix"),
        }
    }
}

/// One end of a tunnel: `host:port` for tcp, a socket path for unix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelSetting {
    pub network: Network,
    pub address: String,
}

impl TunnelSetting {
    /// Build from a network name as found in configuration
    pub fn new(network: &str, address: impl Into<String>) -> Result<Self, TunnelError> {
        Ok(Self {
            network: network.parse()?,
            address: address.into(),
        })
    }

    pub fn tcp(address: impl Into<String>) -> Self {
        Self {
            network: Network::Tcp,
            address: address.into(),
        }
    }

    pub fn unix(path: impl Into<String>) -> Self {
        Self {
            network: Network::Unix,
            address: path.into(),
        }
    }

    /// Split a tcp address into host and port. IPv6 hosts come back without brackets.
    pub fn host_port(&self) -> Result<(String, u16), TunnelError> {
        let invalid = || TunnelError::InvalidAddress(self.address.clone());

        if self.network != Network::Tcp {
            return Err(invalid());
        }

        let (host, port) = if let Some(rest) = self.address.strip_prefix('[') {
            let (host, port) = rest.split_once("]:").ok_or_else(invalid)?;
            (host, port)
        } else {
            let (host, port) = self.address.rsplit_once(':').ok_or_else(invalid)?;
            if host.contains(':') {
                return Err(invalid());
            }
            (host, port)
        };

        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        Ok((host.to_string(), port))
    }
}

impl fmt::Display for TunnelSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.network, self.address)
    }
}

/// A local listener paired with the remote target it forwards to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardingBinding {
    pub local: TunnelSetting,
    pub remote: TunnelSetting,
}

impl ForwardingBinding {
    pub fn new(local: TunnelSetting, remote: TunnelSetting) -> Self {
        Self { local, remote }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_port() {
        assert_eq!(
            TunnelSetting::tcp("127.0.0.1:5432").host_port().unwrap(),
            ("127.0.0.1".to_string(), 5432)
        );
        assert_eq!(
            TunnelSetting::tcp("[::1]:8080").host_port().unwrap(),
            ("::1".to_string(), 8080)
        );
        assert_eq!(
            TunnelSetting::tcp("db.internal:0").host_port().unwrap(),
            ("db.internal".to_string(), 0)
        );

        for bad in ["noport", "::1:80", ":80", "host:99999", "[::1]80"] {
            assert!(
                matches!(TunnelSetting::tcp(bad).host_port(), Err(TunnelError::InvalidAddress(_))),
                "{bad}"
            );
        }
        assert!(TunnelSetting::unix("/tmp/x.sock").host_port().is_err());
    }

    #[test]
    fn test_unsupported_network() {
        assert!(matches!(
            TunnelSetting::new("udp", "0.0.0.0:53"),
            Err(TunnelError::UnsupportedNetwork(n)) if n == "udp"
        ));
        assert_eq!(
            TunnelSetting::new("unix", "/run/app.sock").unwrap(),
            TunnelSetting::unix("/run/app.sock")
        );
    }

    #[test]
    fn test_binding_from_json() {
        let json = r#"{
            "local": {"network": "tcp", "address": "127.0.0.1:15432"},
            "remote": {"network": "unix", "address": "/var/run/postgresql/.s.PGSQL.5432"}
        }"#;
        let binding: ForwardingBinding = serde_json::from_str(json).unwrap();
        assert_eq!(binding.local, TunnelSetting::tcp("127.0.0.1:15432"));
        assert_eq!(binding.remote.network, Network::Unix);
        assert!(serde_json::from_str::<ForwardingBinding>(
            r#"{"local": {"network": "udp", "address": "x"}, "remote": {"network": "tcp", "address": "y"}}"#
        )
        .is_err());
    }
}
