//! SSH Configuration

use serde::{Deserialize, Serialize};

/// Key used when no private key path is configured
pub const DEFAULT_KEY_PATH: &str = "~/.ssh/id_rsa";

/// SSH connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshConfig {
    /// Remote host address
    pub host: String,

    /// SSH port (default: 22)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Username for authentication
    pub username: String,

    /// Authentication method
    pub auth: AuthMethod,

    /// Connection timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Terminal columns
    #[serde(default = "default_cols")]
    pub cols: u32,

    /// Terminal rows
    #[serde(default = "default_rows")]
    pub rows: u32,

    /// How the server's host key is verified. Must be stated explicitly.
    pub host_key: HostKeyPolicy,
}

impl SshConfig {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        auth: AuthMethod,
        host_key: HostKeyPolicy,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            auth,
            host_key,
            ..Default::default()
        }
    }

    /// `host:port` used for dialing and logging
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Authentication methods supported
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthMethod {
    /// Password authentication
    Password { password: String },

    /// SSH key authentication
    Key {
        /// Path to private key file, `~/.ssh/id_rsa` when absent
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key_path: Option<String>,
        /// Optional passphrase for encrypted keys
        #[serde(default, skip_serializing_if = "Option::is_none")]
        passphrase: Option<String>,
    },
}

impl AuthMethod {
    pub fn password(password: impl Into<String>) -> Self {
        Self::Password {
            password: password.into(),
        }
    }

    pub fn key(key_path: Option<String>, passphrase: Option<String>) -> Self {
        Self::Key {
            key_path,
            passphrase,
        }
    }

    /// Pick password auth when a non-empty password is given, key auth otherwise.
    pub fn from_credentials(password: Option<&str>, key_path: Option<&str>) -> Self {
        match password {
            Some(p) if !p.is_empty() => Self::password(p),
            _ => Self::key(
                key_path.filter(|k| !k.is_empty()).map(str::to_string),
                None,
            ),
        }
    }

    /// Key path to load, falling back to [`DEFAULT_KEY_PATH`]
    pub fn key_path(&self) -> Option<&str> {
        match self {
            Self::Password { .. } => None,
            Self::Key { key_path, .. } => Some(key_path.as_deref().unwrap_or(DEFAULT_KEY_PATH)),
        }
    }
}

/// Host key verification policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostKeyPolicy {
    /// Check against an OpenSSH known_hosts file (default `~/.ssh/known_hosts`)
    KnownHosts {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
        /// Record unknown hosts instead of rejecting them. Changed keys are always rejected.
        #[serde(default)]
        accept_new: bool,
    },

    /// Accept exactly one key, identified by its `SHA256:` fingerprint
    Fingerprint { sha256: String },

    /// Accept any host key. Only for throwaway hosts.
    InsecureAcceptAny,
}

impl Default for HostKeyPolicy {
    fn default() -> Self {
        Self::KnownHosts {
            path: None,
            accept_new: false,
        }
    }
}

fn default_port() -> u16 {
    22
}

fn default_timeout() -> u64 {
    30
}

fn default_cols() -> u32 {
    80
}

fn default_rows() -> u32 {
    24
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 22,
            username: String::new(),
            auth: AuthMethod::Password {
                password: String::new(),
            },
            timeout_secs: 30,
            cols: 80,
            rows: 24,
            host_key: HostKeyPolicy::default(),
        }
    }
}
