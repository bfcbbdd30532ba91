//! Known hosts management for SSH host key verification

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use parking_lot::RwLock;
use russh::keys::{PublicKey, PublicKeyBase64};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::error::SshError;

/// Result of host key verification
#[derive(Debug, Clone, PartialEq)]
pub enum HostKeyVerification {
    /// Key matches known_hosts entry
    Verified,
    /// Host not in known_hosts (first connection)
    Unknown { fingerprint: String },
    /// Key changed from known_hosts entry (potential MITM)
    Changed {
        expected_fingerprint: String,
        actual_fingerprint: String,
    },
}

/// Entry in known_hosts: (key_type, base64_key)
#[derive(Clone, Debug)]
struct HostKeyEntry {
    key_type: String,
    key_data: String,
}

/// Known hosts file, cached in memory
pub struct KnownHostsStore {
    /// host -> keys (multiple key types per host)
    hosts: RwLock<HashMap<String, Vec<HostKeyEntry>>>,
    path: PathBuf,
}

impl KnownHostsStore {
    /// Default location, `~/.ssh/known_hosts`
    pub fn default_path() -> Result<PathBuf, SshError> {
        dirs::home_dir()
            .map(|h| h.join(".ssh").join("known_hosts"))
            .ok_or_else(|| {
                SshError::HomeLookup(crate::path_utils::HomeLookupError::MissingEnv(
                    crate::path_utils::HOME_ENV,
                ))
            })
    }

    /// Load the store from `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SshError> {
        let store = Self {
            hosts: RwLock::new(HashMap::new()),
            path: path.into(),
        };
        store.load()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<(), SshError> {
        if !self.path.exists() {
            debug!("known_hosts not found at {}", self.path.display());
            return Ok(());
        }

        let file = fs::File::open(&self.path)?;
        let reader = BufReader::new(file);
        let mut hosts = self.hosts.write();
        let mut entry_count = 0;

        for line in reader.lines() {
            let line = line?;
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            // hostname[,alias] keytype base64key [comment]
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 3 {
                continue;
            }

            let entry = HostKeyEntry {
                key_type: parts[1].to_string(),
                key_data: parts[2].to_string(),
            };

            for hostname in parts[0].split(',') {
                // Hashed hostnames (|1|...) are not supported
                if hostname.starts_with('|') {
                    continue;
                }
                hosts
                    .entry(hostname.to_lowercase())
                    .or_default()
                    .push(entry.clone());
                entry_count += 1;
            }
        }

        debug!(
            "Loaded {} known host entries ({} unique hosts) from {}",
            entry_count,
            hosts.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Lookup key for host:port, OpenSSH style
    fn make_key(host: &str, port: u16) -> String {
        let host = host.to_lowercase();
        if port == 22 {
            host
        } else {
            format!("[{}]:{}", host, port)
        }
    }

    /// Compute SHA256 fingerprint of public key
    pub fn fingerprint(key: &PublicKey) -> String {
        Self::fingerprint_bytes(&key.public_key_bytes())
    }

    fn fingerprint_bytes(bytes: &[u8]) -> String {
        let hash = Sha256::digest(bytes);
        format!("SHA256:{}", BASE64.encode(hash).trim_end_matches('='))
    }

    fn fingerprint_from_b64(stored_b64: &str) -> String {
        BASE64
            .decode(stored_b64)
            .map(|bytes| Self::fingerprint_bytes(&bytes))
            .unwrap_or_else(|_| "unknown".to_string())
    }

    /// Verify a host's public key
    pub fn verify(&self, host: &str, port: u16, key: &PublicKey) -> HostKeyVerification {
        self.verify_raw(
            host,
            port,
            key.algorithm().as_str(),
            &BASE64.encode(key.public_key_bytes()),
        )
    }

    fn verify_raw(&self, host: &str, port: u16, key_type: &str, key_b64: &str) -> HostKeyVerification {
        let lookup_key = Self::make_key(host, port);
        let fingerprint = Self::fingerprint_from_b64(key_b64);
        let hosts = self.hosts.read();

        let Some(entries) = hosts.get(&lookup_key) else {
            debug!("Unknown host: {}", lookup_key);
            return HostKeyVerification::Unknown { fingerprint };
        };

        match entries.iter().find(|e| e.key_type == key_type) {
            Some(entry) if entry.key_data == key_b64 => HostKeyVerification::Verified,
            Some(entry) => HostKeyVerification::Changed {
                expected_fingerprint: Self::fingerprint_from_b64(&entry.key_data),
                actual_fingerprint: fingerprint,
            },
            None => {
                debug!(
                    "Host {} known but no {} key stored, treating as new",
                    lookup_key, key_type
                );
                HostKeyVerification::Unknown { fingerprint }
            }
        }
    }

    /// Add a new host key to known_hosts
    pub fn add_host(&self, host: &str, port: u16, key: &PublicKey) -> Result<(), SshError> {
        self.add_raw(
            host,
            port,
            key.algorithm().as_str(),
            &BASE64.encode(key.public_key_bytes()),
        )
    }

    fn add_raw(&self, host: &str, port: u16, key_type: &str, key_b64: &str) -> Result<(), SshError> {
        let lookup_key = Self::make_key(host, port);

        self.hosts
            .write()
            .entry(lookup_key.clone())
            .or_default()
            .push(HostKeyEntry {
                key_type: key_type.to_string(),
                key_data: key_b64.to_string(),
            });

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{} {} {}", lookup_key, key_type, key_b64)?;

        info!("Added host key for {} (type: {}) to known_hosts", lookup_key, key_type);
        Ok(())
    }
}

/// Compare a server key against a pinned fingerprint (`SHA256:` prefix optional)
pub fn fingerprint_matches(key: &PublicKey, expected: &str) -> bool {
    let actual = KnownHostsStore::fingerprint(key);
    normalize_fingerprint(&actual) == normalize_fingerprint(expected)
}

fn normalize_fingerprint(fp: &str) -> &str {
    let fp = fp.trim();
    let fp = fp.strip_prefix("SHA256:").unwrap_or(fp);
    fp.trim_end_matches('=')
}
