//! SSH Client implementation using russh

use std::sync::Arc;
use std::time::Duration;

use russh::keys::key::PrivateKeyWithHashAlg;
use russh::keys::PublicKey;
use russh::*;
use tracing::{debug, info, warn};

use super::config::{AuthMethod, HostKeyPolicy, SshConfig};
use super::connection::SshConnection;
use super::error::SshError;
use super::handle_owner::spawn_handle_owner_task;
use super::known_hosts::{fingerprint_matches, HostKeyVerification, KnownHostsStore};
use crate::path_utils::resolve_local;

/// Dials and authenticates one SSH connection
pub struct SshClient {
    config: SshConfig,
}

impl SshClient {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    /// Connect, authenticate and hand the session to its owner task
    pub async fn connect(self) -> Result<SshConnection, SshError> {
        let addr = self.config.address();

        info!("Connecting to SSH server at {}", addr);

        let socket_addr = tokio::net::lookup_host(&addr)
            .await
            .map_err(|e| SshError::ConnectionFailed(format!("Failed to resolve address: {}", e)))?
            .next()
            .ok_or_else(|| SshError::ConnectionFailed("No address found".to_string()))?;

        let ssh_config = client::Config {
            inactivity_timeout: None,
            keepalive_interval: Some(Duration::from_secs(30)),
            keepalive_max: 3,
            ..Default::default()
        };

        let handler = ClientHandler::new(
            self.config.host.clone(),
            self.config.port,
            self.config.host_key.clone(),
        );

        let mut handle = tokio::time::timeout(
            Duration::from_secs(self.config.timeout_secs),
            client::connect(Arc::new(ssh_config), socket_addr, handler),
        )
        .await
        .map_err(|_| SshError::Timeout(format!("Connection to {} timed out", addr)))?
        .map_err(|e| match e {
            SshError::HostKeyRejected { .. } => e,
            other => SshError::ConnectionFailed(other.to_string()),
        })?;

        debug!("SSH handshake completed");

        let authenticated = match &self.config.auth {
            AuthMethod::Password { password } => handle
                .authenticate_password(&self.config.username, password)
                .await
                .map_err(|e| SshError::AuthenticationFailed(e.to_string()))?,
            AuthMethod::Key { passphrase, .. } => {
                let key_path = resolve_local(self.config.auth.key_path().unwrap_or_default())?;
                debug!("Loading private key from {}", key_path);

                let key = russh::keys::load_secret_key(&key_path, passphrase.as_deref())
                    .map_err(|e| SshError::KeyError(format!("{}: {}", key_path, e)))?;
                let key_with_hash = PrivateKeyWithHashAlg::new(Arc::new(key), None);

                handle
                    .authenticate_publickey(&self.config.username, key_with_hash)
                    .await
                    .map_err(|e| SshError::AuthenticationFailed(e.to_string()))?
            }
        };

        if !authenticated.success() {
            return Err(SshError::AuthenticationFailed(
                "Authentication rejected by server".to_string(),
            ));
        }

        info!("SSH authentication successful for {}@{}", self.config.username, addr);

        let id = uuid::Uuid::new_v4().to_string();
        let controller = spawn_handle_owner_task(handle, id.clone());

        Ok(SshConnection::new(
            id,
            self.config.host,
            self.config.port,
            controller,
        ))
    }
}

/// Client handler for russh callbacks, verifies the server key against a [`HostKeyPolicy`]
pub struct ClientHandler {
    host: String,
    port: u16,
    policy: HostKeyPolicy,
}

impl ClientHandler {
    pub fn new(host: String, port: u16, policy: HostKeyPolicy) -> Self {
        Self { host, port, policy }
    }

    fn reject(&self, reason: String) -> SshError {
        SshError::HostKeyRejected {
            host: format!("{}:{}", self.host, self.port),
            reason,
        }
    }

    fn check_known_hosts(
        &self,
        path: Option<&str>,
        accept_new: bool,
        key: &PublicKey,
    ) -> Result<bool, SshError> {
        let path = match path {
            Some(p) => resolve_local(p)?.into(),
            None => KnownHostsStore::default_path()?,
        };
        let known_hosts = KnownHostsStore::open(path)?;

        match known_hosts.verify(&self.host, self.port, key) {
            HostKeyVerification::Verified => {
                info!("Host key verified for {}:{}", self.host, self.port);
                Ok(true)
            }
            HostKeyVerification::Unknown { fingerprint } if accept_new => {
                info!(
                    "New host {}:{}, adding to {} (fingerprint: {})",
                    self.host,
                    self.port,
                    known_hosts.path().display(),
                    fingerprint
                );
                if let Err(e) = known_hosts.add_host(&self.host, self.port, key) {
                    warn!("Failed to save host key: {}", e);
                }
                Ok(true)
            }
            HostKeyVerification::Unknown { fingerprint } => {
                warn!(
                    "Unknown host key for {}:{} (fingerprint: {}), rejecting",
                    self.host, self.port, fingerprint
                );
                Err(self.reject(format!(
                    "unknown host, fingerprint {}. Add it to {} or allow new hosts",
                    fingerprint,
                    known_hosts.path().display()
                )))
            }
            HostKeyVerification::Changed {
                expected_fingerprint,
                actual_fingerprint,
            } => {
                warn!(
                    "HOST KEY CHANGED for {}:{}! Expected {}, got {}",
                    self.host, self.port, expected_fingerprint, actual_fingerprint
                );
                Err(self.reject(format!(
                    "key changed, expected {} but server sent {}. \
                     If the change is legitimate, remove the old entry from {}",
                    expected_fingerprint,
                    actual_fingerprint,
                    known_hosts.path().display()
                )))
            }
        }
    }
}

impl client::Handler for ClientHandler {
    type Error = SshError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        match &self.policy {
            HostKeyPolicy::InsecureAcceptAny => {
                warn!(
                    "Accepting host key for {}:{} without verification ({})",
                    self.host,
                    self.port,
                    KnownHostsStore::fingerprint(server_public_key)
                );
                Ok(true)
            }
            HostKeyPolicy::Fingerprint { sha256 } => {
                if fingerprint_matches(server_public_key, sha256) {
                    info!("Host key matches pinned fingerprint for {}:{}", self.host, self.port);
                    Ok(true)
                } else {
                    Err(self.reject(format!(
                        "fingerprint {} does not match pinned {}",
                        KnownHostsStore::fingerprint(server_public_key),
                        sha256
                    )))
                }
            }
            HostKeyPolicy::KnownHosts { path, accept_new } => {
                let path = path.clone();
                let accept_new = *accept_new;
                self.check_known_hosts(path.as_deref(), accept_new, server_public_key)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reject_names_host_and_port() {
        let handler = ClientHandler::new(
            "build.local".into(),
            2222,
            HostKeyPolicy::InsecureAcceptAny,
        );
        match handler.reject("bad key".into()) {
            SshError::HostKeyRejected { host, reason } => {
                assert_eq!(host, "build.local:2222");
                assert_eq!(reason, "bad key");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_connect_refused_is_connection_failed() {
        // Bind then drop to get a port nothing listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut config = SshConfig::new(
            "127.0.0.1",
            port,
            "nobody",
            AuthMethod::password("x"),
            HostKeyPolicy::InsecureAcceptAny,
        );
        config.timeout_secs = 5;

        let err = SshClient::new(config).connect().await.unwrap_err();
        assert!(matches!(err, SshError::ConnectionFailed(_)), "{err}");
    }
}
