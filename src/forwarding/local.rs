//! Local Forwarding
//!
//! Listens on a local TCP port or Unix socket and forwards every accepted
//! connection to a target reached through the SSH connection.
//! Example: local 127.0.0.1:15432 -> remote unix /var/run/postgresql/.s.PGSQL.5432

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::{broadcast, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::dialer::{BoxedStream, TunnelDialer};
use super::error::TunnelError;
use super::setting::{ForwardingBinding, Network, TunnelSetting};

/// Idle timeout for forwarded connections (5 minutes)
pub const FORWARD_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// How long `stop` lets in-flight connections finish
const STOP_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

const RELAY_BUFFER_SIZE: usize = 32 * 1024;

/// Lifecycle of a tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Idle,
    Listening,
    Stopped,
}

/// Statistics for a tunnel
#[derive(Debug, Clone, Default)]
pub struct ForwardStats {
    /// Total connections handled
    pub connection_count: u64,
    /// Active connections right now
    pub active_connections: u64,
    /// Total bytes sent (local -> remote)
    pub bytes_sent: u64,
    /// Total bytes received (remote -> local)
    pub bytes_received: u64,
}

type SharedStats = Arc<RwLock<ForwardStats>>;

enum Listener {
    Tcp(TcpListener),
    Unix(UnixListener, UnixSocketFile),
}

/// Removes the socket file when the listener goes away
struct UnixSocketFile(PathBuf);

impl Drop for UnixSocketFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.0) {
            Ok(()) => debug!("Removed socket file {}", self.0.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove socket file {}: {}", self.0.display(), e),
        }
    }
}

fn listen_error(address: &str, e: io::Error) -> TunnelError {
    let reason = match e.kind() {
        io::ErrorKind::AddrInUse => {
            "address already in use, another process may be listening there".to_string()
        }
        io::ErrorKind::PermissionDenied => {
            "permission denied, ports below 1024 require elevated privileges".to_string()
        }
        io::ErrorKind::AddrNotAvailable => "address is not valid on this system".to_string(),
        _ => e.to_string(),
    };
    TunnelError::Listen {
        address: address.to_string(),
        reason,
    }
}

impl Listener {
    async fn bind(setting: &TunnelSetting) -> Result<Self, TunnelError> {
        match setting.network {
            Network::Tcp => {
                setting.host_port()?;
                let listener = TcpListener::bind(&setting.address)
                    .await
                    .map_err(|e| listen_error(&setting.address, e))?;
                Ok(Listener::Tcp(listener))
            }
            Network::Unix => {
                let path = PathBuf::from(&setting.address);
                let listener =
                    UnixListener::bind(&path).map_err(|e| listen_error(&setting.address, e))?;
                Ok(Listener::Unix(listener, UnixSocketFile(path)))
            }
        }
    }

    fn local_addr(&self) -> String {
        match self {
            Listener::Tcp(l) => l
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_default(),
            Listener::Unix(_, file) => file.0.to_string_lossy().to_string(),
        }
    }

    async fn accept(&self) -> io::Result<(BoxedStream, String)> {
        match self {
            Listener::Tcp(l) => {
                let (stream, peer) = l.accept().await?;
                if let Err(e) = stream.set_nodelay(true) {
                    warn!("Failed to set TCP_NODELAY: {}", e);
                }
                Ok((Box::new(stream), peer.to_string()))
            }
            Listener::Unix(l, file) => {
                let (stream, _) = l.accept().await?;
                Ok((Box::new(stream), file.0.to_string_lossy().to_string()))
            }
        }
    }
}

/// Accept errors that say nothing about the listener itself
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    ) || matches!(e.raw_os_error(), Some(23) | Some(24))
}

/// A tunnel that has not started listening yet
pub struct TunnelRelay {
    binding: ForwardingBinding,
    state: Arc<RwLock<TunnelState>>,
}

impl TunnelRelay {
    pub fn new(binding: ForwardingBinding) -> Self {
        Self {
            binding,
            state: Arc::new(RwLock::new(TunnelState::Idle)),
        }
    }

    pub fn binding(&self) -> &ForwardingBinding {
        &self.binding
    }

    pub fn state(&self) -> TunnelState {
        *self.state.read()
    }

    /// Bind the local listener and start accepting in the background.
    ///
    /// Every accepted connection gets its own stream from `dialer`.
    pub async fn start<D: TunnelDialer>(self, dialer: Arc<D>) -> Result<TunnelHandle, TunnelError> {
        let listener = Listener::bind(&self.binding.local).await?;
        let local_addr = listener.local_addr();
        *self.state.write() = TunnelState::Listening;

        info!(
            "Started tunnel: {} -> {}",
            self.binding.local, self.binding.remote
        );

        let (stop_tx, stop_rx) = watch::channel(false);
        let stats: SharedStats = Arc::new(RwLock::new(ForwardStats::default()));
        let closed_rx = dialer.subscribe_closed();

        let task = tokio::spawn(accept_loop(
            listener,
            dialer,
            self.binding.remote.clone(),
            Arc::clone(&stats),
            stop_rx,
            closed_rx,
            Arc::clone(&self.state),
        ));

        Ok(TunnelHandle {
            binding: self.binding,
            local_addr,
            state: self.state,
            stats,
            stop_tx,
            task,
        })
    }
}

/// Handle to a running tunnel. Dropping it stops the tunnel.
pub struct TunnelHandle {
    binding: ForwardingBinding,
    local_addr: String,
    state: Arc<RwLock<TunnelState>>,
    stats: SharedStats,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<Result<(), TunnelError>>,
}

impl TunnelHandle {
    /// Actual listening address (a tcp port of 0 is resolved here)
    pub fn local_addr(&self) -> &str {
        &self.local_addr
    }

    pub fn binding(&self) -> &ForwardingBinding {
        &self.binding
    }

    pub fn state(&self) -> TunnelState {
        *self.state.read()
    }

    pub fn is_running(&self) -> bool {
        self.state() == TunnelState::Listening
    }

    /// Get current statistics
    pub fn stats(&self) -> ForwardStats {
        self.stats.read().clone()
    }

    /// Ask the accept loop to close the listener
    pub fn stop(&self) {
        info!("Stopping tunnel on {}", self.local_addr);
        let _ = self.stop_tx.send(true);
    }

    /// Wait for the tunnel to end. `Ok` after [`TunnelHandle::stop`].
    pub async fn wait(self) -> Result<(), TunnelError> {
        self.task.await?
    }

    pub async fn stop_and_wait(self) -> Result<(), TunnelError> {
        self.stop();
        self.wait().await
    }
}

async fn wait_closed(rx: &mut Option<broadcast::Receiver<()>>) {
    match rx {
        Some(rx) => {
            let _ = rx.recv().await;
        }
        None => std::future::pending().await,
    }
}

async fn accept_loop<D: TunnelDialer>(
    listener: Listener,
    dialer: Arc<D>,
    remote: TunnelSetting,
    stats: SharedStats,
    mut stop_rx: watch::Receiver<bool>,
    mut closed_rx: Option<broadcast::Receiver<()>>,
    state: Arc<RwLock<TunnelState>>,
) -> Result<(), TunnelError> {
    let mut connections = JoinSet::new();

    let result = loop {
        tokio::select! {
            _ = stop_rx.changed() => {
                info!("Tunnel stopped by request");
                break Ok(());
            }

            _ = wait_closed(&mut closed_rx) => {
                info!("Tunnel stopped: SSH disconnected");
                break Err(TunnelError::SessionClosed);
            }

            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        debug!("Accepted connection from {} for tunnel", peer);
                        {
                            let mut s = stats.write();
                            s.connection_count += 1;
                            s.active_connections += 1;
                        }

                        let dialer = Arc::clone(&dialer);
                        let remote = remote.clone();
                        let stats = Arc::clone(&stats);
                        connections.spawn(async move {
                            let result = handle_connection(dialer.as_ref(), &remote, stream, &stats).await;
                            {
                                let mut s = stats.write();
                                s.active_connections = s.active_connections.saturating_sub(1);
                            }
                            if let Err(e) = result {
                                warn!("Tunnel connection from {} failed: {}", peer, e);
                            }
                        });
                    }
                    Err(e) if is_transient(&e) => {
                        warn!("Transient accept error: {}", e);
                        tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                        break Err(TunnelError::Accept(e));
                    }
                }
            }

            // Reap finished relays so the set does not grow without bound.
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    };

    drop(listener);
    *state.write() = TunnelState::Stopped;

    if !connections.is_empty() {
        debug!("Waiting for {} tunnel connections to finish", connections.len());
        let drained = tokio::time::timeout(STOP_DRAIN_TIMEOUT, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                "Timeout waiting for {} active connections, closing them",
                connections.len()
            );
            connections.shutdown().await;
        }
    }

    info!("Tunnel task exited");
    result
}

async fn handle_connection<D: TunnelDialer + ?Sized>(
    dialer: &D,
    remote: &TunnelSetting,
    local: BoxedStream,
    stats: &SharedStats,
) -> Result<(), TunnelError> {
    let channel = dialer.dial(remote).await?;
    debug!("Opened stream for tunnel to {}", remote);

    let sent = Arc::clone(stats);
    let received = Arc::clone(stats);
    let outcome = relay_streams(
        local,
        channel,
        FORWARD_IDLE_TIMEOUT,
        move |n| sent.write().bytes_sent += n,
        move |n| received.write().bytes_received += n,
    )
    .await;

    match outcome {
        Ok((up, down)) => debug!("Tunnel connection closed ({} bytes up, {} down)", up, down),
        Err(e) => debug!("Tunnel connection aborted: {}", e),
    }
    Ok(())
}

/// Relay bytes between `a` and `b` until both directions end.
///
/// End of stream on one side shuts down writing on the other. An error in
/// either direction aborts both, as does `idle_timeout` passing with no bytes
/// moved in any direction. Returns bytes moved a -> b and b -> a.
pub async fn relay_streams<A, B, FA, FB>(
    a: A,
    b: B,
    idle_timeout: Duration,
    on_a_to_b: FA,
    on_b_to_a: FB,
) -> io::Result<(u64, u64)>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
    FA: Fn(u64),
    FB: Fn(u64),
{
    let (mut a_read, mut a_write) = tokio::io::split(a);
    let (mut b_read, mut b_write) = tokio::io::split(b);
    let (abort_tx, abort_rx) = watch::channel(false);
    let activity = Activity::new();

    let a_to_b = pump(
        &mut a_read,
        &mut b_write,
        idle_timeout,
        &activity,
        abort_rx.clone(),
        &abort_tx,
        on_a_to_b,
    );
    let b_to_a = pump(
        &mut b_read,
        &mut a_write,
        idle_timeout,
        &activity,
        abort_rx,
        &abort_tx,
        on_b_to_a,
    );

    let (up, down) = tokio::join!(a_to_b, b_to_a);
    Ok((up?, down?))
}

/// Last time either direction of a relay moved bytes
struct Activity {
    origin: Instant,
    last_ms: AtomicU64,
}

impl Activity {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        let now = self.origin.elapsed().as_millis() as u64;
        self.last_ms.fetch_max(now, Ordering::Relaxed);
    }

    fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_ms.load(Ordering::Relaxed));
        self.origin.elapsed().saturating_sub(last)
    }
}

async fn pump<R, W, F>(
    reader: &mut R,
    writer: &mut W,
    idle_timeout: Duration,
    activity: &Activity,
    mut abort: watch::Receiver<bool>,
    abort_tx: &watch::Sender<bool>,
    on_bytes: F,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    F: Fn(u64),
{
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    let mut total = 0u64;

    let fail = |e: io::Error| {
        let _ = abort_tx.send(true);
        e
    };

    loop {
        // The deadline moves whenever either direction makes progress.
        let idle_for = activity.idle_for();
        if idle_for >= idle_timeout {
            debug!("Relay idle for {}s, closing", idle_for.as_secs());
            return Err(fail(io::Error::new(io::ErrorKind::TimedOut, "relay idle timeout")));
        }

        let n = tokio::select! {
            _ = abort.changed() => {
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionAborted,
                    "opposite direction failed",
                ));
            }
            _ = tokio::time::sleep(idle_timeout - idle_for) => continue,
            read = reader.read(&mut buf) => read.map_err(fail)?,
        };

        if n == 0 {
            writer.shutdown().await.map_err(fail)?;
            return Ok(total);
        }

        activity.touch();
        writer.write_all(&buf[..n]).await.map_err(fail)?;
        activity.touch();
        total += n as u64;
        on_bytes(n as u64);
    }
}
