//! Tunnel forwarding module
//!
//! Local listeners (tcp or unix) whose connections are relayed to a target
//! reached through the SSH connection via `direct-tcpip` or
//! `direct-streamlocal` channels.

mod dialer;
mod error;
pub mod local;
mod setting;

pub use dialer::{BoxedStream, RelayStream, TunnelDialer};
pub use error::TunnelError;
pub use local::{
    relay_streams, ForwardStats, TunnelHandle, TunnelRelay, TunnelState, FORWARD_IDLE_TIMEOUT,
};
pub use setting::{ForwardingBinding, Network, TunnelSetting};
