//! Shell and exec sessions over an [`SshConnection`]

use russh::ChannelMsg;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use super::connection::SshConnection;
use super::error::SshError;

/// Terminal geometry and type requested for an interactive PTY
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyRequest {
    pub term: String,
    pub cols: u32,
    pub rows: u32,
}

/// Execute `command` and stream its stdout into `sink`.
///
/// Stderr is logged. A non-zero exit status is returned as
/// [`SshError::CommandFailed`] after all output has been written.
pub async fn run_command<W>(
    conn: &SshConnection,
    command: &str,
    sink: &mut W,
) -> Result<(), SshError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut channel = conn.open_session_channel().await?;
    channel
        .exec(true, command)
        .await
        .map_err(|e| SshError::ChannelError(format!("exec request failed: {}", e)))?;

    debug!("Running `{}` on {}", command, conn.host());

    let mut exit_status = None;
    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { data } => {
                sink.write_all(&data).await?;
            }
            ChannelMsg::ExtendedData { data, ext } => {
                if ext == 1 {
                    warn!("{}: {}", command, String::from_utf8_lossy(&data).trim_end());
                }
            }
            ChannelMsg::ExitStatus { exit_status: status } => {
                exit_status = Some(status);
            }
            ChannelMsg::Eof => {
                debug!("Remote command `{}` sent EOF", command);
            }
            ChannelMsg::Close => break,
            _ => {}
        }
    }
    sink.flush().await?;

    match exit_status {
        Some(0) => Ok(()),
        Some(status) => Err(SshError::CommandFailed {
            command: command.to_string(),
            status,
        }),
        None => {
            debug!("Remote command `{}` closed without exit status", command);
            Ok(())
        }
    }
}

/// Start a PTY shell and relay `input` to it and its output to `output`
/// until the remote side closes. Returns the exit status if one was sent.
pub async fn relay_shell<R, W>(
    conn: &SshConnection,
    pty: &PtyRequest,
    mut input: R,
    mut output: W,
) -> Result<Option<u32>, SshError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut channel = conn.open_session_channel().await?;

    channel
        .request_pty(false, &pty.term, pty.cols, pty.rows, 0, 0, &[])
        .await
        .map_err(|e| SshError::ChannelError(format!("PTY request failed: {}", e)))?;
    debug!("PTY allocated ({} {}x{}), requesting shell", pty.term, pty.cols, pty.rows);

    channel
        .request_shell(false)
        .await
        .map_err(|e| SshError::ChannelError(format!("Shell request failed: {}", e)))?;

    info!("Interactive shell started on {}", conn.host());

    let mut buf = vec![0u8; 8192];
    let mut input_open = true;
    let mut exit_status = None;

    loop {
        tokio::select! {
            read = input.read(&mut buf), if input_open => {
                match read? {
                    0 => {
                        input_open = false;
                        let _ = channel.eof().await;
                    }
                    n => {
                        channel
                            .data(&buf[..n])
                            .await
                            .map_err(|e| SshError::ChannelError(e.to_string()))?;
                    }
                }
            }

            msg = channel.wait() => {
                match msg {
                    Some(ChannelMsg::Data { data }) => {
                        output.write_all(&data).await?;
                        output.flush().await?;
                    }
                    Some(ChannelMsg::ExtendedData { data, ext: 1 }) => {
                        output.write_all(&data).await?;
                        output.flush().await?;
                    }
                    Some(ChannelMsg::ExitStatus { exit_status: status }) => {
                        info!("Shell exited with status {}", status);
                        exit_status = Some(status);
                    }
                    Some(ChannelMsg::Eof) => {
                        debug!("Shell sent EOF");
                    }
                    Some(ChannelMsg::Close) | None => break,
                    Some(_) => {}
                }
            }
        }
    }

    info!("Interactive shell on {} closed", conn.host());
    Ok(exit_status)
}

/// Interactive login on the process's own stdin/stdout.
///
/// Raw-mode handling of the local terminal is left to the caller.
pub async fn interactive_shell(
    conn: &SshConnection,
    pty: &PtyRequest,
) -> Result<Option<u32>, SshError> {
    relay_shell(conn, pty, tokio::io::stdin(), tokio::io::stdout()).await
}
