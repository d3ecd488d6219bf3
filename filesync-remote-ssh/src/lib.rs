//! SSH implementation of [`RemoteSession`]: commands run in one long-lived
//! remote shell, file content goes over the SFTP subsystem.

mod shell;
mod ssh_client;
mod transfer;

use async_trait::async_trait;
use filesync_core::{CommandOutput, LoginCmd, PushError, RemoteSession, SessionCfg, SessionError};
use russh::client::{self, AuthResult, Handle};
use russh::{Channel, ChannelMsg};
use russh_sftp::client::SftpSession;
use ssh_client::Client;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

struct Inner {
    // keeps the connection alive
    _handle: Handle<Client>,
    shell: Channel<client::Msg>,
    sftp: SftpSession,
    /// Number of the last command framed on the shell.
    seq: u64,
}

pub struct SshSession {
    addr: String,
    inner: Mutex<Inner>,
}

impl SshSession {
    /// Connect, authenticate with the configured password, open the shell and
    /// SFTP channels, then run the login commands.
    pub async fn connect(cfg: &SessionCfg) -> Result<Self, SessionError> {
        let addr = format!("{}:{}", cfg.addr, cfg.port);
        let config = client::Config {
            keepalive_interval: Some(Duration::from_secs(30)),
            ..Default::default()
        };
        let handler = Client {
            allowed_fingerprints: cfg.fingerprints.clone(),
        };
        let mut handle = client::connect(Arc::new(config), (cfg.addr.as_str(), cfg.port), handler)
            .await
            .map_err(|e| SessionError::Connect {
                addr: addr.clone(),
                reason: e.to_string(),
            })?;

        let res = handle
            .authenticate_password(&cfg.user, &cfg.pass)
            .await
            .map_err(|e| SessionError::Auth {
                user: cfg.user.clone(),
                reason: e.to_string(),
            })?;
        if let AuthResult::Failure {
            remaining_methods,
            partial_success,
        } = res
        {
            return Err(SessionError::Auth {
                user: cfg.user.clone(),
                reason: format!(
                    "remaining_methods: {:?}, partial_success: {}",
                    remaining_methods, partial_success
                ),
            });
        }

        let shell = handle.channel_open_session().await.map_err(channel_err)?;
        shell.request_shell(true).await.map_err(channel_err)?;

        let channel = handle.channel_open_session().await.map_err(channel_err)?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(channel_err)?;
        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(sftp_err)?;
        info!("connected to {addr} as {}", cfg.user);

        let session = Self {
            addr,
            inner: Mutex::new(Inner {
                _handle: handle,
                shell,
                sftp,
                seq: 0,
            }),
        };
        session.run_login_commands(&cfg.cmd).await?;
        Ok(session)
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn run_login_commands(&self, cmds: &[LoginCmd]) -> Result<(), SessionError> {
        for cmd in cmds {
            let out = self.execute(&cmd.cmd).await?;
            if !out.success() {
                warn!(
                    "{}: login command `{}` exited with {}: {}",
                    self.addr, cmd.cmd, out.status, out.output
                );
            }
            if cmd.sleep > 0 {
                tokio::time::sleep(Duration::from_millis(cmd.sleep)).await;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn execute(&self, command: &str) -> Result<CommandOutput, SessionError> {
        let mut inner = self.inner.lock().await;
        inner.seq += 1;
        let seq = inner.seq;
        debug!("{}: [{seq}] {}", self.addr, command);
        inner
            .shell
            .data(shell::wrap_command(seq, command).as_bytes())
            .await
            .map_err(channel_err)?;

        let mut reply = shell::Reply::new(seq);
        loop {
            match inner.shell.wait().await {
                Some(ChannelMsg::Data { data }) | Some(ChannelMsg::ExtendedData { data, .. }) => {
                    if let Some((status, output)) = reply.feed(&String::from_utf8_lossy(&data)) {
                        if !reply.stale().is_empty() {
                            debug!("{}: discarded late output: {}", self.addr, reply.stale());
                        }
                        return Ok(CommandOutput { status, output });
                    }
                }
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => {
                    return Err(SessionError::Channel(format!(
                        "{}: remote shell closed",
                        self.addr
                    )));
                }
                Some(_) => {}
            }
        }
    }

    async fn push_file(&self, local: &Path, remote: &str) -> Result<(), PushError> {
        let inner = self.inner.lock().await;
        debug!("{}: push {} -> {}", self.addr, local.display(), remote);
        let mut reader = tokio::fs::File::open(local)
            .await
            .map_err(|e| transfer::local_error(local, e))?;
        let mut remote_file = inner
            .sftp
            .create(remote)
            .await
            .map_err(|e| transfer::sftp_error(remote, e))?;
        let bytes = transfer::upload(local, &mut reader, &mut remote_file, remote).await?;
        debug!("{}: pushed {bytes} bytes to {remote}", self.addr);
        Ok(())
    }
}

fn channel_err(e: russh::Error) -> SessionError {
    SessionError::Channel(e.to_string())
}

fn sftp_err(e: russh_sftp::client::error::Error) -> SessionError {
    SessionError::Sftp(e.to_string())
}
