//! File content upload and the split between per-file and connection errors.

use filesync_core::{PushError, SessionError};
use russh_sftp::client::error::Error as SftpError;
use russh_sftp::protocol::StatusCode;
use std::io;
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const CHUNK: usize = 32 * 1024;

/// Copy `reader` into the already opened remote file and close it.
pub(crate) async fn upload<R, W>(
    local: &Path,
    reader: &mut R,
    writer: &mut W,
    remote: &str,
) -> Result<u64, PushError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; CHUNK];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await.map_err(|e| local_error(local, e))?;
        if n == 0 {
            break;
        }
        writer
            .write_all(&buf[..n])
            .await
            .map_err(|e| write_error(remote, e))?;
        total += n as u64;
    }
    writer.shutdown().await.map_err(|e| write_error(remote, e))?;
    Ok(total)
}

pub(crate) fn local_error(local: &Path, source: io::Error) -> PushError {
    PushError::Local {
        path: local.to_path_buf(),
        source,
    }
}

/// A status reply concerns the one path; anything else means the SFTP
/// channel itself is unusable.
pub(crate) fn sftp_error(remote: &str, e: SftpError) -> PushError {
    match e {
        SftpError::Status(status)
            if !matches!(
                status.status_code,
                StatusCode::NoConnection | StatusCode::ConnectionLost
            ) =>
        {
            PushError::Remote {
                path: remote.to_string(),
                reason: format!("{:?}: {}", status.status_code, status.error_message),
            }
        }
        other => SessionError::Sftp(other.to_string()).into(),
    }
}

/// Write errors that signal a dead transport take the session down; the
/// rest are refusals for this file.
pub(crate) fn write_error(remote: &str, e: io::Error) -> PushError {
    match e.kind() {
        io::ErrorKind::BrokenPipe
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected
        | io::ErrorKind::UnexpectedEof
        | io::ErrorKind::TimedOut => SessionError::Io(e).into(),
        _ => PushError::Remote {
            path: remote.to_string(),
            reason: e.to_string(),
        },
    }
}
