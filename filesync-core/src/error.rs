//! Error taxonomy of the sync pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Startup failures. Any of these aborts the process before the pipeline runs.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {path} failed: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("parse config failed: {0}")]
    Parse(String),

    #[error("config has no {0} entries")]
    Empty(&'static str),

    #[error("{section} count {count} exceeds limit {limit}")]
    TooMany {
        section: String,
        count: usize,
        limit: usize,
    },

    #[error("monitor[{monitor}].ssh = {ssh} is out of range (have {count} sessions)")]
    SessionIndex {
        monitor: usize,
        ssh: usize,
        count: usize,
    },

    #[error("{field} must not be empty")]
    EmptyField { field: String },

    #[error("invalid glob '{pattern}' in {field}: {reason}")]
    Glob {
        field: String,
        pattern: String,
        reason: String,
    },
}

/// Every slot of the event pool is checked out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("event pool exhausted ({capacity} slots in use)")]
pub struct PoolExhausted {
    pub capacity: usize,
}

/// Connection-level failure of a remote session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connect to {addr} failed: {reason}")]
    Connect { addr: String, reason: String },

    #[error("authentication as {user} failed: {reason}")]
    Auth { user: String, reason: String },

    #[error("channel error: {0}")]
    Channel(String),

    #[error("sftp error: {0}")]
    Sftp(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of a single dispatched operation. Logged, then the event is dropped.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("remote command `{command}` exited with status {status}: {output}")]
    RemoteCommand {
        command: String,
        status: u32,
        output: String,
    },

    #[error(transparent)]
    Push(PushError),

    #[error(transparent)]
    Session(SessionError),
}

impl From<SessionError> for DispatchError {
    fn from(e: SessionError) -> Self {
        DispatchError::Session(e)
    }
}

impl From<PushError> for DispatchError {
    fn from(e: PushError) -> Self {
        match e {
            PushError::Session(e) => DispatchError::Session(e),
            other => DispatchError::Push(other),
        }
    }
}

/// Failure of one file push. Only `Session` means the connection is gone.
#[derive(Debug, Error)]
pub enum PushError {
    #[error("read {path} failed: {source}")]
    Local {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("write {path} refused: {reason}")]
    Remote { path: String, reason: String },

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// A watcher could not be installed on a monitored root.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("failed to create watcher: {0}")]
    Create(#[from] notify::Error),

    #[error("failed to watch {path}: {source}")]
    Path {
        path: PathBuf,
        source: notify::Error,
    },
}
