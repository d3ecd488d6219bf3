use crate::error::{PushError, SessionError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Single remote operation derived from one change event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteOp {
    /// Run a shell command on the remote host.
    Exec { command: String },
    /// Overwrite `remote` with the full content of `local`.
    Push { local: PathBuf, remote: String },
}

/// Result of a remote shell command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: u32,
    pub output: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// An authenticated connection to one server.
///
/// Implementations keep at most one call in flight.
#[async_trait]
pub trait RemoteSession: Send + Sync + 'static {
    async fn execute(&self, command: &str) -> Result<CommandOutput, SessionError>;

    /// Per-file failures (unreadable local file, path refused by the server)
    /// are `PushError::Local`/`Remote`; the session stays usable after them.
    async fn push_file(&self, local: &Path, remote: &str) -> Result<(), PushError>;
}
