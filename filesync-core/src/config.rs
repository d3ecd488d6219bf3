use crate::error::ConfigError;
use crate::filter::PathFilter;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Separator used by every remote root and remote command path.
pub const REMOTE_SEPARATOR: char = '/';

/// Glob pattern (wrapper type for clarity)
/// Stored as plain String; compiled into a `globset::GlobSet` by `PathFilter`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pattern(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// How often the log file rolls over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogCycle {
    Minute,
    Hour,
    Day,
    Week,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogCfg {
    pub name: String,
    pub level: LogLevel,
    pub cycle: LogCycle,
    /// Number of rolled files to keep.
    pub backup: u32,
    /// Truncate the current log file at startup.
    #[serde(default)]
    pub clean_log: bool,
    /// Remove every earlier log file at startup.
    #[serde(default)]
    pub clean_file: bool,
}

/// Command run once on a fresh session, then wait `sleep` milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginCmd {
    pub cmd: String,
    #[serde(default)]
    pub sleep: u64,
}

/// One remote server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCfg {
    pub addr: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub cmd: Vec<LoginCmd>,
    /// Allowed host key fingerprints (OpenSSH SHA256) or base64 keys.
    #[serde(default)]
    pub fingerprints: Option<Vec<String>>,
}

/// One monitored local root mirrored onto a remote root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorCfg {
    /// Index into the `ssh` array.
    pub ssh: usize,
    pub localpath: String,
    pub remotepath: String,
    pub whitelist: Vec<Pattern>,
    pub blacklist: Vec<Pattern>,
    /// Mirror every existing file once before watching.
    #[serde(default)]
    pub initial_sync: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Limits {
    #[serde(default = "Limits::default_max")]
    pub max_sessions: usize,
    #[serde(default = "Limits::default_max")]
    pub max_monitors: usize,
    #[serde(default = "Limits::default_max")]
    pub max_commands: usize,
    #[serde(default = "Limits::default_max")]
    pub max_whitelist: usize,
    #[serde(default = "Limits::default_max")]
    pub max_blacklist: usize,
}

impl Limits {
    fn default_max() -> usize { 8 }
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_sessions: Self::default_max(),
            max_monitors: Self::default_max(),
            max_commands: Self::default_max(),
            max_whitelist: Self::default_max(),
            max_blacklist: Self::default_max(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolCfg {
    #[serde(default = "PoolCfg::default_capacity")]
    pub capacity: usize,
}

impl PoolCfg {
    fn default_capacity() -> usize { 1024 }
}

impl Default for PoolCfg {
    fn default() -> Self {
        Self { capacity: Self::default_capacity() }
    }
}

/// What a watcher does when the pool is exhausted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchCfg {
    #[serde(default = "WatchCfg::default_alloc_retries")]
    pub alloc_retries: u32,
    #[serde(default = "WatchCfg::default_alloc_backoff_ms")]
    pub alloc_backoff_ms: u64,
    /// How long the first half of a rename waits for its partner before it
    /// is treated as a move out of the tree.
    #[serde(default = "WatchCfg::default_rename_timeout_ms")]
    pub rename_timeout_ms: u64,
}

impl WatchCfg {
    fn default_alloc_retries() -> u32 { 3 }
    fn default_alloc_backoff_ms() -> u64 { 50 }
    fn default_rename_timeout_ms() -> u64 { 500 }
}

impl Default for WatchCfg {
    fn default() -> Self {
        Self {
            alloc_retries: Self::default_alloc_retries(),
            alloc_backoff_ms: Self::default_alloc_backoff_ms(),
            rename_timeout_ms: Self::default_rename_timeout_ms(),
        }
    }
}

/// Retry policy for failed remote operations. Zero retries by default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchCfg {
    #[serde(default)]
    pub retry_max: u32,
    /// Initial backoff in ms for retries (exponential)
    #[serde(default = "DispatchCfg::default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl DispatchCfg {
    fn default_retry_backoff_ms() -> u64 { 500 }
}

impl Default for DispatchCfg {
    fn default() -> Self {
        Self {
            retry_max: 0,
            retry_backoff_ms: Self::default_retry_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Yaml,
}

impl Format {
    /// Detect format by extension, defaulting to JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|s| s.to_str()) {
            Some("yaml") | Some("yml") => Format::Yaml,
            _ => Format::Json,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub log: LogCfg,
    pub ssh: Vec<SessionCfg>,
    pub monitor: Vec<MonitorCfg>,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub pool: PoolCfg,
    #[serde(default)]
    pub watch: WatchCfg,
    #[serde(default)]
    pub dispatch: DispatchCfg,
}

impl Config {
    /// Read, parse, validate and normalize a config file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, Format::from_path(path))
    }

    pub fn parse(text: &str, format: Format) -> Result<Self, ConfigError> {
        let mut cfg: Config = match format {
            Format::Json => {
                serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?
            }
            Format::Yaml => {
                serde_yaml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?
            }
        };
        cfg.validate()?;
        cfg.normalize();
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.log.name.trim().is_empty() {
            return Err(ConfigError::EmptyField { field: "log.name".into() });
        }
        if self.pool.capacity == 0 {
            return Err(ConfigError::EmptyField { field: "pool.capacity".into() });
        }
        if self.ssh.is_empty() {
            return Err(ConfigError::Empty("ssh"));
        }
        check_count("ssh", self.ssh.len(), self.limits.max_sessions)?;
        if self.monitor.is_empty() {
            return Err(ConfigError::Empty("monitor"));
        }
        check_count("monitor", self.monitor.len(), self.limits.max_monitors)?;

        for (i, ssh) in self.ssh.iter().enumerate() {
            if ssh.addr.trim().is_empty() {
                return Err(ConfigError::EmptyField { field: format!("ssh[{i}].addr") });
            }
            if ssh.user.trim().is_empty() {
                return Err(ConfigError::EmptyField { field: format!("ssh[{i}].user") });
            }
            check_count(&format!("ssh[{i}].cmd"), ssh.cmd.len(), self.limits.max_commands)?;
        }

        for (i, mnt) in self.monitor.iter().enumerate() {
            if mnt.ssh >= self.ssh.len() {
                return Err(ConfigError::SessionIndex {
                    monitor: i,
                    ssh: mnt.ssh,
                    count: self.ssh.len(),
                });
            }
            if mnt.localpath.trim().is_empty() {
                return Err(ConfigError::EmptyField { field: format!("monitor[{i}].localpath") });
            }
            if mnt.remotepath.trim().is_empty() {
                return Err(ConfigError::EmptyField { field: format!("monitor[{i}].remotepath") });
            }
            check_count(
                &format!("monitor[{i}].whitelist"),
                mnt.whitelist.len(),
                self.limits.max_whitelist,
            )?;
            check_count(
                &format!("monitor[{i}].blacklist"),
                mnt.blacklist.len(),
                self.limits.max_blacklist,
            )?;
            PathFilter::new(&mnt.whitelist, &mnt.blacklist).map_err(|e| ConfigError::Glob {
                field: format!("monitor[{i}]"),
                pattern: e.pattern,
                reason: e.reason,
            })?;
        }
        Ok(())
    }

    /// Append the missing trailing separator to every local and remote root.
    pub fn normalize(&mut self) {
        for mnt in &mut self.monitor {
            let sep = local_separator(&mnt.localpath);
            if !mnt.localpath.ends_with(sep) {
                mnt.localpath.push(sep);
            }
            if !mnt.remotepath.ends_with(REMOTE_SEPARATOR) {
                mnt.remotepath.push(REMOTE_SEPARATOR);
            }
        }
    }
}

/// Separator a local root is written with: backslash for Windows-style roots,
/// otherwise the platform separator.
pub fn local_separator(root: &str) -> char {
    if root.contains('\\') {
        '\\'
    } else {
        std::path::MAIN_SEPARATOR
    }
}

fn check_count(section: &str, count: usize, limit: usize) -> Result<(), ConfigError> {
    if count > limit {
        return Err(ConfigError::TooMany {
            section: section.to_string(),
            count,
            limit,
        });
    }
    Ok(())
}
