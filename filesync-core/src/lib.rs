//! Core library for filesync – one-way local-to-remote mirroring pipeline.
//!
//! Watchers allocate change events from a fixed pool and push them onto an
//! ordered queue; a single dispatcher turns each event into one remote
//! operation on the session bound to its monitored path.

mod config;
mod context;
mod dispatcher;
mod error;
mod event;
mod filter;
mod monitor;
mod pool;
mod queue;
mod remote;
mod watcher;

pub use config::{
    local_separator, Config, DispatchCfg, Format, Limits, LogCfg, LogCycle, LogLevel, LoginCmd,
    MonitorCfg, Pattern, PoolCfg, SessionCfg, WatchCfg, REMOTE_SEPARATOR,
};
pub use context::AppContext;
pub use dispatcher::{plan, remote_path, DispatchStats, Dispatcher};
pub use error::{ConfigError, DispatchError, PoolExhausted, PushError, SessionError, WatchError};
pub use event::{ChangeEvent, Command, ObjectKind};
pub use filter::{GlobError, PathFilter};
pub use monitor::MonitoredPath;
pub use pool::{EventPool, PooledEvent};
pub use queue::{event_queue, QueueClosed, QueueReceiver, QueueSender};
pub use remote::{CommandOutput, RemoteOp, RemoteSession};
pub use watcher::{initial_scan, watch, Classifier, EventDraft, MonitorWatcher, Producer, SubmitError};
