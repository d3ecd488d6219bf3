//! Application context: everything the pipeline shares, built once at startup.

use crate::config::{Config, WatchCfg};
use crate::error::{ConfigError, WatchError};
use crate::monitor::MonitoredPath;
use crate::pool::EventPool;
use crate::queue::{event_queue, QueueReceiver, QueueSender};
use crate::watcher::{self, MonitorWatcher, Producer, SubmitError};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub struct AppContext {
    monitors: Arc<[MonitoredPath]>,
    pool: EventPool,
    sender: QueueSender,
    watch: WatchCfg,
}

impl AppContext {
    /// Build the context from a validated config. The receiver belongs to the
    /// dispatcher.
    pub fn new(cfg: &Config) -> Result<(Self, QueueReceiver), ConfigError> {
        let monitors = cfg
            .monitor
            .iter()
            .enumerate()
            .map(|(id, m)| MonitoredPath::from_config(id, m))
            .collect::<Result<Vec<_>, _>>()?;
        let pool = EventPool::new(cfg.pool.capacity);
        let (sender, receiver) = event_queue();
        info!(
            monitors = monitors.len(),
            pool = cfg.pool.capacity,
            "pipeline context ready"
        );
        Ok((
            Self {
                monitors: monitors.into(),
                pool,
                sender,
                watch: cfg.watch.clone(),
            },
            receiver,
        ))
    }

    pub fn monitors(&self) -> Arc<[MonitoredPath]> {
        self.monitors.clone()
    }

    pub fn pool(&self) -> &EventPool {
        &self.pool
    }

    pub fn producer(&self) -> Producer {
        Producer::new(self.pool.clone(), self.sender.clone(), &self.watch)
    }

    /// Install one watcher per monitored path. Dropping the guards stops them.
    pub fn start_watchers(&self) -> Result<Vec<MonitorWatcher>, WatchError> {
        let rename_timeout = Duration::from_millis(self.watch.rename_timeout_ms);
        self.monitors
            .iter()
            .map(|m| watcher::watch(m, self.producer(), rename_timeout))
            .collect()
    }

    /// Queue the current content of every monitor flagged for initial sync.
    /// Blocks while the pool is full, so run it off the async runtime.
    pub fn initial_sync(&self) -> Result<usize, SubmitError> {
        let producer = self.producer();
        let mut total = 0;
        for m in self.monitors.iter().filter(|m| m.initial_sync) {
            total += watcher::initial_scan(m, &producer)?;
        }
        Ok(total)
    }

    /// Release the context's own queue handle; the queue closes once every
    /// watcher is gone too.
    pub fn close(self) {
        drop(self.sender);
    }
}
