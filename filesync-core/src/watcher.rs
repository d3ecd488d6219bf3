//! Filesystem watchers: one per monitored root.
//!
//! Raw `notify` events are turned into drafts, filtered by the monitor's
//! whitelist/blacklist, copied into pooled records and pushed onto the queue.

use crate::config::WatchCfg;
use crate::error::{PoolExhausted, WatchError};
use crate::event::{Command, ObjectKind};
use crate::monitor::MonitoredPath;
use crate::pool::{EventPool, PooledEvent};
use crate::queue::{QueueClosed, QueueSender};
use notify::{
    event::{CreateKind, ModifyKind, RemoveKind, RenameMode},
    Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// An event before it is copied into a pool slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDraft {
    pub object_kind: ObjectKind,
    pub command: Command,
    pub object_name: String,
    pub object_old_name: Option<String>,
}

impl EventDraft {
    fn new(object_kind: ObjectKind, command: Command, object_name: String) -> Self {
        Self {
            object_kind,
            command,
            object_name,
            object_old_name: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    PoolExhausted(#[from] PoolExhausted),
    #[error(transparent)]
    QueueClosed(#[from] QueueClosed),
}

/// Allocates from the pool and pushes onto the queue on behalf of a watcher.
#[derive(Clone)]
pub struct Producer {
    pool: EventPool,
    sender: QueueSender,
    retries: u32,
    backoff: Duration,
}

impl Producer {
    pub fn new(pool: EventPool, sender: QueueSender, cfg: &WatchCfg) -> Self {
        Self {
            pool,
            sender,
            retries: cfg.alloc_retries,
            backoff: Duration::from_millis(cfg.alloc_backoff_ms),
        }
    }

    /// Submit a draft, giving up after the configured allocation retries.
    pub fn submit(&self, monitor_id: usize, draft: &EventDraft) -> Result<(), SubmitError> {
        let mut slot = self.allocate(Some(self.retries))?;
        fill(&mut slot, monitor_id, draft);
        self.sender.push(slot)?;
        Ok(())
    }

    /// Submit a draft, waiting as long as it takes for a free slot.
    pub fn submit_patiently(&self, monitor_id: usize, draft: &EventDraft) -> Result<(), SubmitError> {
        let mut slot = self.allocate(None)?;
        fill(&mut slot, monitor_id, draft);
        self.sender.push(slot)?;
        Ok(())
    }

    fn allocate(&self, retries: Option<u32>) -> Result<PooledEvent, SubmitError> {
        let mut attempt: u32 = 0;
        loop {
            match self.pool.allocate() {
                Ok(slot) => return Ok(slot),
                Err(e) => {
                    if self.sender.is_closed() {
                        return Err(QueueClosed.into());
                    }
                    if retries.is_some_and(|max| attempt >= max) {
                        return Err(e.into());
                    }
                    attempt += 1;
                    std::thread::sleep(self.backoff);
                }
            }
        }
    }
}

fn fill(slot: &mut PooledEvent, monitor_id: usize, draft: &EventDraft) {
    slot.fill(
        monitor_id,
        draft.object_kind,
        draft.command,
        &draft.object_name,
        draft.object_old_name.as_deref(),
    );
}

/// Turns `notify` events of one monitor into drafts.
///
/// Rename halves are paired: a `From` is held back until the matching `To`
/// (or `Both`) arrives. An unpaired `From` becomes a delete as soon as any
/// other event shows up, or once it is older than the rename timeout.
pub struct Classifier {
    monitor: MonitoredPath,
    pending_from: Option<PendingFrom>,
    last_paired: Option<usize>,
}

struct PendingFrom {
    path: PathBuf,
    tracker: Option<usize>,
    since: Instant,
}

impl Classifier {
    pub fn new(monitor: MonitoredPath) -> Self {
        Self {
            monitor,
            pending_from: None,
            last_paired: None,
        }
    }

    pub fn feed(&mut self, event: &Event) -> Vec<EventDraft> {
        let mut out = Vec::new();
        let tracker = event.tracker();
        match event.kind {
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                self.flush_into(&mut out);
                if let Some(path) = event.paths.first() {
                    self.pending_from = Some(PendingFrom {
                        path: path.clone(),
                        tracker,
                        since: Instant::now(),
                    });
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                if let Some(to) = event.paths.first() {
                    match self.pending_from.take() {
                        Some(from) if from.tracker == tracker => {
                            self.last_paired = tracker;
                            self.rename(&from.path, to, &mut out);
                        }
                        pending => {
                            self.pending_from = pending;
                            self.flush_into(&mut out);
                            self.created(to, None, &mut out);
                        }
                    }
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => {
                if tracker.is_some() && tracker == self.last_paired {
                    // already emitted when the `To` half arrived
                    self.last_paired = None;
                } else {
                    if self.pending_from.as_ref().map(|p| &p.path) == Some(&event.paths[0]) {
                        self.pending_from = None;
                    }
                    self.flush_into(&mut out);
                    self.rename(&event.paths[0], &event.paths[1], &mut out);
                }
            }
            _ => {
                self.flush_into(&mut out);
                for path in &event.paths {
                    self.classify(&event.kind, path, &mut out);
                }
            }
        }
        out.retain(|d| self.passes(d));
        out
    }

    /// Emit the held-back `From` half as a delete.
    pub fn flush(&mut self) -> Vec<EventDraft> {
        let mut out = Vec::new();
        self.flush_into(&mut out);
        out.retain(|d| self.passes(d));
        out
    }

    /// Emit the held-back `From` half as a delete if it has waited at least
    /// `max_age` by `now`.
    pub fn flush_expired(&mut self, now: Instant, max_age: Duration) -> Vec<EventDraft> {
        let expired = self
            .pending_from
            .as_ref()
            .is_some_and(|p| now.saturating_duration_since(p.since) >= max_age);
        if expired {
            self.flush()
        } else {
            Vec::new()
        }
    }

    fn flush_into(&mut self, out: &mut Vec<EventDraft>) {
        if let Some(from) = self.pending_from.take() {
            if let Some(name) = self.monitor.object_name(&from.path) {
                out.push(EventDraft::new(ObjectKind::File, Command::Delete, name));
            }
        }
    }

    /// Renames are already filtered on both names by [`Self::rename`].
    fn passes(&self, draft: &EventDraft) -> bool {
        draft.command == Command::Rename || self.monitor.accepts(&draft.object_name)
    }

    fn classify(&self, kind: &EventKind, path: &Path, out: &mut Vec<EventDraft>) {
        match kind {
            EventKind::Create(CreateKind::Folder) => {
                self.created(path, Some(ObjectKind::Directory), out);
            }
            EventKind::Create(CreateKind::File) => {
                self.created(path, Some(ObjectKind::File), out);
            }
            EventKind::Create(_) => self.created(path, None, out),
            EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) => {
                if kind_of(path) == Some(ObjectKind::File) {
                    if let Some(name) = self.monitor.object_name(path) {
                        out.push(EventDraft::new(ObjectKind::File, Command::Modify, name));
                    }
                }
            }
            EventKind::Modify(ModifyKind::Name(_)) => {
                // a lone rename half without pairing information
                if path.exists() {
                    self.created(path, None, out);
                } else if let Some(name) = self.monitor.object_name(path) {
                    out.push(EventDraft::new(ObjectKind::File, Command::Delete, name));
                }
            }
            EventKind::Remove(kind) => {
                if let Some(name) = self.monitor.object_name(path) {
                    let object_kind = match kind {
                        RemoveKind::Folder => ObjectKind::Directory,
                        _ => ObjectKind::File,
                    };
                    out.push(EventDraft::new(object_kind, Command::Delete, name));
                }
            }
            _ => {}
        }
    }

    /// A new object appeared. Files that already hold data also get a modify
    /// so their content reaches the remote side.
    fn created(&self, path: &Path, kind: Option<ObjectKind>, out: &mut Vec<EventDraft>) {
        let Some(name) = self.monitor.object_name(path) else {
            return;
        };
        let kind = kind.or_else(|| kind_of(path)).unwrap_or(ObjectKind::File);
        out.push(EventDraft::new(kind, Command::Create, name.clone()));
        if kind == ObjectKind::File && has_content(path) {
            out.push(EventDraft::new(ObjectKind::File, Command::Modify, name));
        }
    }

    /// A rename the remote side can follow only when both names are synced.
    /// Moving out of the filter is a delete, moving into it a create.
    fn rename(&self, from: &Path, to: &Path, out: &mut Vec<EventDraft>) {
        let synced = |name: Option<String>| name.filter(|n| self.monitor.accepts(n));
        match (synced(self.monitor.object_name(from)), synced(self.monitor.object_name(to))) {
            (Some(old), Some(new)) => {
                out.push(EventDraft {
                    object_kind: kind_of(to).unwrap_or(ObjectKind::File),
                    command: Command::Rename,
                    object_name: new,
                    object_old_name: Some(old),
                });
            }
            (Some(old), None) => {
                out.push(EventDraft::new(ObjectKind::File, Command::Delete, old));
            }
            (None, Some(_)) => self.created(to, None, out),
            (None, None) => {}
        }
    }
}

fn kind_of(path: &Path) -> Option<ObjectKind> {
    let meta = std::fs::metadata(path).ok()?;
    Some(if meta.is_dir() {
        ObjectKind::Directory
    } else {
        ObjectKind::File
    })
}

fn has_content(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.is_file() && m.len() > 0).unwrap_or(false)
}

/// A running watcher. Dropping it stops watching.
pub struct MonitorWatcher {
    monitor_id: usize,
    _watcher: RecommendedWatcher,
    // dropping the sender ends the rename timer thread
    _stop: mpsc::Sender<()>,
}

impl MonitorWatcher {
    pub fn monitor_id(&self) -> usize {
        self.monitor_id
    }
}

/// Watch a monitored root recursively, feeding the queue through `producer`.
/// An unpaired rename half is flushed as a delete after `rename_timeout`.
pub fn watch(
    monitor: &MonitoredPath,
    producer: Producer,
    rename_timeout: Duration,
) -> Result<MonitorWatcher, WatchError> {
    let monitor_id = monitor.id;
    let root = monitor.local_dir().to_path_buf();
    let classifier = Arc::new(Mutex::new(Classifier::new(monitor.clone())));

    let callback_classifier = classifier.clone();
    let callback_producer = producer.clone();
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let drafts = lock(&callback_classifier).feed(&event);
                submit_all(&callback_producer, monitor_id, &drafts);
            }
            Err(e) => warn!(monitor_id, "watch error: {e}"),
        },
        notify::Config::default(),
    )?;
    watcher
        .watch(&root, RecursiveMode::Recursive)
        .map_err(|source| WatchError::Path {
            path: root.clone(),
            source,
        })?;
    let stop = spawn_rename_timer(classifier, producer, monitor_id, rename_timeout);
    info!(monitor_id, "watching {}", root.display());
    Ok(MonitorWatcher {
        monitor_id,
        _watcher: watcher,
        _stop: stop,
    })
}

fn lock(classifier: &Mutex<Classifier>) -> MutexGuard<'_, Classifier> {
    classifier.lock().unwrap_or_else(PoisonError::into_inner)
}

fn submit_all(producer: &Producer, monitor_id: usize, drafts: &[EventDraft]) {
    for draft in drafts {
        debug!(monitor_id, ?draft, "change");
        if let Err(e) = producer.submit(monitor_id, draft) {
            warn!(monitor_id, ?draft, "change dropped: {e}");
        }
    }
}

/// Periodically turn a `From` half that never found its partner into a
/// delete. The thread exits when the returned sender is dropped.
fn spawn_rename_timer(
    classifier: Arc<Mutex<Classifier>>,
    producer: Producer,
    monitor_id: usize,
    timeout: Duration,
) -> mpsc::Sender<()> {
    let (stop, stopped) = mpsc::channel::<()>();
    let tick = (timeout / 2).max(Duration::from_millis(10));
    std::thread::spawn(move || loop {
        match stopped.recv_timeout(tick) {
            Err(RecvTimeoutError::Timeout) => {
                let drafts = lock(&classifier).flush_expired(Instant::now(), timeout);
                submit_all(&producer, monitor_id, &drafts);
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    });
    stop
}

/// Queue every existing directory and file under the root so the remote side
/// starts out mirrored. Returns the number of events queued.
pub fn initial_scan(monitor: &MonitoredPath, producer: &Producer) -> Result<usize, SubmitError> {
    let mut queued = 0;
    for entry in WalkDir::new(monitor.local_dir())
        .min_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let Some(name) = monitor.object_name(entry.path()) else {
            continue;
        };
        if !monitor.accepts(&name) {
            continue;
        }
        let draft = if entry.file_type().is_dir() {
            EventDraft::new(ObjectKind::Directory, Command::Create, name)
        } else if entry.file_type().is_file() {
            EventDraft::new(ObjectKind::File, Command::Modify, name)
        } else {
            continue;
        };
        producer.submit_patiently(monitor.id, &draft)?;
        queued += 1;
    }
    info!(monitor_id = monitor.id, queued, "initial scan done");
    Ok(queued)
}
