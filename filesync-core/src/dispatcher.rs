//! Single consumer of the event queue.
//!
//! Each event becomes exactly one remote operation on the session bound to
//! its monitor. Operations run strictly one after another, across every
//! session, and a failed operation is logged and dropped so the queue keeps
//! draining.

use crate::config::{DispatchCfg, REMOTE_SEPARATOR};
use crate::error::DispatchError;
use crate::event::{ChangeEvent, Command, ObjectKind};
use crate::monitor::MonitoredPath;
use crate::pool::PooledEvent;
use crate::queue::QueueReceiver;
use crate::remote::{RemoteOp, RemoteSession};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Operations that completed successfully.
    pub executed: u64,
    /// Operations that failed after all attempts.
    pub failed: u64,
    /// Events that produced no remote call.
    pub skipped: u64,
}

pub struct Dispatcher {
    monitors: Arc<[MonitoredPath]>,
    sessions: Vec<Arc<dyn RemoteSession>>,
    session_down: Vec<bool>,
    policy: DispatchCfg,
    stats: DispatchStats,
}

impl Dispatcher {
    /// `sessions` is indexed by `MonitoredPath::session_id`.
    pub fn new(
        monitors: Arc<[MonitoredPath]>,
        sessions: Vec<Arc<dyn RemoteSession>>,
        policy: DispatchCfg,
    ) -> Self {
        let session_down = vec![false; sessions.len()];
        Self {
            monitors,
            sessions,
            session_down,
            policy,
            stats: DispatchStats::default(),
        }
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Drain the queue until every producer is gone.
    pub async fn run(mut self, mut queue: QueueReceiver) -> DispatchStats {
        info!("dispatcher started");
        while let Some(event) = queue.recv().await {
            self.dispatch(event).await;
        }
        info!(
            executed = self.stats.executed,
            failed = self.stats.failed,
            skipped = self.stats.skipped,
            "dispatcher stopped"
        );
        self.stats
    }

    /// Execute the remote effect of one event, then release it to the pool.
    pub async fn dispatch(&mut self, event: PooledEvent) {
        let Some(monitor) = self.monitors.get(event.monitor_id) else {
            warn!(monitor_id = event.monitor_id, "event for unknown monitor dropped");
            self.stats.skipped += 1;
            return;
        };
        let session_id = monitor.session_id;
        debug!(ssh_id = session_id, "{}", *event);

        let Some(op) = plan(monitor, &event) else {
            self.stats.skipped += 1;
            return;
        };
        // the slot is no longer needed once the operation is planned
        drop(event);

        let session = match self.sessions.get(session_id) {
            Some(s) if !self.session_down[session_id] => s.clone(),
            Some(_) => {
                warn!(ssh_id = session_id, ?op, "session is down, operation dropped");
                self.stats.skipped += 1;
                return;
            }
            None => {
                warn!(ssh_id = session_id, ?op, "no such session, operation dropped");
                self.stats.skipped += 1;
                return;
            }
        };

        match self.execute_with_retry(session.as_ref(), &op).await {
            Ok(()) => self.stats.executed += 1,
            Err(DispatchError::Session(e)) => {
                error!(ssh_id = session_id, ?op, "session failed: {e}");
                self.session_down[session_id] = true;
                self.stats.failed += 1;
            }
            Err(e) => {
                error!(ssh_id = session_id, "{e}");
                self.stats.failed += 1;
            }
        }
    }

    async fn execute_with_retry(
        &self,
        session: &dyn RemoteSession,
        op: &RemoteOp,
    ) -> Result<(), DispatchError> {
        let mut attempt: u32 = 0;
        let mut backoff = self.policy.retry_backoff_ms;
        loop {
            match execute(session, op).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    attempt += 1;
                    if attempt > self.policy.retry_max {
                        return Err(e);
                    }
                    warn!(attempt, ?op, "remote operation failed, retrying in {backoff}ms: {e}");
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                    backoff = backoff.saturating_mul(2);
                }
            }
        }
    }
}

async fn execute(session: &dyn RemoteSession, op: &RemoteOp) -> Result<(), DispatchError> {
    match op {
        RemoteOp::Exec { command } => {
            let out = session.execute(command).await?;
            if !out.success() {
                return Err(DispatchError::RemoteCommand {
                    command: command.clone(),
                    status: out.status,
                    output: out.output,
                });
            }
            Ok(())
        }
        RemoteOp::Push { local, remote } => {
            session.push_file(local, remote).await?;
            Ok(())
        }
    }
}

/// Map an event onto the remote operation that mirrors it.
///
/// Returns `None` for events with no remote effect (directory modify).
pub fn plan(monitor: &MonitoredPath, event: &ChangeEvent) -> Option<RemoteOp> {
    let root = &monitor.remote_root;
    let name = &event.object_name;
    let command = match (event.command, event.object_kind) {
        (Command::Create, ObjectKind::Directory) => {
            format!("mkdir -p {}", quote(&format!("{root}{name}")))
        }
        (Command::Create, ObjectKind::File) => {
            format!(": > {}", quote(&format!("{root}{name}")))
        }
        (Command::Delete, _) => {
            format!("rm -rf {}", quote(&format!("{root}{name}")))
        }
        (Command::Rename, _) => format!(
            "mv -f {} {}",
            quote(&format!("{root}{}", event.object_old_name)),
            quote(&format!("{root}{name}"))
        ),
        (Command::Modify, ObjectKind::File) => {
            return Some(RemoteOp::Push {
                local: monitor.local_path(name),
                remote: remote_path(root, name),
            });
        }
        (Command::Modify, ObjectKind::Directory) => return None,
    };
    Some(RemoteOp::Exec {
        command: to_remote_separators(command),
    })
}

/// Remote location of an object: root and name joined, then separators rewritten.
pub fn remote_path(remote_root: &str, object_name: &str) -> String {
    to_remote_separators(format!("{remote_root}{object_name}"))
}

/// Rewrite local separators in an already substituted string.
fn to_remote_separators(s: String) -> String {
    if s.contains('\\') {
        s.replace('\\', &REMOTE_SEPARATOR.to_string())
    } else {
        s
    }
}

/// Single-quote an argument for a POSIX shell. Embedded quotes become
/// `'"'"'` so the result never contains a backslash.
fn quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r#"'"'"'"#))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MonitorCfg, Pattern};
    use crate::error::{PushError, SessionError};
    use crate::pool::EventPool;
    use crate::queue::event_queue;
    use crate::remote::CommandOutput;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Exec(String),
        Push(PathBuf, String),
    }

    enum Reply {
        Status(u32),
        Broken,
        /// The local file was gone by the time the push ran.
        LocalGone,
    }

    /// Records every call; replies come from a script, then default to success.
    struct RecordingSession {
        calls: Mutex<Vec<Call>>,
        replies: Mutex<VecDeque<Reply>>,
    }

    impl RecordingSession {
        fn scripted(replies: Vec<Reply>) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(vec![]),
                replies: Mutex::new(replies.into()),
            })
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn next_reply(&self) -> Option<Reply> {
            self.replies.lock().unwrap().pop_front()
        }
    }

    #[async_trait]
    impl RemoteSession for RecordingSession {
        async fn execute(&self, command: &str) -> Result<CommandOutput, SessionError> {
            self.calls.lock().unwrap().push(Call::Exec(command.to_string()));
            let status = match self.next_reply() {
                Some(Reply::Status(s)) => s,
                Some(Reply::Broken) => return Err(SessionError::Channel("broken pipe".into())),
                Some(Reply::LocalGone) | None => 0,
            };
            Ok(CommandOutput {
                status,
                output: String::new(),
            })
        }

        async fn push_file(&self, local: &Path, remote: &str) -> Result<(), PushError> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Push(local.to_path_buf(), remote.to_string()));
            match self.next_reply() {
                Some(Reply::Status(0)) | None => Ok(()),
                Some(Reply::Status(s)) => Err(PushError::Remote {
                    path: remote.to_string(),
                    reason: format!("status {s}"),
                }),
                Some(Reply::Broken) => Err(SessionError::Channel("broken pipe".into()).into()),
                Some(Reply::LocalGone) => {
                    let source = tokio::fs::File::open(local).await.err().unwrap_or_else(|| {
                        std::io::Error::new(std::io::ErrorKind::NotFound, "gone")
                    });
                    Err(PushError::Local {
                        path: local.to_path_buf(),
                        source,
                    })
                }
            }
        }
    }

    fn monitor(id: usize, local: &str, remote: &str, ssh: usize) -> MonitoredPath {
        let cfg = MonitorCfg {
            ssh,
            localpath: local.into(),
            remotepath: remote.into(),
            whitelist: Vec::<Pattern>::new(),
            blacklist: vec![],
            initial_sync: false,
        };
        MonitoredPath::from_config(id, &cfg).unwrap()
    }

    fn event(
        pool: &EventPool,
        monitor_id: usize,
        kind: ObjectKind,
        cmd: Command,
        name: &str,
        old: Option<&str>,
    ) -> PooledEvent {
        let mut ev = pool.allocate().unwrap();
        ev.fill(monitor_id, kind, cmd, name, old);
        ev
    }

    fn dispatcher(
        monitors: Vec<MonitoredPath>,
        sessions: Vec<Arc<RecordingSession>>,
        policy: DispatchCfg,
    ) -> Dispatcher {
        let sessions = sessions
            .into_iter()
            .map(|s| s as Arc<dyn RemoteSession>)
            .collect();
        Dispatcher::new(monitors.into(), sessions, policy)
    }

    fn exec(cmd: &str) -> Call {
        Call::Exec(cmd.to_string())
    }

    #[test]
    fn test_path_translation() {
        assert_eq!(remote_path("/srv/app/", "a\\b\\c.txt"), "/srv/app/a/b/c.txt");
        assert_eq!(remote_path("/srv/app/", "a/b.txt"), "/srv/app/a/b.txt");
    }

    #[test]
    fn test_plan_command_mapping() {
        let m = monitor(0, "C:\\proj\\", "/srv/proj/", 0);
        let mut ev = ChangeEvent::default();

        ev.fill(0, ObjectKind::Directory, Command::Create, "src\\bin", None);
        assert_eq!(
            plan(&m, &ev),
            Some(RemoteOp::Exec { command: "mkdir -p '/srv/proj/src/bin'".into() })
        );

        ev.fill(0, ObjectKind::File, Command::Create, "a.txt", None);
        assert_eq!(
            plan(&m, &ev),
            Some(RemoteOp::Exec { command: ": > '/srv/proj/a.txt'".into() })
        );

        ev.fill(0, ObjectKind::Directory, Command::Delete, "old", None);
        assert_eq!(
            plan(&m, &ev),
            Some(RemoteOp::Exec { command: "rm -rf '/srv/proj/old'".into() })
        );

        ev.fill(0, ObjectKind::File, Command::Rename, "d\\new.txt", Some("d\\old.txt"));
        assert_eq!(
            plan(&m, &ev),
            Some(RemoteOp::Exec {
                command: "mv -f '/srv/proj/d/old.txt' '/srv/proj/d/new.txt'".into()
            })
        );

        ev.fill(0, ObjectKind::File, Command::Modify, "d\\a.txt", None);
        assert_eq!(
            plan(&m, &ev),
            Some(RemoteOp::Push {
                local: PathBuf::from("C:\\proj\\d\\a.txt"),
                remote: "/srv/proj/d/a.txt".into(),
            })
        );

        ev.fill(0, ObjectKind::Directory, Command::Modify, "d", None);
        assert_eq!(plan(&m, &ev), None);
    }

    #[test]
    fn test_plan_quotes_awkward_names() {
        let m = monitor(0, "/data/", "/srv/", 0);
        let mut ev = ChangeEvent::default();
        ev.fill(0, ObjectKind::File, Command::Delete, "it's here.txt", None);
        assert_eq!(
            plan(&m, &ev),
            Some(RemoteOp::Exec { command: r#"rm -rf '/srv/it'"'"'s here.txt'"#.into() })
        );
    }

    #[tokio::test]
    async fn test_end_to_end_file_lifecycle() {
        let pool = EventPool::new(4);
        let session = RecordingSession::scripted(vec![]);
        let mut d = dispatcher(
            vec![monitor(0, "C:\\proj\\", "/srv/proj/", 0)],
            vec![session.clone()],
            DispatchCfg::default(),
        );

        d.dispatch(event(&pool, 0, ObjectKind::File, Command::Create, "a.txt", None)).await;
        d.dispatch(event(&pool, 0, ObjectKind::File, Command::Modify, "a.txt", None)).await;
        d.dispatch(event(&pool, 0, ObjectKind::File, Command::Delete, "a.txt", None)).await;

        assert_eq!(
            session.calls(),
            vec![
                exec(": > '/srv/proj/a.txt'"),
                Call::Push(PathBuf::from("C:\\proj\\a.txt"), "/srv/proj/a.txt".into()),
                exec("rm -rf '/srv/proj/a.txt'"),
            ]
        );
        assert_eq!(d.stats().executed, 3);
        assert_eq!(pool.in_use(), 0);
    }

    #[tokio::test]
    async fn test_create_rename_modify_keep_queue_order() {
        let pool = EventPool::new(8);
        let session = RecordingSession::scripted(vec![]);
        let d = dispatcher(
            vec![monitor(0, "/data/", "/srv/", 0)],
            vec![session.clone()],
            DispatchCfg::default(),
        );
        let (tx, rx) = event_queue();
        tx.push(event(&pool, 0, ObjectKind::File, Command::Create, "a.txt", None)).unwrap();
        tx.push(event(&pool, 0, ObjectKind::File, Command::Rename, "b.txt", Some("a.txt")))
            .unwrap();
        tx.push(event(&pool, 0, ObjectKind::File, Command::Modify, "b.txt", None)).unwrap();
        drop(tx);

        let stats = d.run(rx).await;
        assert_eq!(stats.executed, 3);
        assert_eq!(
            session.calls(),
            vec![
                exec(": > '/srv/a.txt'"),
                exec("mv -f '/srv/a.txt' '/srv/b.txt'"),
                Call::Push(PathBuf::from("/data/b.txt"), "/srv/b.txt".into()),
            ]
        );
        assert_eq!(pool.in_use(), 0);
    }

    #[tokio::test]
    async fn test_operations_serialize_across_sessions() {
        let pool = EventPool::new(8);
        let s0 = RecordingSession::scripted(vec![]);
        let s1 = RecordingSession::scripted(vec![]);
        let d = dispatcher(
            vec![monitor(0, "/a/", "/ra/", 0), monitor(1, "/b/", "/rb/", 1)],
            vec![s0.clone(), s1.clone()],
            DispatchCfg::default(),
        );
        let (tx, rx) = event_queue();
        tx.push(event(&pool, 1, ObjectKind::Directory, Command::Create, "x", None)).unwrap();
        tx.push(event(&pool, 0, ObjectKind::Directory, Command::Create, "y", None)).unwrap();
        tx.push(event(&pool, 1, ObjectKind::File, Command::Delete, "x", None)).unwrap();
        drop(tx);

        d.run(rx).await;
        assert_eq!(s0.calls(), vec![exec("mkdir -p '/ra/y'")]);
        assert_eq!(s1.calls(), vec![exec("mkdir -p '/rb/x'"), exec("rm -rf '/rb/x'")]);
    }

    #[tokio::test]
    async fn test_failed_command_dropped_without_retry() {
        let pool = EventPool::new(4);
        let session = RecordingSession::scripted(vec![Reply::Status(1)]);
        let mut d = dispatcher(
            vec![monitor(0, "/data/", "/srv/", 0)],
            vec![session.clone()],
            DispatchCfg::default(),
        );

        d.dispatch(event(&pool, 0, ObjectKind::File, Command::Create, "a", None)).await;
        d.dispatch(event(&pool, 0, ObjectKind::File, Command::Create, "b", None)).await;

        // one attempt for the failure, the next event still goes through
        assert_eq!(session.calls(), vec![exec(": > '/srv/a'"), exec(": > '/srv/b'")]);
        assert_eq!(d.stats(), DispatchStats { executed: 1, failed: 1, skipped: 0 });
        assert_eq!(pool.in_use(), 0);
    }

    #[tokio::test]
    async fn test_delete_of_missing_path_succeeds() {
        let pool = EventPool::new(1);
        // rm -rf exits 0 for missing paths
        let session = RecordingSession::scripted(vec![Reply::Status(0)]);
        let mut d = dispatcher(
            vec![monitor(0, "/data/", "/srv/", 0)],
            vec![session.clone()],
            DispatchCfg::default(),
        );
        d.dispatch(event(&pool, 0, ObjectKind::Directory, Command::Delete, "gone", None)).await;
        assert_eq!(d.stats().executed, 1);
        assert_eq!(d.stats().failed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_configured_retries() {
        let pool = EventPool::new(2);
        let session = RecordingSession::scripted(vec![Reply::Status(1), Reply::Status(1)]);
        let mut d = dispatcher(
            vec![monitor(0, "/data/", "/srv/", 0)],
            vec![session.clone()],
            DispatchCfg {
                retry_max: 2,
                retry_backoff_ms: 10,
            },
        );
        d.dispatch(event(&pool, 0, ObjectKind::File, Command::Create, "a", None)).await;
        assert_eq!(session.calls().len(), 3);
        assert_eq!(d.stats().executed, 1);

        let always_fails = RecordingSession::scripted(vec![
            Reply::Status(2),
            Reply::Status(2),
            Reply::Status(2),
        ]);
        let mut d = dispatcher(
            vec![monitor(0, "/data/", "/srv/", 0)],
            vec![always_fails.clone()],
            DispatchCfg {
                retry_max: 2,
                retry_backoff_ms: 10,
            },
        );
        d.dispatch(event(&pool, 0, ObjectKind::File, Command::Create, "a", None)).await;
        assert_eq!(always_fails.calls().len(), 3);
        assert_eq!(d.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_session_failure_disables_session() {
        let pool = EventPool::new(4);
        let broken = RecordingSession::scripted(vec![Reply::Broken]);
        let healthy = RecordingSession::scripted(vec![]);
        let mut d = dispatcher(
            vec![monitor(0, "/a/", "/ra/", 0), monitor(1, "/b/", "/rb/", 1)],
            vec![broken.clone(), healthy.clone()],
            DispatchCfg::default(),
        );

        d.dispatch(event(&pool, 0, ObjectKind::File, Command::Modify, "f", None)).await;
        d.dispatch(event(&pool, 0, ObjectKind::File, Command::Delete, "f", None)).await;
        d.dispatch(event(&pool, 1, ObjectKind::File, Command::Delete, "g", None)).await;

        assert_eq!(broken.calls().len(), 1);
        assert_eq!(healthy.calls(), vec![exec("rm -rf '/rb/g'")]);
        assert_eq!(d.stats(), DispatchStats { executed: 1, failed: 1, skipped: 1 });
        assert_eq!(pool.in_use(), 0);
    }

    #[tokio::test]
    async fn test_failed_push_keeps_session_usable() {
        let pool = EventPool::new(4);
        // the swap file is already gone when its modify is dispatched
        let session = RecordingSession::scripted(vec![Reply::Status(0), Reply::LocalGone]);
        let mut d = dispatcher(
            vec![monitor(0, "/no/such/root/", "/srv/", 0)],
            vec![session.clone()],
            DispatchCfg::default(),
        );

        d.dispatch(event(&pool, 0, ObjectKind::File, Command::Create, "x.swp", None)).await;
        d.dispatch(event(&pool, 0, ObjectKind::File, Command::Modify, "x.swp", None)).await;
        d.dispatch(event(&pool, 0, ObjectKind::File, Command::Delete, "x.swp", None)).await;
        d.dispatch(event(&pool, 0, ObjectKind::File, Command::Create, "real.txt", None)).await;

        assert_eq!(
            session.calls(),
            vec![
                exec(": > '/srv/x.swp'"),
                Call::Push(PathBuf::from("/no/such/root/x.swp"), "/srv/x.swp".into()),
                exec("rm -rf '/srv/x.swp'"),
                exec(": > '/srv/real.txt'"),
            ]
        );
        assert_eq!(d.stats(), DispatchStats { executed: 3, failed: 1, skipped: 0 });
    }

    #[tokio::test]
    async fn test_refused_push_is_not_a_session_failure() {
        let pool = EventPool::new(2);
        let session = RecordingSession::scripted(vec![Reply::Status(3)]);
        let mut d = dispatcher(
            vec![monitor(0, "/data/", "/srv/", 0)],
            vec![session.clone()],
            DispatchCfg::default(),
        );
        d.dispatch(event(&pool, 0, ObjectKind::File, Command::Modify, "ro.txt", None)).await;
        d.dispatch(event(&pool, 0, ObjectKind::File, Command::Modify, "ok.txt", None)).await;
        assert_eq!(session.calls().len(), 2);
        assert_eq!(d.stats(), DispatchStats { executed: 1, failed: 1, skipped: 0 });
    }

    #[tokio::test]
    async fn test_unknown_monitor_and_directory_modify_skipped() {
        let pool = EventPool::new(2);
        let session = RecordingSession::scripted(vec![]);
        let mut d = dispatcher(
            vec![monitor(0, "/data/", "/srv/", 0)],
            vec![session.clone()],
            DispatchCfg::default(),
        );
        d.dispatch(event(&pool, 7, ObjectKind::File, Command::Create, "a", None)).await;
        d.dispatch(event(&pool, 0, ObjectKind::Directory, Command::Modify, "d", None)).await;
        assert!(session.calls().is_empty());
        assert_eq!(d.stats().skipped, 2);
        assert_eq!(pool.in_use(), 0);
    }
}
