use crate::config::{MonitorCfg, Pattern};
use crate::error::ConfigError;
use crate::filter::PathFilter;
use std::path::{Path, PathBuf};

/// A configured pairing of a local root and a remote root.
///
/// Roots carry their trailing separator. Built once at startup, then shared
/// read-only by the watcher and the dispatcher.
#[derive(Debug, Clone)]
pub struct MonitoredPath {
    pub id: usize,
    pub local_root: String,
    pub remote_root: String,
    pub session_id: usize,
    pub whitelist: Vec<Pattern>,
    pub blacklist: Vec<Pattern>,
    pub initial_sync: bool,
    filter: PathFilter,
}

impl MonitoredPath {
    pub fn from_config(id: usize, cfg: &MonitorCfg) -> Result<Self, ConfigError> {
        let filter = PathFilter::new(&cfg.whitelist, &cfg.blacklist).map_err(|e| {
            ConfigError::Glob {
                field: format!("monitor[{id}]"),
                pattern: e.pattern,
                reason: e.reason,
            }
        })?;
        Ok(Self {
            id,
            local_root: cfg.localpath.clone(),
            remote_root: cfg.remotepath.clone(),
            session_id: cfg.ssh,
            whitelist: cfg.whitelist.clone(),
            blacklist: cfg.blacklist.clone(),
            initial_sync: cfg.initial_sync,
            filter,
        })
    }

    pub fn local_dir(&self) -> &Path {
        Path::new(&self.local_root)
    }

    /// Local path of an object: root and name joined textually.
    pub fn local_path(&self, object_name: &str) -> PathBuf {
        PathBuf::from(format!("{}{}", self.local_root, object_name))
    }

    /// Name of `path` relative to the local root, or `None` for the root itself
    /// and for paths outside it.
    pub fn object_name(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(self.local_dir()).ok()?;
        if rel.as_os_str().is_empty() {
            return None;
        }
        Some(rel.to_string_lossy().into_owned())
    }

    pub fn accepts(&self, object_name: &str) -> bool {
        self.filter.check(object_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(local: &str, blacklist: &[&str]) -> MonitoredPath {
        let cfg = MonitorCfg {
            ssh: 0,
            localpath: local.into(),
            remotepath: "/srv/app/".into(),
            whitelist: vec![],
            blacklist: blacklist.iter().map(|s| Pattern(s.to_string())).collect(),
            initial_sync: false,
        };
        MonitoredPath::from_config(3, &cfg).unwrap()
    }

    #[test]
    fn test_object_name() {
        let m = monitor("/data/proj/", &[]);
        assert_eq!(m.object_name(Path::new("/data/proj/a/b.txt")).as_deref(), Some("a/b.txt"));
        assert_eq!(m.object_name(Path::new("/data/proj")), None);
        assert_eq!(m.object_name(Path::new("/other/x")), None);
    }

    #[test]
    fn test_local_path_and_filter() {
        let m = monitor("C:\\proj\\", &["*.tmp"]);
        assert_eq!(m.id, 3);
        assert_eq!(m.local_path("a.txt"), PathBuf::from("C:\\proj\\a.txt"));
        assert!(m.accepts("a.txt"));
        assert!(!m.accepts("sub\\a.tmp"));
    }
}
