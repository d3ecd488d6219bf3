use crate::config::Pattern;
use globset::{Glob, GlobSet, GlobSetBuilder};

/// A whitelist or blacklist entry that failed to compile.
#[derive(Debug, Clone)]
pub struct GlobError {
    pub pattern: String,
    pub reason: String,
}

/// Runtime filter compiled from whitelist / blacklist pattern lists.
#[derive(Debug, Clone)]
pub struct PathFilter {
    whitelist: GlobSet,
    blacklist: GlobSet,
}

impl PathFilter {
    /// Build a filter from lists. Empty whitelist means "include all".
    pub fn new(whitelist: &[Pattern], blacklist: &[Pattern]) -> Result<Self, GlobError> {
        Ok(Self {
            whitelist: compile(whitelist)?,
            blacklist: compile(blacklist)?,
        })
    }

    /// Whether an object name (relative to the monitored root) should be synced.
    /// Backslash separated names are matched as if they used `/`.
    pub fn check(&self, object_name: &str) -> bool {
        let name = object_name.replace('\\', "/");
        let included = self.whitelist.is_empty() || self.whitelist.is_match(&name);
        let excluded = self.blacklist.is_match(&name);
        included && !excluded
    }
}

fn compile(patterns: &[Pattern]) -> Result<GlobSet, GlobError> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        let glob = Glob::new(&pat.0).map_err(|e| GlobError {
            pattern: pat.0.clone(),
            reason: e.kind().to_string(),
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| GlobError {
        pattern: e.glob().unwrap_or_default().to_string(),
        reason: e.kind().to_string(),
    })
}
