use std::fmt;

/// Reserved length of the name buffers in a pooled event.
pub const NAME_CAPACITY: usize = 260;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    #[default]
    File,
    Directory,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Command {
    #[default]
    Create,
    Delete,
    Rename,
    Modify,
}

/// A filesystem delta on one monitored root.
///
/// Names are relative to the monitored local root and keep the local
/// separator; `object_old_name` is only meaningful for [`Command::Rename`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeEvent {
    pub object_kind: ObjectKind,
    pub command: Command,
    pub monitor_id: usize,
    pub object_name: String,
    pub object_old_name: String,
}

impl ChangeEvent {
    /// A blank record with its name buffers reserved up front.
    pub(crate) fn with_reserved_names() -> Self {
        Self {
            object_name: String::with_capacity(NAME_CAPACITY),
            object_old_name: String::with_capacity(NAME_CAPACITY),
            ..Self::default()
        }
    }

    /// Overwrite every field, reusing the existing name buffers.
    pub fn fill(
        &mut self,
        monitor_id: usize,
        object_kind: ObjectKind,
        command: Command,
        object_name: &str,
        object_old_name: Option<&str>,
    ) {
        self.monitor_id = monitor_id;
        self.object_kind = object_kind;
        self.command = command;
        self.object_name.clear();
        self.object_name.push_str(object_name);
        self.object_old_name.clear();
        if let Some(old) = object_old_name {
            self.object_old_name.push_str(old);
        }
    }

    pub(crate) fn reset(&mut self) {
        self.monitor_id = 0;
        self.object_kind = ObjectKind::default();
        self.command = Command::default();
        self.object_name.clear();
        self.object_old_name.clear();
    }

    pub fn old_name(&self) -> Option<&str> {
        match self.command {
            Command::Rename => Some(&self.object_old_name),
            _ => None,
        }
    }
}

impl fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.old_name() {
            Some(old) => write!(
                f,
                "{:?} {:?} {} -> {} (monitor {})",
                self.command, self.object_kind, old, self.object_name, self.monitor_id
            ),
            None => write!(
                f,
                "{:?} {:?} {} (monitor {})",
                self.command, self.object_kind, self.object_name, self.monitor_id
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_reuses_buffers() {
        let mut ev = ChangeEvent::with_reserved_names();
        let cap = ev.object_name.capacity();
        ev.fill(2, ObjectKind::File, Command::Rename, "b.txt", Some("a.txt"));
        assert_eq!(ev.old_name(), Some("a.txt"));
        assert_eq!(ev.to_string(), "Rename File a.txt -> b.txt (monitor 2)");

        ev.fill(1, ObjectKind::Directory, Command::Create, "dir", None);
        assert_eq!(ev.old_name(), None);
        assert!(ev.object_old_name.is_empty());
        assert_eq!(ev.object_name.capacity(), cap);
    }

    #[test]
    fn test_old_name_only_for_rename() {
        let mut ev = ChangeEvent::default();
        ev.fill(0, ObjectKind::File, Command::Delete, "x", Some("ignored"));
        assert_eq!(ev.old_name(), None);
    }
}
