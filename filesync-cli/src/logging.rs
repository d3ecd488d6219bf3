//! Log file setup: `tracing-subscriber` writing to a file that rolls over
//! every minute, hour, day or week.

use chrono::{DateTime, Local};
use filesync_core::{LogCfg, LogCycle};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. Falls back to stderr when the log file
/// cannot be opened.
pub fn init(cfg: &LogCfg, base_dir: &Path) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cfg.level.as_str()));

    match RollingFile::open(cfg, base_dir, Local::now()) {
        Ok(file) => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(file)
                .with_ansi(false)
                .init();
        }
        Err(e) => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(io::stderr)
                .init();
            tracing::warn!("cannot open log file {}: {}", cfg.name, e);
        }
    }
}

fn period_key(cycle: LogCycle, now: DateTime<Local>) -> String {
    let fmt = match cycle {
        LogCycle::Minute => "%Y%m%d%H%M",
        LogCycle::Hour => "%Y%m%d%H",
        LogCycle::Day => "%Y%m%d",
        LogCycle::Week => "%G-W%V",
    };
    now.format(fmt).to_string()
}

struct State {
    period: String,
    file: File,
}

/// Where the files of one log live and how they are named:
/// `<stem>.<period>.<ext>`.
struct Naming {
    dir: PathBuf,
    stem: String,
    ext: String,
    cycle: LogCycle,
    /// Older files kept next to the current one.
    backup: usize,
}

impl Naming {
    fn path_for(&self, period: &str) -> PathBuf {
        self.dir.join(format!("{}.{}.{}", self.stem, period, self.ext))
    }

    /// Every file in the directory that follows this naming, oldest first.
    fn log_files(&self) -> io::Result<Vec<PathBuf>> {
        let prefix = format!("{}.", self.stem);
        let suffix = format!(".{}", self.ext);
        let mut files: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name().and_then(|n| n.to_str()).is_some_and(|n| {
                    n.len() > prefix.len() + suffix.len()
                        && n.starts_with(&prefix)
                        && n.ends_with(&suffix)
                })
            })
            .collect();
        files.sort();
        Ok(files)
    }

    fn prune(&self) -> io::Result<()> {
        let files = self.log_files()?;
        let keep = self.backup + 1;
        if files.len() > keep {
            for old in &files[..files.len() - keep] {
                let _ = fs::remove_file(old);
            }
        }
        Ok(())
    }
}

/// Log file that follows the configured cycle, pruned to `backup` old files.
pub struct RollingFile {
    naming: Naming,
    state: Mutex<State>,
}

impl RollingFile {
    pub fn open(cfg: &LogCfg, base_dir: &Path, now: DateTime<Local>) -> io::Result<Self> {
        let path = base_dir.join(&cfg.name);
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| base_dir.to_path_buf());
        fs::create_dir_all(&dir)?;
        let naming = Naming {
            dir,
            stem: path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "filesync".to_string()),
            ext: path
                .extension()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "log".to_string()),
            cycle: cfg.cycle,
            backup: cfg.backup as usize,
        };

        let period = period_key(cfg.cycle, now);
        let current = naming.path_for(&period);
        if cfg.clean_file {
            for old in naming.log_files()? {
                if old != current {
                    let _ = fs::remove_file(old);
                }
            }
        }
        let file = if cfg.clean_log {
            File::create(&current)?
        } else {
            OpenOptions::new().create(true).append(true).open(&current)?
        };
        naming.prune()?;
        Ok(Self {
            naming,
            state: Mutex::new(State { period, file }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Switch to the file of the period `now` falls in, if it changed.
    fn roll(&self, state: &mut State, now: DateTime<Local>) -> io::Result<()> {
        let period = period_key(self.naming.cycle, now);
        if period == state.period {
            return Ok(());
        }
        state.file.flush()?;
        state.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.naming.path_for(&period))?;
        state.period = period;
        self.naming.prune()
    }
}

pub struct RollingWriter<'a> {
    owner: &'a RollingFile,
    state: MutexGuard<'a, State>,
}

impl Write for RollingWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.owner.roll(&mut self.state, Local::now())?;
        self.state.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.state.file.flush()
    }
}

impl<'a> MakeWriter<'a> for RollingFile {
    type Writer = RollingWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        RollingWriter {
            owner: self,
            state: self.lock(),
        }
    }
}
