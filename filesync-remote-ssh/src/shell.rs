//! Framing of commands sent through a long-lived remote shell.
//!
//! Each command runs between two numbered marker lines, with its stderr folded
//! into stdout. Output of an earlier command that shows up late sits before
//! the begin marker of the current one and is dropped.

/// Markers as they appear in the output. The echoed commands spell them in
/// two quoted halves so the command text itself never matches.
const BEGIN: &str = "__FILESYNC_BEGIN__:";
const END: &str = "__FILESYNC_END__:";

pub(crate) fn wrap_command(seq: u64, command: &str) -> String {
    format!(
        "echo \"__FILESYNC_\"\"BEGIN__:{seq}\"\n{{ {command}\n}} 2>&1\necho \"__FILESYNC_\"\"END__:{seq}:$?\"\n"
    )
}

/// Collects shell output for the command numbered `seq`.
pub(crate) struct Reply {
    begin: String,
    end: String,
    buf: String,
}

impl Reply {
    pub(crate) fn new(seq: u64) -> Self {
        Self {
            begin: format!("{BEGIN}{seq}\n"),
            end: format!("{END}{seq}:"),
            buf: String::new(),
        }
    }

    /// Add a chunk of output; returns `(status, output)` once the end marker
    /// line is complete.
    pub(crate) fn feed(&mut self, chunk: &str) -> Option<(u32, String)> {
        self.buf.push_str(chunk);
        self.parse()
    }

    /// Text received before the begin marker; left over from earlier commands.
    pub(crate) fn stale(&self) -> &str {
        match self.buf.find(&self.begin) {
            Some(i) => &self.buf[..i],
            None => "",
        }
    }

    fn parse(&self) -> Option<(u32, String)> {
        let body_start = self.buf.find(&self.begin)? + self.begin.len();
        let body = &self.buf[body_start..];
        let end = body.find(&self.end)?;
        let rest = &body[end + self.end.len()..];
        let eol = rest.find('\n')?;
        let status = rest[..eol].trim().parse().ok()?;
        let output = body[..end].trim_end_matches('\n').to_string();
        Some((status, output))
    }
}
