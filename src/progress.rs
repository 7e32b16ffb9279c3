//! Index rebuild progress reporting.
//!
//! Reports observable progress during `assist index` so users see how many
//! corpus records have been written and when the index is ready.
//! Progress is emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event for a rebuild.
#[derive(Clone, Debug, PartialEq)]
pub enum RebuildProgressEvent {
    /// The previous index was dropped and the schema recreated.
    Created { index: String },
    /// `n` documents written out of `total`.
    Loading { index: String, n: u64, total: u64 },
    /// The index is complete and visible to readers.
    Ready { index: String, total: u64 },
}

/// Reports rebuild progress. Implementations write to stderr (human or JSON).
pub trait RebuildProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the search backends.
    fn report(&self, event: RebuildProgressEvent);
}

/// Human-friendly progress on stderr: "index course_qa  loading  1,234 / 5,000 records".
pub struct StderrProgress;

impl RebuildProgressReporter for StderrProgress {
    fn report(&self, event: RebuildProgressEvent) {
        let line = match &event {
            RebuildProgressEvent::Created { index } => {
                format!("index {}  schema created\n", index)
            }
            RebuildProgressEvent::Loading { index, n, total } => format!(
                "index {}  loading  {} / {} records\n",
                index,
                format_number(*n),
                format_number(*total)
            ),
            RebuildProgressEvent::Ready { index, total } => {
                format!("index {}  ready  {} records\n", index, format_number(*total))
            }
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl RebuildProgressReporter for JsonProgress {
    fn report(&self, event: RebuildProgressEvent) {
        let obj = match &event {
            RebuildProgressEvent::Created { index } => serde_json::json!({
                "event": "progress",
                "index": index,
                "phase": "created"
            }),
            RebuildProgressEvent::Loading { index, n, total } => serde_json::json!({
                "event": "progress",
                "index": index,
                "phase": "loading",
                "n": n,
                "total": total
            }),
            RebuildProgressEvent::Ready { index, total } => serde_json::json!({
                "event": "progress",
                "index": index,
                "phase": "ready",
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl RebuildProgressReporter for NoProgress {
    fn report(&self, _event: RebuildProgressEvent) {}
}

/// How often (in documents) backends emit a `Loading` event.
pub const REPORT_EVERY: u64 = 250;

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len().saturating_sub(1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Parse the `--progress` flag value.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "auto" => Some(Self::default_for_tty()),
            "off" => Some(ProgressMode::Off),
            "human" => Some(ProgressMode::Human),
            "json" => Some(ProgressMode::Json),
            _ => None,
        }
    }

    /// Build a reporter for this mode.
    pub fn reporter(&self) -> Box<dyn RebuildProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn parse_modes() {
        assert_eq!(ProgressMode::parse("off"), Some(ProgressMode::Off));
        assert_eq!(ProgressMode::parse("json"), Some(ProgressMode::Json));
        assert_eq!(ProgressMode::parse("loud"), None);
    }
}
