//! Merged, human-readable timeline of JSONL logs.

use std::fmt::Write;
use std::io;
use std::path::Path;

use super::entry::JsonLogEntry;
use super::writer::read_all_entries;

/// Counts of entries per level.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LogStats {
    pub total: usize,
    pub error: usize,
    pub warn: usize,
    pub info: usize,
    pub debug: usize,
    pub trace: usize,
}

impl LogStats {
    pub fn from_entries(entries: &[JsonLogEntry]) -> Self {
        let mut stats = Self {
            total: entries.len(),
            ..Self::default()
        };
        for entry in entries {
            match entry.level.as_str() {
                "error" => stats.error += 1,
                "warn" => stats.warn += 1,
                "info" => stats.info += 1,
                "debug" => stats.debug += 1,
                "trace" => stats.trace += 1,
                _ => {}
            }
        }
        stats
    }
}

/// Options for [`render_timeline`].
#[derive(Debug, Clone, Default)]
pub struct TimelineOptions {
    /// Keep only the last `n` entries
    pub limit: Option<usize>,
    /// Keep only entries for this room
    pub room: Option<String>,
    /// Drop debug and trace entries
    pub quiet: bool,
}

fn level_marker(level: &str) -> char {
    match level {
        "error" => '!',
        "warn" => '~',
        "info" => '>',
        "debug" => '.',
        "trace" => '-',
        _ => ' ',
    }
}

/// Render entries (already sorted) as one line each, oldest first.
pub fn render_timeline(entries: &[JsonLogEntry], options: &TimelineOptions) -> String {
    let selected: Vec<&JsonLogEntry> = entries
        .iter()
        .filter(|e| !options.quiet || !matches!(e.level.as_str(), "debug" | "trace"))
        .filter(|e| match &options.room {
            Some(room) => e.room.as_deref() == Some(room.as_str()),
            None => true,
        })
        .collect();

    let skip = options
        .limit
        .map(|n| selected.len().saturating_sub(n))
        .unwrap_or(0);

    let mut out = String::new();
    for entry in &selected[skip..] {
        let time = entry.ts.split('T').nth(1).unwrap_or(&entry.ts);
        let _ = write!(
            out,
            "{} {} [{}] {}",
            level_marker(&entry.level),
            time,
            entry.origin(),
            entry.msg
        );
        if let Some(fields) = entry.fields.as_ref().and_then(|f| f.as_object()) {
            for (key, value) in fields {
                match value.as_str() {
                    Some(s) => {
                        let _ = write!(out, " {}={}", key, s);
                    }
                    None => {
                        let _ = write!(out, " {}={}", key, value);
                    }
                }
            }
        }
        out.push('\n');
    }
    out
}

/// Read every instance's log under `logs_dir` and render the merged
/// timeline.
pub fn generate_timeline(logs_dir: impl AsRef<Path>, options: &TimelineOptions) -> io::Result<String> {
    let entries = read_all_entries(logs_dir)?;
    Ok(render_timeline(&entries, options))
}
