//! Append-only JSONL writer, one file per instance per day.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use super::entry::JsonLogEntry;

/// Writer that appends entries to `logs/raw/<date>_<instance>.jsonl`.
pub struct InstanceLogWriter {
    instance: String,
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl InstanceLogWriter {
    /// Open (or create) today's file for `instance` under `logs_dir/raw`.
    pub fn new(logs_dir: impl AsRef<Path>, instance: impl Into<String>) -> io::Result<Self> {
        let instance = instance.into();
        let raw_dir = logs_dir.as_ref().join("raw");
        fs::create_dir_all(&raw_dir)?;

        let date = chrono::Local::now().format("%Y-%m-%d");
        let path = raw_dir.join(format!("{}_{}.jsonl", date, instance));

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            instance,
            writer: Mutex::new(BufWriter::new(file)),
            path,
        })
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry as a single line and flush.
    pub fn write(&self, entry: &JsonLogEntry) -> io::Result<()> {
        let json = entry
            .to_json_line()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let mut writer = self.writer.lock();
        writeln!(writer, "{}", json)?;
        writer.flush()
    }

    /// Append an unstructured line.
    pub fn write_raw(&self, level: &str, target: &str, message: &str) -> io::Result<()> {
        self.write(&JsonLogEntry::new(level, &self.instance, target, message))
    }

    pub fn flush(&self) -> io::Result<()> {
        self.writer.lock().flush()
    }
}

impl Drop for InstanceLogWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// Read every JSONL file under `logs_dir/raw`, merged and sorted by time.
///
/// Unparseable lines are skipped.
pub fn read_all_entries(logs_dir: impl AsRef<Path>) -> io::Result<Vec<JsonLogEntry>> {
    let raw_dir = logs_dir.as_ref().join("raw");
    if !raw_dir.exists() {
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    for dir_entry in fs::read_dir(&raw_dir)? {
        let path = dir_entry?.path();
        if path.extension().is_some_and(|e| e == "jsonl") {
            let content = fs::read_to_string(&path)?;
            entries.extend(
                content
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .filter_map(|line| JsonLogEntry::from_json_line(line).ok()),
            );
        }
    }

    // Stable sort keeps per-file order for equal timestamps.
    entries.sort_by(|a, b| a.ts.cmp(&b.ts));
    Ok(entries)
}
