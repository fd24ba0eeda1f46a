//! Ordered transcript and its output destinations

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::messages::MessageRecord;

/// Rendered lines keyed by millisecond timestamp.
///
/// A second record with the same timestamp replaces the first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    records: BTreeMap<i64, String>,
}

impl Transcript {
    /// Insert a record, returning the line it replaced.
    pub fn insert(&mut self, record: MessageRecord) -> Option<String> {
        self.records
            .insert(record.timestamp_millis, record.rendered_line)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Ascending by timestamp.
    pub fn records(&self) -> impl Iterator<Item = (i64, &str)> {
        self.records.iter().map(|(ts, line)| (*ts, line.as_str()))
    }

    pub fn lines(&self) -> Vec<&str> {
        self.records.values().map(String::as_str).collect()
    }

    /// Lines grouped by `YYYYMMDD`, each group still ascending.
    pub fn by_day(&self, clock: &Clock) -> BTreeMap<String, Vec<&str>> {
        let mut days: BTreeMap<String, Vec<&str>> = BTreeMap::new();
        for (ts, line) in self.records() {
            days.entry(clock.day_key(ts)).or_default().push(line);
        }
        days
    }
}

impl FromIterator<MessageRecord> for Transcript {
    fn from_iter<I: IntoIterator<Item = MessageRecord>>(iter: I) -> Self {
        let mut transcript = Transcript::default();
        for record in iter {
            transcript.insert(record);
        }
        transcript
    }
}

/// Where the transcript goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Interactive output.
    Stdout,
    /// All lines in one file.
    File(PathBuf),
    /// One file per calendar day, date inserted before the extension.
    SplitByDay(PathBuf),
    /// What would have been printed, saved to a file instead.
    Capture(PathBuf),
}

impl Destination {
    pub fn from_options(output: Option<PathBuf>, split: bool) -> Self {
        match output {
            None => Self::Stdout,
            Some(path) if split => Self::SplitByDay(path),
            Some(path) => Self::File(path),
        }
    }
}

/// What [`emit`] wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmitReport {
    pub files: Vec<PathBuf>,
    pub lines: usize,
}

/// `out.txt` + `20240101` → `out-20240101.txt`
pub fn split_path(base: &Path, day: &str) -> PathBuf {
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "transcript".to_string());
    let name = match base.extension() {
        Some(ext) => format!("{}-{}.{}", stem, day, ext.to_string_lossy()),
        None => format!("{}-{}", stem, day),
    };
    base.with_file_name(name)
}

fn file_body(lines: &[&str]) -> String {
    let mut body = lines.join("\n");
    body.push('\n');
    body
}

fn screen_body(lines: &[&str]) -> String {
    let mut body = lines.join("\n");
    body.push_str("\n\n");
    body
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    fs::write(path, content).map_err(|source| Error::OutputWrite {
        path: path.to_path_buf(),
        source,
    })
}

/// Name reported when the terminal cannot be written.
pub const SCREEN: &str = "<stdout>";

fn write_screen(screen: &mut dyn Write, content: &str) -> Result<()> {
    screen
        .write_all(content.as_bytes())
        .and_then(|()| screen.flush())
        .map_err(|source| Error::OutputWrite {
            path: PathBuf::from(SCREEN),
            source,
        })
}

/// Write the transcript; `screen` receives interactive output.
pub fn emit(
    transcript: &Transcript,
    destination: &Destination,
    clock: &Clock,
    screen: &mut dyn Write,
) -> Result<EmitReport> {
    let lines = transcript.lines();
    let mut report = EmitReport {
        files: Vec::new(),
        lines: lines.len(),
    };

    match destination {
        Destination::Stdout => {
            write_screen(screen, &screen_body(&lines))?;
        }
        Destination::File(path) => {
            write_file(path, &file_body(&lines))?;
            report.files.push(path.clone());
        }
        Destination::SplitByDay(base) => {
            for (day, day_lines) in transcript.by_day(clock) {
                let path = split_path(base, &day);
                write_file(&path, &file_body(&day_lines))?;
                report.files.push(path);
            }
        }
        Destination::Capture(path) => {
            write_file(path, &screen_body(&lines))?;
            write_screen(
                screen,
                &format!("Conversation output saved to {}\n", path.display()),
            )?;
            report.files.push(path.clone());
        }
    }

    info!(lines = report.lines, files = report.files.len(), "transcript written");
    Ok(report)
}
