use super::files::{parse_lines, FileLock};
use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Shared append-only queue of rules that expired from a published list and
/// get one more check on a later run.
///
/// The queue's lock serializes `drain` and `append`, so two concurrent drains
/// never return the same entry. Delivery is at most once per run: a run that
/// dies after draining loses what it drained, and one that dies after
/// re-queueing but before publishing sees those entries again next time.
#[derive(Debug, Clone)]
pub struct RetryQueue {
    path: PathBuf,
}

impl RetryQueue {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns all queued rules and leaves the queue empty.
    pub fn drain(&self) -> Result<Vec<String>> {
        let _lock = FileLock::acquire(&self.path)?;
        let mut file = match OpenOptions::new().read(true).write(true).open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to open {}", self.path.display()))
            }
        };

        let mut text = String::new();
        file.read_to_string(&mut text)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        file.set_len(0)
            .with_context(|| format!("Failed to truncate {}", self.path.display()))?;
        file.seek(SeekFrom::Start(0))?;
        file.sync_all()?;

        let rules = parse_lines(&text);
        debug!("Drained {} rules from {}", rules.len(), self.path.display());
        Ok(rules)
    }

    /// Adds `rules` to the end of the queue.
    pub fn append(&self, rules: &[String]) -> Result<()> {
        if rules.is_empty() {
            return Ok(());
        }
        let _lock = FileLock::acquire(&self.path)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;

        let mut body = String::new();
        for rule in rules {
            body.push_str(rule);
            body.push('\n');
        }
        file.write_all(body.as_bytes())
            .with_context(|| format!("Failed to append to {}", self.path.display()))?;
        file.sync_all()?;
        debug!("Queued {} rules in {}", rules.len(), self.path.display());
        Ok(())
    }

    /// Current contents without draining.
    pub fn peek(&self) -> Result<Vec<String>> {
        let _lock = FileLock::acquire(&self.path)?;
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(parse_lines(&text)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", self.path.display())),
        }
    }
}
