use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Replaces `path` with `bytes` so readers only ever see the old or the new
/// content: temp file in the same directory, fsync, rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory {}", dir.display()))?;

    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
    tmp.write_all(bytes)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("Failed to sync {}", path.display()))?;
    tmp.persist(path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

/// Reads a newline-separated rule file. `None` when the file does not exist.
/// Lines are trimmed and blank lines skipped.
pub fn read_lines(path: &Path) -> Result<Option<Vec<String>>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(parse_lines(&text))),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

pub fn parse_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Writes `lines` joined by newlines, atomically.
pub fn write_lines<'a, I>(path: &Path, lines: I) -> Result<()>
where
    I: IntoIterator<Item = &'a String>,
{
    let mut body = String::new();
    for (idx, line) in lines.into_iter().enumerate() {
        if idx > 0 {
            body.push('\n');
        }
        body.push_str(line);
    }
    write_atomic(path, body.as_bytes())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Exclusive,
    Shared,
}

/// Advisory lock on `<path>.lock`, released on drop.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Blocks until the exclusive lock for `path` is held.
    pub fn acquire(path: &Path) -> Result<Self> {
        Self::acquire_mode(path, LockMode::Exclusive)
    }

    pub fn acquire_mode(path: &Path, mode: LockMode) -> Result<Self> {
        let lock_path = lock_path_for(path);
        if let Some(parent) = lock_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create directory {}", parent.display())
                })?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .with_context(|| format!("Failed to open lock file {}", lock_path.display()))?;
        match mode {
            LockMode::Exclusive => file.lock(),
            LockMode::Shared => file.lock_shared(),
        }
        .with_context(|| format!("Failed to lock {}", lock_path.display()))?;
        debug!("Acquired {:?} {}", mode, lock_path.display());
        Ok(Self {
            file,
            path: lock_path,
        })
    }

    /// Waits for the lock on the blocking pool, so other tasks on the runtime
    /// (including the current holder) keep making progress.
    pub async fn acquire_async(path: &Path, mode: LockMode) -> Result<Self> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || Self::acquire_mode(&path, mode))
            .await
            .map_err(|e| anyhow::anyhow!("Lock task panicked: {e}"))?
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            debug!("Failed to unlock {}: {}", self.path.display(), e);
        }
    }
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("rules.txt");
        let rules = vec!["|b^".to_string(), "|a^".to_string()];

        write_lines(&path, &rules).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "|b^\n|a^");
        assert_eq!(read_lines(&path).unwrap(), Some(rules));
    }

    #[test]
    fn test_missing_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_lines(&dir.path().join("absent.txt")).unwrap(), None);
    }

    #[test]
    fn test_parse_lines_trims_and_skips_blanks() {
        assert_eq!(
            parse_lines("  |a^ \n\n\t|b^\r\n"),
            vec!["|a^".to_string(), "|b^".to_string()]
        );
    }

    #[test]
    fn test_atomic_write_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counter.bin");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(fs::read(&path).unwrap(), b"two");
    }

    #[test]
    fn test_lock_file_is_reusable_after_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("retry_rules.txt");
        {
            let lock = FileLock::acquire(&path).unwrap();
            assert!(lock.path().ends_with("retry_rules.txt.lock"));
        }
        let again = FileLock::acquire(&path).unwrap();
        assert!(again.path().exists());
    }

    #[test]
    fn test_shared_locks_coexist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("merged_rules_temp.txt");
        let first = FileLock::acquire_mode(&path, LockMode::Shared).unwrap();
        let second = FileLock::acquire_mode(&path, LockMode::Shared).unwrap();
        assert_eq!(first.path(), second.path());
    }

    #[tokio::test]
    async fn test_async_acquire_waits_without_blocking_the_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("validated_part_1.txt");
        let held = FileLock::acquire_async(&path, LockMode::Exclusive)
            .await
            .unwrap();

        let (second, released_at) = tokio::join!(
            async {
                let lock = FileLock::acquire_async(&path, LockMode::Exclusive)
                    .await
                    .unwrap();
                (lock, std::time::Instant::now())
            },
            async {
                // Runs on the same thread as the waiter above.
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                let at = std::time::Instant::now();
                drop(held);
                at
            }
        );
        let (_lock, acquired_at) = second;
        assert!(acquired_at >= released_at);
    }
}
