use super::counters::CounterStore;
use super::files::{read_lines, write_lines, FileLock, LockMode};
use super::layout::StoreLayout;
use super::retry::RetryQueue;
use crate::engine::{DeleteCounter, NotWrittenCounter};
use anyhow::{Context, Result};
use std::collections::BTreeSet;

/// Typed access to every artifact under a [`StoreLayout`].
#[derive(Debug, Clone)]
pub struct Store {
    layout: StoreLayout,
    delete_counter: CounterStore<DeleteCounter>,
    not_written: CounterStore<NotWrittenCounter>,
    retry: RetryQueue,
}

impl Store {
    pub fn new(layout: StoreLayout) -> Self {
        Self {
            delete_counter: CounterStore::new(layout.delete_counter_file()),
            not_written: CounterStore::new(layout.not_written_file()),
            retry: RetryQueue::new(layout.retry_file()),
            layout,
        }
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    pub fn delete_counter(&self) -> &CounterStore<DeleteCounter> {
        &self.delete_counter
    }

    pub fn not_written(&self) -> &CounterStore<NotWrittenCounter> {
        &self.not_written
    }

    pub fn retry(&self) -> &RetryQueue {
        &self.retry
    }

    pub fn read_merged(&self) -> Result<Option<Vec<String>>> {
        read_lines(&self.layout.merged_file())
    }

    pub fn write_merged(&self, rules: &[String]) -> Result<()> {
        write_lines(&self.layout.merged_file(), rules)
    }

    pub fn read_part(&self, part: usize) -> Result<Option<Vec<String>>> {
        read_lines(&self.layout.part_file(part))
    }

    /// Writes `buckets[i]` to part file `i + 1`.
    pub fn write_parts(&self, buckets: &[Vec<String>]) -> Result<()> {
        for (idx, bucket) in buckets.iter().enumerate() {
            write_lines(&self.layout.part_file(idx + 1), bucket)
                .with_context(|| format!("Failed to write part {}", idx + 1))?;
        }
        Ok(())
    }

    /// A shard that has never published reads as empty.
    pub fn read_published(&self, part: usize) -> Result<BTreeSet<String>> {
        Ok(read_lines(&self.layout.published_file(part))?
            .unwrap_or_default()
            .into_iter()
            .collect())
    }

    pub fn write_published(&self, part: usize, rules: &BTreeSet<String>) -> Result<()> {
        write_lines(&self.layout.published_file(part), rules)
    }

    /// Serializes runs of the same shard.
    pub async fn lock_shard(&self, part: usize) -> Result<FileLock> {
        FileLock::acquire_async(&self.layout.published_file(part), LockMode::Exclusive).await
    }

    /// Guards the merged list and part files. A refresh holds it exclusively;
    /// shard runs share it from reading their backlog until they publish.
    pub async fn lock_partition(&self, mode: LockMode) -> Result<FileLock> {
        FileLock::acquire_async(&self.layout.merged_file(), mode).await
    }
}
