use crate::checker::LivenessChecker;
use crate::config::Config;
use crate::engine::{DeleteCounter, Lifecycle, Partitioner, RunStats, ShardState};
use crate::logger::{StatusEvent, StatusLogger};
use crate::resolver::DnsResolver;
use crate::sources::{merge_rules, RuleSource};
use crate::store::{LockMode, Store, StoreLayout};
use anyhow::{anyhow, bail, Context, Result};
use rustc_hash::FxHashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub merged: usize,
    /// Merged rules withheld from the part files by the skip gate.
    pub gated: usize,
    pub reset: usize,
    pub purged: usize,
    pub part_sizes: Vec<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShardSummary {
    pub part: usize,
    pub published: usize,
    /// Published rules handed over to the shard that now owns them.
    pub released: usize,
    /// Drained retry entries put back for their owning shard.
    pub deferred: usize,
    pub stats: RunStats,
}

impl ShardSummary {
    /// Rules that left this shard's published list during the run.
    pub fn deleted(&self) -> usize {
        self.stats.discarded + self.stats.expired + self.released
    }
}

/// The machine-readable line consumed by the publishing job.
impl fmt::Display for ShardSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "COMMIT_STATS: total {}, added {}, deleted {}, filtered {}",
            self.published,
            self.stats.added,
            self.deleted(),
            self.stats.filtered
        )
    }
}

pub struct Pipeline {
    store: Store,
    source: Arc<dyn RuleSource>,
    checker: LivenessChecker,
    partitioner: Partitioner,
    lifecycle: Lifecycle,
    logger: Arc<StatusLogger>,
}

impl Pipeline {
    pub fn new(
        config: &Config,
        source: Arc<dyn RuleSource>,
        resolver: Arc<dyn DnsResolver>,
        logger: Arc<StatusLogger>,
    ) -> Self {
        Self {
            store: Store::new(StoreLayout::from_config(config)),
            source,
            checker: LivenessChecker::new(resolver, &config.dns),
            partitioner: Partitioner::new(config.parts, &config.partition),
            lifecycle: Lifecycle::new(config.lifecycle),
            logger,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn logger(&self) -> &StatusLogger {
        &self.logger
    }

    /// Runs blocking store I/O (file locks, counter and queue updates) off the
    /// async worker threads.
    async fn with_store<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Store) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| anyhow!("Store task panicked: {e}"))?
    }

    /// Fetches every source, rebuilds the merged list and re-partitions it.
    /// Nothing on disk changes when the fetch yields no rules.
    pub async fn refresh(&self) -> Result<RefreshSummary> {
        info!("Refreshing rule sources...");
        let raw = self.source.fetch(&self.logger).await;
        let merged = merge_rules(raw);
        if merged.is_empty() {
            bail!("Rule sources returned no rules; keeping existing state");
        }
        self.logger.emit(StatusEvent::Merged {
            rules: merged.len(),
        });

        let merged_count = merged.len();
        let lifecycle = self.lifecycle;
        let partitioner = self.partitioner.clone();
        let _partition = self.store.lock_partition(LockMode::Exclusive).await?;
        let (gc, gated, buckets) = self
            .with_store(move |store| {
                store.layout().ensure_dirs()?;
                store
                    .write_merged(&merged)
                    .context("Failed to write merged rule list")?;

                let merged_set: FxHashSet<String> = merged.iter().cloned().collect();
                let (kept, gc, gated) = store.delete_counter().update(|dc| {
                    let gc = lifecycle.collect_garbage(dc, &merged_set);
                    let (kept, gated) = lifecycle.exclude_gated(&merged, dc);
                    (kept, gc, gated)
                })?;

                let buckets = partitioner.split(kept);
                store.write_parts(&buckets)?;
                Ok((gc, gated, buckets))
            })
            .await?;

        self.logger.emit(StatusEvent::GarbageCollected {
            reset: gc.reset,
            purged: gc.purged,
            gated,
        });
        for (idx, bucket) in buckets.iter().enumerate() {
            self.logger.emit(StatusEvent::PartWritten {
                part: idx + 1,
                rules: bucket.len(),
            });
        }

        let summary = RefreshSummary {
            merged: merged_count,
            gated,
            reset: gc.reset,
            purged: gc.purged,
            part_sizes: buckets.iter().map(Vec::len).collect(),
        };
        info!(
            "Refresh complete: {} merged rules, {} gated, {} parts",
            summary.merged,
            summary.gated,
            summary.part_sizes.len()
        );
        Ok(summary)
    }

    /// Refreshes when the merged list or the first part file is missing.
    pub async fn ensure_partition(&self, force: bool) -> Result<Option<RefreshSummary>> {
        let layout = self.store.layout();
        if force {
            return self.refresh().await.map(Some);
        }
        if !layout.merged_file().exists() || !layout.part_file(1).exists() {
            warn!("Merged rules or part files missing, refreshing");
            return self.refresh().await.map(Some);
        }
        Ok(None)
    }

    /// Validates one shard and persists the result.
    ///
    /// Lock order is partition (shared), then shard, then the counter and
    /// retry files, each taken only for its own read-modify-write.
    pub async fn run_shard(&self, part: usize) -> Result<ShardSummary> {
        let parts = self.partitioner.parts();
        if part == 0 || part > parts {
            bail!("Part {} is out of range 1..={}", part, parts);
        }

        if !self.store.layout().part_file(part).exists() {
            warn!("Part {} is missing, refreshing sources", part);
            self.refresh()
                .await
                .with_context(|| format!("Cannot rebuild part {part}"))?;
        }

        // Nothing is drained or written when the network is down.
        self.checker.probe().await?;

        let _partition = self.store.lock_partition(LockMode::Shared).await?;
        let _shard = self.store.lock_shard(part).await?;

        let input = self
            .with_store(move |store| ShardInput::load(store, part, parts))
            .await?;
        let ShardInput {
            backlog,
            own,
            deferred,
            delete_counter,
            mut state,
            relocated,
        } = input;
        self.logger.emit(StatusEvent::RetryDrained {
            part,
            own: own.len(),
            deferred: deferred.len(),
        });
        let released = state.release(relocated.iter().map(String::as_str));

        let retry_count = own.len();
        let backlog_count = backlog.len();
        let plan = self
            .lifecycle
            .plan(own.into_iter().chain(backlog), &delete_counter);
        self.logger.emit(StatusEvent::ShardLoaded {
            part,
            backlog: backlog_count,
            retry: retry_count,
            to_check: plan.to_check.len(),
            skipped: plan.skipped.len(),
        });

        let valid = self.checker.check(part, &plan.to_check, &self.logger).await;
        let outcome = self
            .lifecycle
            .apply(&plan, &valid, delete_counter, state);

        let changes = outcome.delete_changes();
        let write_counter = outcome.state.write_counter.clone();
        let published = outcome.state.published.clone();
        let mut requeue = outcome.retry.clone();
        requeue.extend(deferred.iter().cloned());
        self.with_store(move |store| {
            store.delete_counter().update(|dc| dc.merge(changes))?;
            store
                .not_written()
                .update(|nw| nw.replace_shard(part, write_counter))?;
            store.retry().append(&requeue)?;
            store
                .write_published(part, &published)
                .with_context(|| format!("Failed to publish part {part}"))
        })
        .await?;

        self.logger.emit(StatusEvent::FailureHistogram {
            part,
            histogram: outcome.stats.failures.clone(),
        });
        self.logger.emit(StatusEvent::CreditHistogram {
            part,
            histogram: Lifecycle::credit_histogram(&outcome.state),
        });
        self.logger.emit(StatusEvent::RetryQueued {
            part,
            rules: outcome.retry.len(),
        });
        self.logger.emit(StatusEvent::ShardCompleted {
            part,
            published: outcome.state.published.len(),
            stats: outcome.stats.clone(),
        });

        Ok(ShardSummary {
            part,
            published: outcome.state.published.len(),
            released,
            deferred: deferred.len(),
            stats: outcome.stats,
        })
    }
}

/// Everything a shard run reads before checking, taken under the partition
/// and shard locks.
struct ShardInput {
    backlog: Vec<String>,
    /// Drained retry entries this shard owns.
    own: Vec<String>,
    /// Drained retry entries owned by another shard.
    deferred: Vec<String>,
    delete_counter: DeleteCounter,
    state: ShardState,
    /// Published rules whose part file is now another shard's.
    relocated: Vec<String>,
}

impl ShardInput {
    fn load(store: &Store, part: usize, parts: usize) -> Result<Self> {
        let Some(backlog) = store.read_part(part)? else {
            bail!("Part {} is still missing after refresh", part);
        };

        let mut elsewhere = FxHashSet::default();
        for other in (1..=parts).filter(|p| *p != part) {
            elsewhere.extend(store.read_part(other)?.unwrap_or_default());
        }

        let drained = store.retry().drain()?;
        let (own, deferred): (Vec<String>, Vec<String>) =
            drained.into_iter().partition(|rule| !elsewhere.contains(rule));

        let delete_counter = store.delete_counter().load();
        let not_written = store.not_written().load();
        let published = store.read_published(part)?;
        let relocated = published
            .iter()
            .filter(|rule| elsewhere.contains(*rule))
            .cloned()
            .collect();

        Ok(Self {
            backlog,
            own,
            deferred,
            delete_counter,
            state: ShardState::new(published, not_written.shard(part)),
            relocated,
        })
    }
}
