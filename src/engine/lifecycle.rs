//! The per-shard rule state machine.
//!
//! Everything here is pure: counter snapshots come in as arguments and leave
//! as return values, so the pipeline decides when and how they hit disk.

use super::state::{DeleteCounter, ShardState};
use crate::config::LifecycleConfig;
use crate::stats::Histogram;
use rustc_hash::FxHashSet;
use std::collections::BTreeSet;

/// Candidates split by the skip-validation gate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationPlan {
    /// Rules sent to the liveness checker, in priority order.
    pub to_check: Vec<String>,
    /// Chronically failing rules counted as failed without a DNS query.
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub checked: usize,
    pub skipped: usize,
    pub validated: usize,
    /// Rules that were not published before this run.
    pub added: usize,
    /// Rules removed because their DeleteCounter reached the discard threshold.
    pub discarded: usize,
    /// Rules removed because their WriteCounter ran out.
    pub expired: usize,
    /// Checked rules that failed validation.
    pub filtered: usize,
    /// DeleteCounter values of the rules that failed this run.
    pub failures: Histogram,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub delete_counter: DeleteCounter,
    pub state: ShardState,
    /// Rules demanding priority re-validation on the next run.
    pub retry: Vec<String>,
    pub stats: RunStats,
    touched: BTreeSet<String>,
}

impl RunOutcome {
    /// The DeleteCounter entries this run wrote, for merging into a fresher
    /// copy of the store.
    pub fn delete_changes(&self) -> Vec<(String, Option<u32>)> {
        self.touched
            .iter()
            .map(|rule| {
                let value = self
                    .delete_counter
                    .contains(rule)
                    .then(|| self.delete_counter.get(rule));
                (rule.clone(), value)
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcReport {
    pub reset: usize,
    pub purged: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct Lifecycle {
    policy: LifecycleConfig,
}

impl Lifecycle {
    pub fn new(policy: LifecycleConfig) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &LifecycleConfig {
        &self.policy
    }

    fn is_gated(&self, failures: u32) -> bool {
        failures >= self.policy.skip_threshold
    }

    /// De-duplicates `candidates` (first occurrence wins, so retry entries
    /// placed in front keep their priority) and applies the skip gate.
    pub fn plan<I>(&self, candidates: I, delete_counter: &DeleteCounter) -> ValidationPlan
    where
        I: IntoIterator<Item = String>,
    {
        let mut seen = FxHashSet::default();
        let mut plan = ValidationPlan::default();
        for rule in candidates {
            if rule.is_empty() || !seen.insert(rule.clone()) {
                continue;
            }
            if self.is_gated(delete_counter.get(&rule)) {
                plan.skipped.push(rule);
            } else {
                plan.to_check.push(rule);
            }
        }
        plan
    }

    /// Folds one run's liveness results into the counters and the shard state.
    pub fn apply(
        &self,
        plan: &ValidationPlan,
        valid: &FxHashSet<String>,
        mut delete_counter: DeleteCounter,
        state: ShardState,
    ) -> RunOutcome {
        let ShardState {
            published: prior,
            mut write_counter,
        } = state;
        let mut published = prior.clone();
        let mut touched = BTreeSet::new();
        let mut stats = RunStats {
            checked: plan.to_check.len(),
            skipped: plan.skipped.len(),
            ..RunStats::default()
        };

        for rule in &plan.skipped {
            let failures = delete_counter.increment(rule);
            touched.insert(rule.clone());
            stats.failures.record(failures);
            if published.remove(rule) {
                stats.discarded += 1;
            }
        }

        for rule in &plan.to_check {
            touched.insert(rule.clone());
            if valid.contains(rule) {
                delete_counter.set(rule, 0);
                write_counter.set(rule, self.policy.write_counter_max);
                if published.insert(rule.clone()) {
                    stats.added += 1;
                }
                stats.validated += 1;
            } else {
                let failures = delete_counter.increment(rule);
                stats.failures.record(failures);
                stats.filtered += 1;
                if failures >= self.policy.discard_threshold && published.remove(rule) {
                    stats.discarded += 1;
                }
            }
        }

        // Published rules that were not reaffirmed lose one unit of credit.
        let mut retry = Vec::new();
        for rule in &prior {
            if !published.contains(rule) || valid.contains(rule) {
                continue;
            }
            let credit = write_counter
                .get(rule)
                .unwrap_or(self.policy.write_counter_max)
                .saturating_sub(1);
            if credit == 0 {
                write_counter.remove(rule);
                published.remove(rule);
                retry.push(rule.clone());
                stats.expired += 1;
            } else {
                write_counter.set(rule, credit);
            }
        }

        write_counter.retain(|rule| published.contains(rule));

        RunOutcome {
            delete_counter,
            state: ShardState::new(published, write_counter),
            retry,
            stats,
            touched,
        }
    }

    /// Garbage collection for full-refresh runs. Rules still advertised
    /// upstream get a second chance; long-dead rules nobody lists any more are
    /// forgotten.
    pub fn collect_garbage(
        &self,
        delete_counter: &mut DeleteCounter,
        merged: &FxHashSet<String>,
    ) -> GcReport {
        let mut report = GcReport::default();
        delete_counter.retain(|rule, failures| {
            if merged.contains(rule) {
                if *failures >= self.policy.gc_reset_threshold {
                    *failures = self.policy.gc_reset_value;
                    report.reset += 1;
                }
                true
            } else if *failures > self.policy.gc_purge_ceiling {
                report.purged += 1;
                false
            } else {
                true
            }
        });
        report
    }

    /// Removes gated rules from a refresh's partition input. A refresh counts
    /// as a run for them, so their DeleteCounter still climbs.
    pub fn exclude_gated(
        &self,
        merged: &[String],
        delete_counter: &mut DeleteCounter,
    ) -> (Vec<String>, usize) {
        let mut kept = Vec::with_capacity(merged.len());
        let mut gated = 0;
        for rule in merged {
            if self.is_gated(delete_counter.get(rule)) {
                delete_counter.increment(rule);
                gated += 1;
            } else {
                kept.push(rule.clone());
            }
        }
        (kept, gated)
    }

    /// Distribution of WriteCounter credits for a shard.
    pub fn credit_histogram(state: &ShardState) -> Histogram {
        let mut histogram = Histogram::default();
        for (_, credit) in state.write_counter.iter() {
            histogram.record(credit);
        }
        histogram
    }
}
