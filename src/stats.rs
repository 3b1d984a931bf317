use crate::engine::{DeleteCounter, NotWrittenCounter};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

/// Counter value -> number of rules holding it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Histogram {
    buckets: BTreeMap<u32, usize>,
}

impl Histogram {
    pub fn record(&mut self, value: u32) {
        *self.buckets.entry(value).or_default() += 1;
    }

    pub fn get(&self, value: u32) -> usize {
        self.buckets.get(&value).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.buckets.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, usize)> + '_ {
        self.buckets.iter().map(|(k, v)| (*k, *v))
    }

    /// Renders buckets in the `k/<denominator>: count` form used by reports.
    pub fn ratio_lines(&self, denominator: u32) -> Vec<String> {
        self.iter()
            .map(|(value, count)| format!("{value}/{denominator}: {count}"))
            .collect()
    }
}

/// A point-in-time view of a liveness check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub completed: usize,
    pub total: usize,
    pub valid: usize,
    /// Completions per second since the check started.
    pub rate: f64,
    /// Estimated seconds until the remaining lookups finish.
    pub eta_secs: f64,
}

impl fmt::Display for ProgressSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "checked {}/{} | valid {} | {:.1}/s | eta {:.1}s",
            self.completed, self.total, self.valid, self.rate, self.eta_secs
        )
    }
}

/// Tracks completions of a batch of lookups and decides when to report.
#[derive(Debug)]
pub struct ProgressMeter {
    total: usize,
    every: usize,
    completed: usize,
    valid: usize,
    started: Instant,
}

impl ProgressMeter {
    pub fn new(total: usize, every: usize) -> Self {
        Self {
            total,
            every: every.max(1),
            completed: 0,
            valid: 0,
            started: Instant::now(),
        }
    }

    /// Records one finished lookup. Returns a snapshot when a report is due:
    /// every `every` completions and once at the end.
    pub fn record(&mut self, is_valid: bool) -> Option<ProgressSnapshot> {
        self.completed += 1;
        if is_valid {
            self.valid += 1;
        }
        if self.completed % self.every == 0 || self.completed == self.total {
            Some(self.snapshot_at(self.started.elapsed()))
        } else {
            None
        }
    }

    pub fn snapshot_at(&self, elapsed: Duration) -> ProgressSnapshot {
        let secs = elapsed.as_secs_f64();
        let rate = if secs > 0.0 {
            self.completed as f64 / secs
        } else {
            0.0
        };
        let remaining = self.total.saturating_sub(self.completed);
        let eta_secs = if rate > 0.0 {
            remaining as f64 / rate
        } else {
            0.0
        };
        ProgressSnapshot {
            completed: self.completed,
            total: self.total,
            valid: self.valid,
            rate,
            eta_secs,
        }
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn valid(&self) -> usize {
        self.valid
    }
}

/// Summary of both counter stores, as printed by `--stats`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CounterReport {
    pub delete_counter: Histogram,
    pub write_counter: Histogram,
    pub write_counter_rules: usize,
}

impl CounterReport {
    pub fn build(delete_counter: &DeleteCounter, not_written: &NotWrittenCounter) -> Self {
        let mut report = Self::default();
        for (_, failures) in delete_counter.iter() {
            report.delete_counter.record(failures);
        }
        for (_, shard) in not_written.iter() {
            for (_, credit) in shard.iter() {
                report.write_counter.record(credit);
                report.write_counter_rules += 1;
            }
        }
        report
    }

    pub fn render(&self, denominator: u32) -> String {
        let mut out = String::from("delete_counter:\n");
        if self.delete_counter.is_empty() {
            out.push_str("    (no entries)\n");
        }
        for line in self.delete_counter.ratio_lines(denominator) {
            out.push_str(&format!("    consecutive failures {line}\n"));
        }
        out.push_str("not_written_counter:\n");
        if self.write_counter.is_empty() {
            out.push_str("    (no entries)\n");
        }
        for (credit, count) in self.write_counter.iter() {
            out.push_str(&format!("    write_counter {credit}: {count}\n"));
        }
        out.push_str(&format!("    total rules: {}\n", self.write_counter_rules));
        out
    }
}
