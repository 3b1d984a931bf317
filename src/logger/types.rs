use crate::engine::RunStats;
use crate::stats::{Histogram, ProgressSnapshot};

#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    SourceFetched {
        url: String,
        rules: usize,
    },
    SourceFailed {
        url: String,
        error: String,
    },
    Merged {
        rules: usize,
    },
    GarbageCollected {
        reset: usize,
        purged: usize,
        gated: usize,
    },
    PartWritten {
        part: usize,
        rules: usize,
    },
    RetryDrained {
        part: usize,
        own: usize,
        deferred: usize,
    },
    ShardLoaded {
        part: usize,
        backlog: usize,
        retry: usize,
        to_check: usize,
        skipped: usize,
    },
    Progress {
        part: usize,
        snapshot: ProgressSnapshot,
    },
    FailureHistogram {
        part: usize,
        histogram: Histogram,
    },
    CreditHistogram {
        part: usize,
        histogram: Histogram,
    },
    RetryQueued {
        part: usize,
        rules: usize,
    },
    ShardCompleted {
        part: usize,
        published: usize,
        stats: RunStats,
    },
}

pub trait StatusSink: Send + Sync {
    fn emit(&self, event: &StatusEvent);
}
