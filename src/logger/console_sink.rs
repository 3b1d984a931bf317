use crate::config::LoggingConfig;
use crate::logger::types::{StatusEvent, StatusSink};
use tracing::{info, warn};

pub struct ConsoleStatusSink {
    config: LoggingConfig,
    /// Denominator of the `k/n` failure ratios, the discard threshold.
    ratio_base: u32,
}

impl ConsoleStatusSink {
    pub fn new(config: LoggingConfig, ratio_base: u32) -> Self {
        Self { config, ratio_base }
    }

    fn emit_structured(&self, event: &StatusEvent) {
        match event {
            StatusEvent::SourceFetched { url, rules } => {
                info!(
                    target: "ad_prune::status",
                    event = "source_fetched",
                    url = %url,
                    rules = rules
                )
            }
            StatusEvent::SourceFailed { url, error } => {
                warn!(
                    target: "ad_prune::status",
                    event = "source_failed",
                    url = %url,
                    error = %error
                )
            }
            StatusEvent::Merged { rules } => {
                info!(target: "ad_prune::status", event = "merged", rules = rules)
            }
            StatusEvent::GarbageCollected {
                reset,
                purged,
                gated,
            } => info!(
                target: "ad_prune::status",
                event = "gc",
                reset = reset,
                purged = purged,
                gated = gated
            ),
            StatusEvent::PartWritten { part, rules } => {
                info!(
                    target: "ad_prune::status",
                    event = "part_written",
                    part = part,
                    rules = rules
                )
            }
            StatusEvent::RetryDrained {
                part,
                own,
                deferred,
            } => info!(
                target: "ad_prune::status",
                event = "retry_drained",
                part = part,
                own = own,
                deferred = deferred
            ),
            StatusEvent::ShardLoaded {
                part,
                backlog,
                retry,
                to_check,
                skipped,
            } => info!(
                target: "ad_prune::status",
                event = "shard_loaded",
                part = part,
                backlog = backlog,
                retry = retry,
                to_check = to_check,
                skipped = skipped
            ),
            StatusEvent::Progress { part, snapshot } => info!(
                target: "ad_prune::status",
                event = "progress",
                part = part,
                completed = snapshot.completed,
                total = snapshot.total,
                valid = snapshot.valid,
                rate = snapshot.rate,
                eta = snapshot.eta_secs
            ),
            StatusEvent::FailureHistogram { part, histogram } => info!(
                target: "ad_prune::status",
                event = "failure_histogram",
                part = part,
                buckets = ?histogram
            ),
            StatusEvent::CreditHistogram { part, histogram } => info!(
                target: "ad_prune::status",
                event = "credit_histogram",
                part = part,
                buckets = ?histogram
            ),
            StatusEvent::RetryQueued { part, rules } => {
                info!(
                    target: "ad_prune::status",
                    event = "retry_queued",
                    part = part,
                    rules = rules
                )
            }
            StatusEvent::ShardCompleted {
                part,
                published,
                stats,
            } => info!(
                target: "ad_prune::status",
                event = "shard_completed",
                part = part,
                published = published,
                added = stats.added,
                discarded = stats.discarded,
                expired = stats.expired,
                filtered = stats.filtered,
                skipped = stats.skipped
            ),
        }
    }

    fn emit_text(&self, event: &StatusEvent) {
        match event {
            StatusEvent::SourceFetched { url, rules } => {
                info!("Fetched {} rules from {}", rules, url)
            }
            StatusEvent::SourceFailed { url, error } => {
                warn!("Failed to fetch {}: {}", url, error)
            }
            StatusEvent::Merged { rules } => info!("Merged {} distinct rules", rules),
            StatusEvent::GarbageCollected {
                reset,
                purged,
                gated,
            } => info!(
                "Counter GC: {} reset for another chance, {} purged, {} held back",
                reset, purged, gated
            ),
            StatusEvent::PartWritten { part, rules } => {
                info!("Part {:02}: {} rules", part, rules)
            }
            StatusEvent::RetryDrained {
                part,
                own,
                deferred,
            } => {
                if *own > 0 || *deferred > 0 {
                    info!(
                        "Part {}: drained retry queue, {} go first, {} deferred to their shard",
                        part, own, deferred
                    )
                }
            }
            StatusEvent::ShardLoaded {
                part,
                backlog,
                retry,
                to_check,
                skipped,
            } => info!(
                "Part {}: {} backlog rules + {} retry rules, {} to check, {} skipped",
                part, backlog, retry, to_check, skipped
            ),
            StatusEvent::Progress { snapshot, .. } => info!("{}", snapshot),
            StatusEvent::FailureHistogram { part, histogram } => {
                for line in histogram.ratio_lines(self.ratio_base) {
                    info!("Part {}: consecutive failures {}", part, line);
                }
            }
            StatusEvent::CreditHistogram { part, histogram } => {
                for (credit, count) in histogram.iter() {
                    info!("Part {}: write_counter {}: {}", part, credit, count);
                }
            }
            StatusEvent::RetryQueued { part, rules } => {
                if *rules > 0 {
                    info!("Part {}: queued {} rules for retry", part, rules)
                }
            }
            StatusEvent::ShardCompleted {
                part,
                published,
                stats,
            } => info!(
                "Part {} done: total {}, added {}, discarded {}, expired {}, filtered {}",
                part, published, stats.added, stats.discarded, stats.expired, stats.filtered
            ),
        }
    }
}

impl StatusSink for ConsoleStatusSink {
    fn emit(&self, event: &StatusEvent) {
        if self.config.format == "json" {
            self.emit_structured(event);
        } else {
            self.emit_text(event);
        }
    }
}
