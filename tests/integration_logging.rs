mod common;

use ad_prune::config::LoggingConfig;
use ad_prune::engine::RunStats;
use ad_prune::logger::{ConsoleStatusSink, StatusEvent, StatusLogger, StatusSink};
use ad_prune::stats::{Histogram, ProgressSnapshot};
use common::{strings, Fixture};

#[tokio::test]
async fn test_shard_run_reports_status_events() {
    let fx = Fixture::new(1, &["good.example"]);
    let (pipeline, events) =
        fx.pipeline_with_events(&["|ads.example^", "|bad^", "|good.example^"]);
    pipeline.refresh().await.unwrap();
    fx.store()
        .retry()
        .append(&strings(&["|retry.example^"]))
        .unwrap();

    pipeline.run_shard(1).await.unwrap();

    let events: Vec<StatusEvent> = events.read().unwrap().iter().cloned().collect();

    assert!(events.contains(&StatusEvent::Merged { rules: 3 }));
    assert!(events.contains(&StatusEvent::PartWritten { part: 1, rules: 3 }));
    assert!(events.contains(&StatusEvent::RetryDrained {
        part: 1,
        own: 1,
        deferred: 0
    }));
    assert!(events.contains(&StatusEvent::ShardLoaded {
        part: 1,
        backlog: 3,
        retry: 1,
        to_check: 4,
        skipped: 0
    }));

    let last_progress = events
        .iter()
        .rev()
        .find_map(|e| match e {
            StatusEvent::Progress { part: 1, snapshot } => Some(*snapshot),
            _ => None,
        })
        .expect("progress event");
    assert_eq!(last_progress.completed, 4);
    assert_eq!(last_progress.total, 4);
    assert_eq!(last_progress.valid, 1);

    match events.last() {
        Some(StatusEvent::ShardCompleted {
            part: 1,
            published,
            stats,
        }) => {
            assert_eq!(*published, 1);
            assert_eq!(stats.filtered, 3);
            assert_eq!(stats.failures.get(1), 3);
        }
        other => panic!("unexpected final event {other:?}"),
    }
}

#[tokio::test]
async fn test_console_sink_handles_every_event() {
    let mut failures = Histogram::default();
    failures.record(1);
    failures.record(3);
    let events = vec![
        StatusEvent::SourceFetched {
            url: "https://lists.example/a.txt".to_string(),
            rules: 10,
        },
        StatusEvent::SourceFailed {
            url: "https://lists.example/b.txt".to_string(),
            error: "timeout".to_string(),
        },
        StatusEvent::Merged { rules: 10 },
        StatusEvent::GarbageCollected {
            reset: 1,
            purged: 2,
            gated: 3,
        },
        StatusEvent::PartWritten { part: 1, rules: 5 },
        StatusEvent::RetryDrained {
            part: 1,
            own: 1,
            deferred: 1,
        },
        StatusEvent::ShardLoaded {
            part: 1,
            backlog: 5,
            retry: 1,
            to_check: 6,
            skipped: 0,
        },
        StatusEvent::Progress {
            part: 1,
            snapshot: ProgressSnapshot {
                completed: 6,
                total: 6,
                valid: 2,
                rate: 12.0,
                eta_secs: 0.0,
            },
        },
        StatusEvent::FailureHistogram {
            part: 1,
            histogram: failures.clone(),
        },
        StatusEvent::CreditHistogram {
            part: 1,
            histogram: failures,
        },
        StatusEvent::RetryQueued { part: 1, rules: 0 },
        StatusEvent::ShardCompleted {
            part: 1,
            published: 2,
            stats: RunStats::default(),
        },
    ];

    for format in ["text", "json"] {
        let config = LoggingConfig {
            format: format.to_string(),
            ..LoggingConfig::default()
        };
        let sink = ConsoleStatusSink::new(config.clone(), 4);
        for event in &events {
            sink.emit(event);
        }
        let logger = StatusLogger::new(&config, 4, vec![]);
        logger.emit(StatusEvent::Merged { rules: 1 });
    }
}
