use crate::config::DnsConfig;
use crate::engine::extract_domain;
use crate::logger::{StatusEvent, StatusLogger};
use crate::resolver::DnsResolver;
use crate::stats::ProgressMeter;
use anyhow::Result;
use futures::{stream, StreamExt};
use hickory_resolver::proto::rr::RecordType;
use rustc_hash::FxHashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Decides which rules point at domains that currently resolve.
pub struct LivenessChecker {
    resolver: Arc<dyn DnsResolver>,
    concurrency: usize,
    timeout: Duration,
    progress_every: usize,
    canaries: Vec<String>,
}

impl LivenessChecker {
    pub fn new(resolver: Arc<dyn DnsResolver>, config: &DnsConfig) -> Self {
        Self {
            resolver,
            concurrency: config.concurrency.max(1),
            timeout: config.timeout(),
            progress_every: config.progress_every,
            canaries: config.canary_domains.clone(),
        }
    }

    async fn resolves(&self, domain: &str) -> bool {
        let lookup = self.resolver.resolve(domain, RecordType::A);
        match tokio::time::timeout(self.timeout, lookup).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!("{} did not resolve: {}", domain, e);
                false
            }
            Err(_) => {
                debug!("{} timed out after {:?}", domain, self.timeout);
                false
            }
        }
    }

    /// A rule is live when its domain is non-empty and resolves in time.
    pub async fn is_live(&self, rule: &str) -> bool {
        match extract_domain(rule) {
            Some(domain) => self.resolves(&domain).await,
            None => false,
        }
    }

    /// Fails when none of the canary domains resolve, which means there is no
    /// usable network and no lookup result can be trusted.
    pub async fn probe(&self) -> Result<()> {
        if self.canaries.is_empty() {
            return Ok(());
        }
        for canary in &self.canaries {
            if self.resolves(canary).await {
                return Ok(());
            }
        }
        Err(anyhow::anyhow!(
            "None of the canary domains resolved ({}); refusing to validate",
            self.canaries.join(", ")
        ))
    }

    /// Checks `rules` with at most `concurrency` lookups in flight and returns
    /// the live ones. Individual failures are never errors.
    pub async fn check(
        &self,
        part: usize,
        rules: &[String],
        logger: &StatusLogger,
    ) -> FxHashSet<String> {
        let mut meter = ProgressMeter::new(rules.len(), self.progress_every);
        let mut valid = FxHashSet::default();

        let mut results = stream::iter(rules.iter())
            .map(|rule| async move { (rule, self.is_live(rule).await) })
            .buffer_unordered(self.concurrency);

        while let Some((rule, live)) = results.next().await {
            if live {
                valid.insert(rule.clone());
            }
            if let Some(snapshot) = meter.record(live) {
                logger.emit(StatusEvent::Progress { part, snapshot });
            }
        }

        info!(
            "Part {}: {} of {} rules resolved",
            part,
            meter.valid(),
            meter.completed()
        );
        valid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::MemoryStatusSink;
    use hickory_resolver::proto::rr::Record;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockResolver {
        live: Vec<&'static str>,
        slow: Vec<&'static str>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl MockResolver {
        fn new(live: Vec<&'static str>, slow: Vec<&'static str>) -> Self {
            Self {
                live,
                slow,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl DnsResolver for MockResolver {
        async fn resolve(&self, name: &str, _query_type: RecordType) -> Result<Vec<Record>> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if self.slow.iter().any(|s| *s == name) {
                tokio::time::sleep(Duration::from_secs(5)).await;
            } else {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.live.iter().any(|s| *s == name) {
                Ok(vec![])
            } else {
                Err(anyhow::anyhow!("NXDOMAIN"))
            }
        }
    }

    fn config(concurrency: usize, timeout_ms: u64, every: usize) -> DnsConfig {
        DnsConfig {
            concurrency,
            timeout_ms,
            progress_every: every,
            canary_domains: vec!["canary.example".to_string()],
            ..DnsConfig::default()
        }
    }

    fn rules(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_only_resolving_domains_are_valid() {
        let resolver = Arc::new(MockResolver::new(vec!["good.example"], vec![]));
        let checker = LivenessChecker::new(resolver, &config(80, 2000, 540));
        let valid = checker
            .check(
                1,
                &rules(&["|ads.example^", "|bad^", "|good.example^", "||^"]),
                &StatusLogger::silent(),
            )
            .await;
        assert_eq!(valid.len(), 1);
        assert!(valid.contains("|good.example^"));
    }

    #[tokio::test]
    async fn test_slow_lookup_counts_as_invalid() {
        let resolver = Arc::new(MockResolver::new(
            vec!["slow.example", "fast.example"],
            vec!["slow.example"],
        ));
        let checker = LivenessChecker::new(resolver, &config(4, 50, 540));
        let valid = checker
            .check(
                1,
                &rules(&["|slow.example^", "|fast.example^"]),
                &StatusLogger::silent(),
            )
            .await;
        assert!(valid.contains("|fast.example^"));
        assert!(!valid.contains("|slow.example^"));
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let resolver = Arc::new(MockResolver::new(vec![], vec![]));
        let checker = LivenessChecker::new(resolver.clone(), &config(3, 2000, 540));
        let input: Vec<String> = (0..30).map(|i| format!("|h{i}.example^")).collect();
        checker.check(1, &input, &StatusLogger::silent()).await;
        let peak = resolver.peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak concurrency {peak}");
        assert!(peak >= 2);
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_and_ends_complete() {
        let resolver = Arc::new(MockResolver::new(vec!["h1.example"], vec![]));
        let checker = LivenessChecker::new(resolver, &config(8, 2000, 4));
        let memory = MemoryStatusSink::new(100);
        let buffer = memory.clone_buffer();
        let logger = StatusLogger::with_sinks(vec![Box::new(memory)]);
        let input: Vec<String> = (0..10).map(|i| format!("|h{i}.example^")).collect();

        checker.check(3, &input, &logger).await;

        let completed: Vec<usize> = buffer
            .read()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                StatusEvent::Progress { part: 3, snapshot } => Some(snapshot.completed),
                _ => None,
            })
            .collect();
        assert_eq!(completed, vec![4, 8, 10]);
    }

    #[tokio::test]
    async fn test_probe_detects_missing_network() {
        let down = LivenessChecker::new(
            Arc::new(MockResolver::new(vec![], vec![])),
            &config(1, 100, 540),
        );
        assert!(down.probe().await.is_err());

        let up = LivenessChecker::new(
            Arc::new(MockResolver::new(vec!["canary.example"], vec![])),
            &config(1, 100, 540),
        );
        assert!(up.probe().await.is_ok());
    }
}
