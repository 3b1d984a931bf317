#![allow(dead_code)]

use ad_prune::config::Config;
use ad_prune::logger::{MemoryStatusSink, StatusEvent, StatusLogger};
use ad_prune::pipeline::Pipeline;
use ad_prune::resolver::DnsResolver;
use ad_prune::sources::StaticRuleSource;
use ad_prune::store::{Store, StoreLayout};
use hickory_resolver::proto::rr::{Record, RecordType};
use rustc_hash::FxHashSet;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tempfile::TempDir;

/// Resolves exactly the names in its live set and records every query.
pub struct MockResolver {
    live: Mutex<FxHashSet<String>>,
    calls: Mutex<Vec<String>>,
    delay: Mutex<Duration>,
}

impl MockResolver {
    pub fn new(live: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            live: Mutex::new(live.iter().map(|s| s.to_string()).collect()),
            calls: Mutex::new(Vec::new()),
            delay: Mutex::new(Duration::ZERO),
        })
    }

    /// Every lookup sleeps this long before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn set_live(&self, live: &[&str]) {
        *self.live.lock().unwrap() = live.iter().map(|s| s.to_string()).collect();
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait::async_trait]
impl DnsResolver for MockResolver {
    async fn resolve(&self, name: &str, _query_type: RecordType) -> anyhow::Result<Vec<Record>> {
        self.calls.lock().unwrap().push(name.to_string());
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.live.lock().unwrap().contains(name) {
            Ok(vec![])
        } else {
            Err(anyhow::anyhow!("NXDOMAIN"))
        }
    }
}

/// Resolves the names in its live set and records the retry file's contents
/// at every lookup.
pub struct QueueWatchingResolver {
    live: FxHashSet<String>,
    retry_file: PathBuf,
    snapshots: Mutex<Vec<String>>,
}

impl QueueWatchingResolver {
    pub fn new(live: &[&str], retry_file: PathBuf) -> Arc<Self> {
        Arc::new(Self {
            live: live.iter().map(|s| s.to_string()).collect(),
            retry_file,
            snapshots: Mutex::new(Vec::new()),
        })
    }

    pub fn snapshots(&self) -> Vec<String> {
        self.snapshots.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl DnsResolver for QueueWatchingResolver {
    async fn resolve(&self, name: &str, _query_type: RecordType) -> anyhow::Result<Vec<Record>> {
        let contents = std::fs::read_to_string(&self.retry_file).unwrap_or_default();
        self.snapshots.lock().unwrap().push(contents);
        if self.live.contains(name) {
            Ok(vec![])
        } else {
            Err(anyhow::anyhow!("NXDOMAIN"))
        }
    }
}

pub type EventBuffer = Arc<RwLock<VecDeque<StatusEvent>>>;

pub struct Fixture {
    pub dir: TempDir,
    pub config: Config,
    pub resolver: Arc<MockResolver>,
}

impl Fixture {
    pub fn new(parts: usize, live: &[&str]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.parts = parts;
        config.tmp_dir = dir.path().join("tmp").to_string_lossy().into_owned();
        config.dist_dir = dir.path().join("dist").to_string_lossy().into_owned();
        config.urls_file = dir.path().join("urls.txt").to_string_lossy().into_owned();
        config.dns.canary_domains = Vec::new();
        config.dns.timeout_ms = 500;
        Self {
            dir,
            config,
            resolver: MockResolver::new(live),
        }
    }

    pub fn pipeline(&self, rules: &[&str]) -> Pipeline {
        self.pipeline_with_events(rules).0
    }

    pub fn pipeline_with_events(&self, rules: &[&str]) -> (Pipeline, EventBuffer) {
        let memory = MemoryStatusSink::new(1000);
        let buffer = memory.clone_buffer();
        let logger = StatusLogger::with_sinks(vec![Box::new(memory)]);
        let pipeline = Pipeline::new(
            &self.config,
            Arc::new(StaticRuleSource::new(rules.iter().copied())),
            self.resolver.clone(),
            logger,
        );
        (pipeline, buffer)
    }

    pub fn pipeline_with_resolver(
        &self,
        rules: &[&str],
        resolver: Arc<dyn DnsResolver>,
    ) -> Pipeline {
        Pipeline::new(
            &self.config,
            Arc::new(StaticRuleSource::new(rules.iter().copied())),
            resolver,
            StatusLogger::silent(),
        )
    }

    pub fn store(&self) -> Store {
        Store::new(StoreLayout::from_config(&self.config))
    }
}

pub fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
