use super::types::{DnsResolver, Upstream};
use anyhow::Result;
use hickory_resolver::proto::rr::{Record, RecordType};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// Spreads lookups across upstreams, one upstream per query. A negative
/// answer is final; the next upstream is not consulted.
pub struct RoundRobinResolver {
    upstreams: Vec<Upstream>,
    current: AtomicUsize,
}

impl RoundRobinResolver {
    pub fn new(upstreams: Vec<Upstream>) -> Self {
        Self {
            upstreams,
            current: AtomicUsize::new(0),
        }
    }
}

#[async_trait::async_trait]
impl DnsResolver for RoundRobinResolver {
    async fn resolve(&self, name: &str, query_type: RecordType) -> Result<Vec<Record>> {
        let idx = self.current.fetch_add(1, Ordering::Relaxed) % self.upstreams.len();
        let upstream = &self.upstreams[idx];
        match upstream.resolver.lookup(name, query_type).await {
            Ok(lookup) => Ok(lookup.records().to_vec()),
            Err(e) => {
                debug!("Upstream {} failed for {}: {}", upstream.url, name, e);
                Err(anyhow::anyhow!("Lookup failed for {}: {}", name, e))
            }
        }
    }
}
